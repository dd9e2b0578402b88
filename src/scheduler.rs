//! Background baking loop.
//!
//! One worker thread drives a `PassExecutor` through an unbounded sequence of
//! sampling passes. Each iteration is render, wait, publish, swap; a failed
//! iteration is retried with the same frame index up to a bounded count, then
//! the loop parks in a failed state. Stop is an explicit signal observed at
//! pass boundaries, never mid-pass.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::{BakeError, BakeResult};
use crate::executor::PassExecutor;

/// Observable loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Worker spawned, first pass not yet started.
    Idle,
    /// A sampling pass is being rendered and waited on.
    BuildingPass,
    /// A completed pass is being exposed to consumers.
    Publishing,
    /// Read/write targets exchanged; about to start the next pass.
    Swapped,
    /// Stop requested, finishing the current pass.
    Stopping,
    /// Worker exited cleanly.
    Stopped,
    /// Retries exhausted; the loop parked without publishing partial work.
    Failed,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Consecutive retries of one pass before the loop parks as failed.
    pub max_pass_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_pass_retries: 3,
        }
    }
}

struct Shared {
    stop: AtomicBool,
    passes: AtomicU64,
    state: Mutex<SchedulerState>,
    last_error: Mutex<Option<BakeError>>,
}

// A panicking worker may poison these locks; accessors recover the value
// rather than propagate, since stop() runs from Drop and must not panic.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        *lock_unpoisoned(&self.state) = state;
    }
}

/// Handle to the background baking thread. Dropping the handle signals stop
/// and joins the worker.
pub struct BakeScheduler {
    shared: Arc<Shared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl BakeScheduler {
    /// Spawn the baking loop over `executor`.
    pub fn spawn(
        executor: Box<dyn PassExecutor + Send>,
        config: SchedulerConfig,
    ) -> BakeResult<Self> {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            state: Mutex::new(SchedulerState::Idle),
            last_error: Mutex::new(None),
        });

        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("lumabake-scheduler".into())
            .spawn(move || run_loop(executor, worker_shared, config))
            .map_err(|e| BakeError::init(format!("failed to spawn baking thread: {e}")))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Completed, published passes so far.
    pub fn passes_completed(&self) -> u64 {
        self.shared.passes.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SchedulerState {
        *lock_unpoisoned(&self.shared.state)
    }

    /// Message of the error that parked the loop, if it failed.
    pub fn last_error(&self) -> Option<String> {
        lock_unpoisoned(&self.shared.last_error)
            .as_ref()
            .map(|e| e.to_string())
    }

    pub fn is_running(&self) -> bool {
        !matches!(
            self.state(),
            SchedulerState::Stopped | SchedulerState::Failed
        )
    }

    /// Signal stop and wait for the in-flight pass to finish. Idempotent.
    /// The final published snapshot remains valid after return.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("baking thread panicked");
                self.shared.set_state(SchedulerState::Failed);
            }
        }
    }
}

impl Drop for BakeScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(mut executor: Box<dyn PassExecutor + Send>, shared: Arc<Shared>, config: SchedulerConfig) {
    let mut frame_index: u32 = 0;

    loop {
        if shared.stop.load(Ordering::Acquire) {
            shared.set_state(SchedulerState::Stopping);
            break;
        }

        shared.set_state(SchedulerState::BuildingPass);
        match run_one_pass(executor.as_mut(), &shared, frame_index, &config) {
            Ok(()) => {
                shared.set_state(SchedulerState::Swapped);
                shared.passes.fetch_add(1, Ordering::Release);
                frame_index = frame_index.wrapping_add(1);
                if frame_index % 64 == 0 {
                    log::debug!("completed {frame_index} passes");
                }
            }
            Err(e) => {
                log::error!("pass {frame_index} failed permanently: {e}");
                *lock_unpoisoned(&shared.last_error) = Some(e);
                shared.set_state(SchedulerState::Failed);
                return;
            }
        }
    }

    shared.set_state(SchedulerState::Stopped);
    log::info!("baking loop stopped after {} passes", shared.passes.load(Ordering::Acquire));
}

/// One loop iteration with bounded retry. The frame index does not advance
/// across retries, so a retried pass reproduces the failed one exactly.
fn run_one_pass(
    executor: &mut dyn PassExecutor,
    shared: &Shared,
    frame_index: u32,
    config: &SchedulerConfig,
) -> BakeResult<()> {
    let mut attempt = 0;
    loop {
        match try_pass(executor, shared, frame_index) {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                if attempt > config.max_pass_retries {
                    return Err(e);
                }
                log::warn!(
                    "pass {frame_index} attempt {attempt} failed, retrying: {e}"
                );
                shared.set_state(SchedulerState::BuildingPass);
            }
        }
    }
}

fn try_pass(
    executor: &mut dyn PassExecutor,
    shared: &Shared,
    frame_index: u32,
) -> BakeResult<()> {
    executor.run_pass(frame_index)?;
    shared.set_state(SchedulerState::Publishing);
    executor.publish(frame_index)?;
    executor.swap();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted executor for loop-behavior tests.
    struct ScriptedExecutor {
        /// run_pass attempts that fail before succeeding, per frame index.
        failures: Vec<u32>,
        attempts: Vec<u32>,
        swapped: u32,
    }

    impl ScriptedExecutor {
        fn new(failures: Vec<u32>) -> Self {
            let attempts = vec![0; failures.len()];
            Self {
                failures,
                attempts,
                swapped: 0,
            }
        }
    }

    impl PassExecutor for ScriptedExecutor {
        fn run_pass(&mut self, frame_index: u32) -> BakeResult<()> {
            let i = frame_index as usize;
            if i >= self.failures.len() {
                // Script exhausted, hold the thread until stop is observed.
                std::thread::sleep(std::time::Duration::from_millis(1));
                return Err(BakeError::pass("script exhausted"));
            }
            self.attempts[i] += 1;
            if self.attempts[i] <= self.failures[i] {
                return Err(BakeError::pass("scripted failure"));
            }
            Ok(())
        }

        fn publish(&mut self, _frame_index: u32) -> BakeResult<()> {
            Ok(())
        }

        fn swap(&mut self) {
            self.swapped += 1;
        }

        fn resolution(&self) -> u32 {
            1
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_passes_complete_and_stop() {
        let exec = ScriptedExecutor::new(vec![0; 1_000_000]);
        let mut sched =
            BakeScheduler::spawn(Box::new(exec), SchedulerConfig::default()).unwrap();

        wait_for(|| sched.passes_completed() >= 5);
        sched.stop();

        assert_eq!(sched.state(), SchedulerState::Stopped);
        let n = sched.passes_completed();
        std::thread::sleep(std::time::Duration::from_millis(5));
        // No passes complete after stop.
        assert_eq!(sched.passes_completed(), n);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        // Frame 1 fails twice, then succeeds; the loop keeps going.
        let mut failures = vec![0; 1_000_000];
        failures[1] = 2;
        let exec = ScriptedExecutor::new(failures);
        let mut sched =
            BakeScheduler::spawn(Box::new(exec), SchedulerConfig::default()).unwrap();

        wait_for(|| sched.passes_completed() >= 10);
        sched.stop();
        assert!(sched.last_error().is_none());
    }

    #[test]
    fn test_exhausted_retries_fail_the_loop() {
        // Frame 0 always fails; with 3 retries the loop parks as Failed.
        let exec = ScriptedExecutor::new(vec![u32::MAX]);
        let sched =
            BakeScheduler::spawn(Box::new(exec), SchedulerConfig::default()).unwrap();

        wait_for(|| sched.state() == SchedulerState::Failed);
        assert_eq!(sched.passes_completed(), 0);
        assert!(sched.last_error().is_some());
    }

    struct PanickingExecutor;

    impl PassExecutor for PanickingExecutor {
        fn run_pass(&mut self, _frame_index: u32) -> BakeResult<()> {
            panic!("executor blew up");
        }

        fn publish(&mut self, _frame_index: u32) -> BakeResult<()> {
            Ok(())
        }

        fn swap(&mut self) {}

        fn resolution(&self) -> u32 {
            1
        }
    }

    #[test]
    fn test_worker_panic_surfaces_as_failed() {
        // A panicking worker must not take stop() (and thus Drop) down with
        // it; the handle reports Failed and stays queryable.
        let mut sched =
            BakeScheduler::spawn(Box::new(PanickingExecutor), SchedulerConfig::default())
                .unwrap();
        sched.stop();
        assert_eq!(sched.state(), SchedulerState::Failed);
        assert_eq!(sched.passes_completed(), 0);
        sched.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let exec = ScriptedExecutor::new(vec![0; 1_000_000]);
        let mut sched =
            BakeScheduler::spawn(Box::new(exec), SchedulerConfig::default()).unwrap();
        wait_for(|| sched.passes_completed() >= 1);
        sched.stop();
        sched.stop();
        assert_eq!(sched.state(), SchedulerState::Stopped);
    }
}
