//! Cross-thread snapshot publication.
//!
//! Single-writer/many-reader hand-off between the baking scheduler and its
//! consumers. Snapshots are whole, immutable, versioned buffers swapped under
//! a mutex, so a reader either sees the previous complete pass or the next —
//! never a mix. Readers never wait on GPU work; before the first completed
//! pass they observe a defined zero-filled snapshot with version 0.
//!
//! The slot keeps the two most recent snapshots so the convergence
//! diagnostic can difference consecutive passes without touching
//! accumulation state.

use std::sync::{Arc, Mutex};

/// One published lightmap state: the estimate after `version` completed
/// passes. Cheap to clone (the texel data is shared).
#[derive(Debug, Clone)]
pub struct LightmapSnapshot {
    version: u64,
    width: u32,
    height: u32,
    data: Arc<[f32]>,
}

impl LightmapSnapshot {
    fn zeroed(width: u32, height: u32) -> Self {
        Self {
            version: 0,
            width,
            height,
            data: vec![0.0; width as usize * height as usize].into(),
        }
    }

    /// Publication token: the number of completed passes this snapshot
    /// reflects. 0 is the initial cleared state.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major R32Float texel data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

struct SlotState {
    current: LightmapSnapshot,
    previous: Option<LightmapSnapshot>,
}

/// The publish slot. The scheduler is the sole writer; any number of
/// consumers may read concurrently.
pub struct SnapshotSlot {
    state: Mutex<SlotState>,
}

impl SnapshotSlot {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Mutex::new(SlotState {
                current: LightmapSnapshot::zeroed(width, height),
                previous: None,
            }),
        }
    }

    /// Publish a completed pass. Must only be called with data from a fully
    /// completed pass; `version` is the pass count it reflects.
    pub fn publish(&self, version: u64, width: u32, height: u32, data: Vec<f32>) {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        let snapshot = LightmapSnapshot {
            version,
            width,
            height,
            data: data.into(),
        };
        let mut state = self.state.lock().unwrap();
        state.previous = Some(std::mem::replace(&mut state.current, snapshot));
    }

    /// Latest published snapshot. Never blocks on the writer beyond the
    /// pointer swap; repeated calls between passes return identical data.
    pub fn current(&self) -> LightmapSnapshot {
        self.state.lock().unwrap().current.clone()
    }

    /// The two most recent snapshots (latest first), for convergence
    /// diagnostics. The second is `None` until two passes have completed.
    pub fn snapshot_pair(&self) -> (LightmapSnapshot, Option<LightmapSnapshot>) {
        let state = self.state.lock().unwrap();
        (state.current.clone(), state.previous.clone())
    }

}
