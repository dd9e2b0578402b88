//! Statistical and determinism properties of the progressive estimator,
//! exercised through the CPU executor so they hold on GPU-less machines.

use std::sync::Arc;

use lumabake::accel::{build_bvh, BuildOptions, GpuTriangle};
use lumabake::trace;
use lumabake::{
    BakeScheduler, CpuPassExecutor, IndexData, MeshCpu, PassExecutor, SchedulerConfig,
    SnapshotSlot, Vertex,
};

/// Ground plane covering UV space, with a floating occluder over its
/// center. The occluder's texcoords are collapsed to a point so it
/// contributes geometry but no lightmap texels.
fn occluded_plane_mesh() -> MeshCpu {
    let up = [0.0, 0.0, 1.0];
    let down = [0.0, 0.0, -1.0];
    let vertices = vec![
        // ground quad, z = 0, UV = world XY
        Vertex::new([0.0, 0.0, 0.0], up, [0.0, 0.0]),
        Vertex::new([1.0, 0.0, 0.0], up, [1.0, 0.0]),
        Vertex::new([1.0, 1.0, 0.0], up, [1.0, 1.0]),
        Vertex::new([0.0, 1.0, 0.0], up, [0.0, 1.0]),
        // occluder quad over the center, z = 0.25
        Vertex::new([0.3, 0.3, 0.25], down, [0.0, 0.0]),
        Vertex::new([0.7, 0.3, 0.25], down, [0.0, 0.0]),
        Vertex::new([0.7, 0.7, 0.25], down, [0.0, 0.0]),
        Vertex::new([0.3, 0.7, 0.25], down, [0.0, 0.0]),
    ];
    let indices = IndexData::U16(vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
    MeshCpu::new(vertices, indices).expect("valid mesh")
}

fn cpu_session(
    mesh: &MeshCpu,
    resolution: u32,
    seed: u32,
) -> (CpuPassExecutor, Arc<SnapshotSlot>) {
    let triangles = mesh
        .triangle_positions()
        .into_iter()
        .map(|(a, b, c)| GpuTriangle::new(a, b, c))
        .collect();
    let bvh = Arc::new(build_bvh(triangles, &BuildOptions::default()).expect("bvh"));
    let table = trace::build_surface_table(mesh, resolution, resolution);
    let slot = Arc::new(SnapshotSlot::new(resolution, resolution));
    let exec =
        CpuPassExecutor::new(bvh, table, resolution, seed, slot.clone()).expect("executor");
    (exec, slot)
}

fn run_passes(exec: &mut CpuPassExecutor, from: u32, to: u32) {
    for frame in from..to {
        exec.run_pass(frame).expect("pass");
        exec.publish(frame).expect("publish");
        exec.swap();
    }
}

#[test]
fn test_same_seed_is_bit_reproducible() {
    let mesh = occluded_plane_mesh();
    let (mut a, slot_a) = cpu_session(&mesh, 16, 7);
    let (mut b, slot_b) = cpu_session(&mesh, 16, 7);

    run_passes(&mut a, 0, 20);
    run_passes(&mut b, 0, 20);

    let sa = slot_a.current();
    let sb = slot_b.current();
    assert_eq!(sa.version(), 20);
    assert_eq!(sa.data(), sb.data(), "same seed must replay bit-identically");
}

#[test]
fn test_different_seeds_differ() {
    let mesh = occluded_plane_mesh();
    let (mut a, slot_a) = cpu_session(&mesh, 16, 1);
    let (mut b, slot_b) = cpu_session(&mesh, 16, 2);

    run_passes(&mut a, 0, 4);
    run_passes(&mut b, 0, 4);

    assert_ne!(slot_a.current().data(), slot_b.current().data());
}

#[test]
fn test_hundred_passes_end_to_end() {
    let mesh = occluded_plane_mesh();
    let (mut exec, slot) = cpu_session(&mesh, 32, 5);

    run_passes(&mut exec, 0, 100);

    let snap = slot.current();
    assert_eq!(snap.version(), 100);
    assert_eq!(snap.data().len(), 32 * 32);
    for &v in snap.data() {
        assert!(v.is_finite());
        assert!((0.0..=1.0).contains(&v), "texel out of range: {v}");
    }

    // Shadowed texels under the occluder must read darker than open corners.
    let at = |x: usize, y: usize| snap.data()[y * 32 + x];
    let center = at(16, 16);
    let corner = at(2, 2);
    assert!(
        center < corner,
        "center {center} should be darker than corner {corner}"
    );
    assert!(corner > 0.75, "open corner should be mostly lit, got {corner}");
}

#[test]
fn test_error_shrinks_with_pass_count() {
    // Against a long-run reference, the 64-pass estimate must be closer
    // than the 8-pass estimate.
    let mesh = occluded_plane_mesh();
    let res = 16u32;

    let (mut reference, ref_slot) = cpu_session(&mesh, res, 11);
    run_passes(&mut reference, 0, 4096);
    let truth = ref_slot.current();

    let (mut exec, slot) = cpu_session(&mesh, res, 23);
    run_passes(&mut exec, 0, 8);
    let early = slot.current();
    run_passes(&mut exec, 8, 64);
    let late = slot.current();

    let mse = |snap: &lumabake::LightmapSnapshot| {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for (a, b) in snap.data().iter().zip(truth.data().iter()) {
            // Only texels the surface table covers carry signal.
            if *b > 0.0 || *a > 0.0 {
                let d = (*a - *b) as f64;
                sum += d * d;
                count += 1;
            }
        }
        sum / count as f64
    };

    let err_early = mse(&early);
    let err_late = mse(&late);
    assert!(
        err_late < err_early,
        "64-pass error {err_late} not below 8-pass error {err_early}"
    );
}

#[test]
fn test_snapshot_versions_increase_monotonically() {
    let mesh = occluded_plane_mesh();
    let (mut exec, slot) = cpu_session(&mesh, 8, 3);

    let mut last = slot.current().version();
    assert_eq!(last, 0);
    for frame in 0..10 {
        exec.run_pass(frame).expect("pass");
        exec.publish(frame).expect("publish");
        exec.swap();
        let v = slot.current().version();
        assert_eq!(v, last + 1);
        last = v;
    }
}

#[test]
fn test_snapshot_pair_tracks_consecutive_passes() {
    let mesh = occluded_plane_mesh();
    let (mut exec, slot) = cpu_session(&mesh, 8, 3);

    run_passes(&mut exec, 0, 2);
    let (current, previous) = slot.snapshot_pair();
    assert_eq!(current.version(), 2);
    assert_eq!(previous.expect("two passes published").version(), 1);
}

#[test]
fn test_concurrent_reads_see_whole_passes() {
    // With a fixed seed every published pass is deterministic, so a reader
    // racing the live baking loop can check each snapshot it observes
    // against a sequential replay. A torn or partially written snapshot
    // would not match any completed pass.
    let mesh = occluded_plane_mesh();
    let res = 16u32;
    let max_reference = 8192u32;

    let (mut reference, ref_slot) = cpu_session(&mesh, res, 77);
    let mut expected: Vec<Vec<f32>> = Vec::with_capacity(max_reference as usize);
    for frame in 0..max_reference {
        reference.run_pass(frame).expect("pass");
        reference.publish(frame).expect("publish");
        expected.push(ref_slot.current().data().to_vec());
        reference.swap();
    }

    let (exec, slot) = cpu_session(&mesh, res, 77);
    let mut sched =
        BakeScheduler::spawn(Box::new(exec), SchedulerConfig::default()).expect("spawn");

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
    let mut verified = 0usize;
    let mut last_version = 0u64;
    while verified < 200 {
        assert!(std::time::Instant::now() < deadline, "no progress observed");
        let snap = slot.current();
        let v = snap.version();
        assert!(v >= last_version, "version regressed: {last_version} -> {v}");
        last_version = v;
        if v == 0 {
            continue;
        }
        if v > max_reference as u64 {
            break;
        }
        assert_eq!(
            snap.data(),
            expected[(v - 1) as usize].as_slice(),
            "snapshot v{v} does not match any completed pass"
        );
        verified += 1;
    }
    sched.stop();
    assert!(verified > 0, "reader never observed a published pass");
}

#[test]
fn test_uncovered_texels_stay_zero() {
    // A mesh occupying only part of UV space must leave the rest at 0.
    let n = [0.0, 0.0, 1.0];
    let mesh = MeshCpu::new(
        vec![
            Vertex::new([0.0, 0.0, 0.0], n, [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], n, [0.4, 0.0]),
            Vertex::new([0.0, 1.0, 0.0], n, [0.0, 0.4]),
        ],
        IndexData::U16(vec![0, 1, 2]),
    )
    .expect("valid mesh");

    let (mut exec, slot) = cpu_session(&mesh, 16, 9);
    run_passes(&mut exec, 0, 16);

    let snap = slot.current();
    let at = |x: usize, y: usize| snap.data()[y * 16 + x];
    assert_eq!(at(15, 15), 0.0);
    assert!(at(0, 0) > 0.0);
}
