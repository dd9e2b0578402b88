//! The sampling-pass algorithm, host side.
//!
//! Everything the per-texel kernel does lives here once in Rust: the PCG
//! hashing that turns the per-texel seed and the frame index into a
//! decorrelated random stream, cosine-weighted hemisphere sampling, the
//! slab-test BVH traversal with Möller–Trumbore any-hit, the running-mean
//! blend, and the UV-space rasterization that maps each texel to a surface
//! point. `shaders/lightmap_pass.wgsl` mirrors these functions; the CPU
//! executor calls them directly so the engine's convergence and determinism
//! properties are testable without a GPU.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::accel::CpuBvh;
use crate::mesh::MeshCpu;

/// Offset applied along the surface normal before tracing, to avoid
/// self-intersection with the emitting triangle.
pub const RAY_EPSILON: f32 = 1e-4;

// ---------- Per-texel RNG ----------

/// PCG output hash (Jarzynski & Olano).
#[inline]
pub fn pcg_hash(x: u32) -> u32 {
    let state = x.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28).wrapping_add(4))) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Initial RNG state for one texel in one pass. Hashing the frame index
/// before mixing decorrelates consecutive passes that share a texel seed.
#[inline]
pub fn pass_rng_state(seed: u32, frame_index: u32) -> u32 {
    pcg_hash(seed ^ pcg_hash(frame_index))
}

/// Advance the state and return a uniform float in [0, 1).
#[inline]
pub fn rng_next_f32(state: &mut u32) -> f32 {
    *state = pcg_hash(*state);
    (*state >> 8) as f32 * (1.0 / 16_777_216.0)
}

// ---------- Hemisphere sampling ----------

/// Cosine-weighted direction on the hemisphere around `normal`.
/// Branchless orthonormal basis (Duff et al.).
pub fn cosine_hemisphere(normal: Vec3, u1: f32, u2: f32) -> Vec3 {
    let r = u1.sqrt();
    let phi = 2.0 * std::f32::consts::PI * u2;
    let local = Vec3::new(r * phi.cos(), r * phi.sin(), (1.0 - u1).max(0.0).sqrt());

    let sign = if normal.z >= 0.0 { 1.0 } else { -1.0 };
    let a = -1.0 / (sign + normal.z);
    let b = normal.x * normal.y * a;
    let tangent = Vec3::new(1.0 + sign * normal.x * normal.x * a, sign * b, -sign * normal.x);
    let bitangent = Vec3::new(b, sign + normal.y * normal.y * a, -normal.y);

    (tangent * local.x + bitangent * local.y + normal * local.z).normalize()
}

// ---------- Intersection ----------

#[inline]
fn ray_aabb(origin: Vec3, inv_dir: Vec3, aabb_min: Vec3, aabb_max: Vec3, t_max: f32) -> bool {
    let t0 = (aabb_min - origin) * inv_dir;
    let t1 = (aabb_max - origin) * inv_dir;
    let t_near = t0.min(t1);
    let t_far = t0.max(t1);
    let enter = t_near.max_element().max(0.0);
    let exit = t_far.min_element().min(t_max);
    enter <= exit
}

/// Möller–Trumbore, any-hit variant. Returns the hit distance if the ray
/// intersects the triangle in (RAY_EPSILON, t_max).
#[inline]
pub fn ray_triangle(origin: Vec3, dir: Vec3, v0: Vec3, v1: Vec3, v2: Vec3, t_max: f32) -> Option<f32> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let pvec = dir.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = origin - v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let v = dir.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(qvec) * inv_det;
    if t > RAY_EPSILON && t < t_max {
        Some(t)
    } else {
        None
    }
}

/// True if any geometry lies along `dir` from `origin`.
pub fn occluded(bvh: &CpuBvh, origin: Vec3, dir: Vec3) -> bool {
    let inv_dir = Vec3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z);
    let t_max = f32::INFINITY;

    // Builder caps depth at 64; worst-case occupancy is depth + 1.
    let mut stack = [0u32; 96];
    let mut sp = 0usize;
    stack[sp] = bvh.root_index();
    sp += 1;

    while sp > 0 {
        sp -= 1;
        let node = &bvh.nodes[stack[sp] as usize];
        if !ray_aabb(
            origin,
            inv_dir,
            Vec3::from(node.aabb_min),
            Vec3::from(node.aabb_max),
            t_max,
        ) {
            continue;
        }
        if let Some((first, count)) = node.triangles() {
            for i in first..first + count {
                let tri = &bvh.triangles[bvh.tri_indices[i as usize] as usize];
                let v0 = Vec3::new(tri.v0[0], tri.v0[1], tri.v0[2]);
                let v1 = Vec3::new(tri.v1[0], tri.v1[1], tri.v1[2]);
                let v2 = Vec3::new(tri.v2[0], tri.v2[1], tri.v2[2]);
                if ray_triangle(origin, dir, v0, v1, v2, t_max).is_some() {
                    return true;
                }
            }
        } else if let Some((left, right)) = node.children() {
            // Depth is bounded by the builder (max 64).
            stack[sp] = left;
            sp += 1;
            stack[sp] = right;
            sp += 1;
        }
    }
    false
}

// ---------- Texel → surface mapping ----------

/// Per-texel surface record, GPU storage layout (32 bytes).
/// `position.w` is the coverage flag: 1.0 where a triangle covers the texel,
/// 0.0 elsewhere. `normal.w` is unused.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TexelSurface {
    pub position: [f32; 4],
    pub normal: [f32; 4],
}

impl TexelSurface {
    pub fn invalid() -> Self {
        Self {
            position: [0.0; 4],
            normal: [0.0; 4],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.position[3] > 0.5
    }
}

const _: () = {
    assert!(std::mem::size_of::<TexelSurface>() == 32);
};

/// Rasterize the mesh in lightmap UV space at texel centers, interpolating
/// world position and normal. Texels covered by no triangle stay invalid.
/// The original bakes this mapping in the vertex stage every pass; here it is
/// precomputed once per resolution since the geometry is static.
pub fn build_surface_table(mesh: &MeshCpu, width: u32, height: u32) -> Vec<TexelSurface> {
    let mut table = vec![TexelSurface::invalid(); width as usize * height as usize];

    for tri in 0..mesh.triangle_count() as usize {
        let (a, b, c) = mesh.triangle(tri);
        let (ua, ub, uc) = (
            glam::Vec2::from(a.texcoord),
            glam::Vec2::from(b.texcoord),
            glam::Vec2::from(c.texcoord),
        );

        let e0 = ub - ua;
        let e1 = uc - ua;
        let area = e0.x * e1.y - e0.y * e1.x;
        if area.abs() < 1e-12 {
            continue; // degenerate in UV space
        }
        let inv_area = 1.0 / area;

        let min_u = ua.x.min(ub.x).min(uc.x);
        let max_u = ua.x.max(ub.x).max(uc.x);
        let min_v = ua.y.min(ub.y).min(uc.y);
        let max_v = ua.y.max(ub.y).max(uc.y);

        let x0 = ((min_u * width as f32 - 0.5).floor().max(0.0)) as u32;
        let x1 = ((max_u * width as f32 + 0.5).ceil().min(width as f32 - 1.0)).max(0.0) as u32;
        let y0 = ((min_v * height as f32 - 0.5).floor().max(0.0)) as u32;
        let y1 = ((max_v * height as f32 + 0.5).ceil().min(height as f32 - 1.0)).max(0.0) as u32;

        let geometric_normal = {
            let pa = Vec3::from(a.position);
            let pb = Vec3::from(b.position);
            let pc = Vec3::from(c.position);
            (pb - pa).cross(pc - pa).normalize_or_zero()
        };

        for y in y0..=y1 {
            for x in x0..=x1 {
                let p = glam::Vec2::new(
                    (x as f32 + 0.5) / width as f32,
                    (y as f32 + 0.5) / height as f32,
                );
                let v2 = p - ua;
                let beta = (v2.x * e1.y - v2.y * e1.x) * inv_area;
                let gamma = (e0.x * v2.y - e0.y * v2.x) * inv_area;
                let alpha = 1.0 - beta - gamma;
                const COVERAGE_EPS: f32 = -1e-6;
                if beta < COVERAGE_EPS || gamma < COVERAGE_EPS || alpha < COVERAGE_EPS {
                    continue;
                }

                let position = Vec3::from(a.position) * alpha
                    + Vec3::from(b.position) * beta
                    + Vec3::from(c.position) * gamma;
                let mut normal = Vec3::from(a.normal) * alpha
                    + Vec3::from(b.normal) * beta
                    + Vec3::from(c.normal) * gamma;
                if normal.length_squared() < 1e-12 {
                    normal = geometric_normal;
                }
                normal = normal.normalize_or_zero();
                if normal == Vec3::ZERO {
                    continue;
                }

                table[(y * width + x) as usize] = TexelSurface {
                    position: [position.x, position.y, position.z, 1.0],
                    normal: [normal.x, normal.y, normal.z, 0.0],
                };
            }
        }
    }

    table
}

// ---------- Per-texel pass evaluation ----------

/// Running-mean blend: `estimate_n = (estimate_{n-1} * n + sample) / (n + 1)`
/// with `n` the frame index of the pass being rendered. Unbiased; expected
/// squared error decays as O(1/N).
#[inline]
pub fn blend(prev: f32, sample: f32, frame_index: u32) -> f32 {
    let n = frame_index as f32;
    (prev * n + sample) / (n + 1.0)
}

/// One stochastic sample for one texel: 1.0 if the cosine-weighted
/// hemisphere ray escapes the scene, 0.0 if occluded.
pub fn sample_texel(bvh: &CpuBvh, surface: &TexelSurface, seed: u32, frame_index: u32) -> f32 {
    let mut state = pass_rng_state(seed, frame_index);
    let u1 = rng_next_f32(&mut state);
    let u2 = rng_next_f32(&mut state);

    let normal = Vec3::new(surface.normal[0], surface.normal[1], surface.normal[2]);
    let origin = Vec3::new(surface.position[0], surface.position[1], surface.position[2])
        + normal * RAY_EPSILON;
    let dir = cosine_hemisphere(normal, u1, u2);

    if occluded(bvh, origin, dir) {
        0.0
    } else {
        1.0
    }
}

/// Evaluate one full sampling pass on the CPU: for every texel, trace one
/// ray and blend into the previous estimate. Semantically identical to one
/// GPU pass dispatch.
pub fn evaluate_pass(
    bvh: &CpuBvh,
    table: &[TexelSurface],
    seeds: &[u32],
    prev: &[f32],
    out: &mut [f32],
    frame_index: u32,
) {
    debug_assert_eq!(table.len(), seeds.len());
    debug_assert_eq!(prev.len(), out.len());
    debug_assert_eq!(table.len(), prev.len());

    for i in 0..table.len() {
        let surface = &table[i];
        out[i] = if surface.is_valid() {
            let sample = sample_texel(bvh, surface, seeds[i], frame_index);
            blend(prev[i], sample, frame_index)
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{build_bvh, BuildOptions, GpuTriangle};
    use crate::mesh::{IndexData, MeshCpu, Vertex};

    fn unit_triangle_mesh() -> MeshCpu {
        let n = [0.0, 0.0, 1.0];
        MeshCpu::new(
            vec![
                Vertex::new([0.0, 0.0, 0.0], n, [0.0, 0.0]),
                Vertex::new([1.0, 0.0, 0.0], n, [1.0, 0.0]),
                Vertex::new([0.0, 1.0, 0.0], n, [0.0, 1.0]),
            ],
            IndexData::U16(vec![0, 1, 2]),
        )
        .unwrap()
    }

    #[test]
    fn test_pcg_hash_deterministic() {
        assert_eq!(pcg_hash(0), pcg_hash(0));
        assert_ne!(pcg_hash(0), pcg_hash(1));
    }

    #[test]
    fn test_rng_uniform_range() {
        let mut state = pass_rng_state(12345, 0);
        for _ in 0..1000 {
            let v = rng_next_f32(&mut state);
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_pass_decorrelation() {
        // Same texel seed, different frame index: different stream.
        let mut a = pass_rng_state(99, 0);
        let mut b = pass_rng_state(99, 1);
        assert_ne!(rng_next_f32(&mut a), rng_next_f32(&mut b));
    }

    #[test]
    fn test_cosine_hemisphere_above_surface() {
        let n = Vec3::new(0.0, 0.0, 1.0);
        let mut state = pass_rng_state(7, 0);
        for _ in 0..500 {
            let u1 = rng_next_f32(&mut state);
            let u2 = rng_next_f32(&mut state);
            let d = cosine_hemisphere(n, u1, u2);
            assert!(d.dot(n) >= 0.0, "direction below surface: {d:?}");
            assert!((d.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_cosine_hemisphere_arbitrary_normal() {
        let n = Vec3::new(1.0, -2.0, 0.5).normalize();
        let mut state = pass_rng_state(11, 3);
        for _ in 0..500 {
            let u1 = rng_next_f32(&mut state);
            let u2 = rng_next_f32(&mut state);
            assert!(cosine_hemisphere(n, u1, u2).dot(n) >= -1e-5);
        }
    }

    #[test]
    fn test_ray_triangle_hit_and_miss() {
        let v0 = Vec3::new(-1.0, -1.0, 2.0);
        let v1 = Vec3::new(1.0, -1.0, 2.0);
        let v2 = Vec3::new(0.0, 1.0, 2.0);
        let hit = ray_triangle(Vec3::ZERO, Vec3::Z, v0, v1, v2, f32::INFINITY);
        assert!((hit.unwrap() - 2.0).abs() < 1e-5);

        let miss = ray_triangle(Vec3::ZERO, -Vec3::Z, v0, v1, v2, f32::INFINITY);
        assert!(miss.is_none());
    }

    #[test]
    fn test_occlusion_through_bvh() {
        let tris = vec![GpuTriangle::new(
            [-5.0, -5.0, 1.0],
            [5.0, -5.0, 1.0],
            [0.0, 5.0, 1.0],
        )];
        let bvh = build_bvh(tris, &BuildOptions::default()).unwrap();

        assert!(occluded(&bvh, Vec3::ZERO, Vec3::Z));
        assert!(!occluded(&bvh, Vec3::ZERO, -Vec3::Z));
        assert!(!occluded(&bvh, Vec3::ZERO, Vec3::X));
    }

    #[test]
    fn test_surface_table_coverage() {
        let mesh = unit_triangle_mesh();
        let table = build_surface_table(&mesh, 32, 32);

        // The triangle covers the lower-left half of UV space.
        let inside = &table[(8 * 32 + 8) as usize];
        assert!(inside.is_valid());
        assert_eq!(inside.normal[2], 1.0);

        let outside = &table[(31 * 32 + 31) as usize];
        assert!(!outside.is_valid());

        let covered = table.iter().filter(|t| t.is_valid()).count();
        // Roughly half the texels, generously bracketed.
        assert!(covered > 300 && covered < 700, "covered = {covered}");
    }

    #[test]
    fn test_surface_table_interpolates_position() {
        let mesh = unit_triangle_mesh();
        let table = build_surface_table(&mesh, 64, 64);
        for (i, t) in table.iter().enumerate() {
            if !t.is_valid() {
                continue;
            }
            let x = (i % 64) as f32;
            let y = (i / 64) as f32;
            // UV equals world XY for this mesh.
            assert!((t.position[0] - (x + 0.5) / 64.0).abs() < 0.05);
            assert!((t.position[1] - (y + 0.5) / 64.0).abs() < 0.05);
            assert_eq!(t.position[2], 0.0);
        }
    }

    #[test]
    fn test_blend_running_mean() {
        // Blending the sequence 1, 0, 1, 0 yields the running means.
        let mut estimate = 0.0;
        let samples = [1.0, 0.0, 1.0, 0.0];
        let expected = [1.0, 0.5, 2.0 / 3.0, 0.5];
        for (n, (&s, &e)) in samples.iter().zip(expected.iter()).enumerate() {
            estimate = blend(estimate, s, n as u32);
            assert!((estimate - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_unoccluded_texel_converges_to_one() {
        let mesh = unit_triangle_mesh();
        let bvh = build_bvh(
            mesh.triangle_positions()
                .into_iter()
                .map(|(a, b, c)| GpuTriangle::new(a, b, c))
                .collect(),
            &BuildOptions::default(),
        )
        .unwrap();
        let table = build_surface_table(&mesh, 16, 16);
        let surface = table.iter().find(|t| t.is_valid()).unwrap();

        // Rays leave the surface along +Z and the only triangle lies in the
        // surface plane, so every sample must be unoccluded.
        for frame in 0..32 {
            assert_eq!(sample_texel(&bvh, surface, 1234, frame), 1.0);
        }
    }
}
