//! Median-split BVH builder.
//!
//! Produces a flattened node array suitable for stack-based GPU traversal.
//! Children are emitted before their parent, so the root is always the last
//! node in the array.

use std::time::Instant;

use crate::accel::types::{Aabb, BuildOptions, BuildStats, BvhNode, GpuTriangle};
use crate::error::{BakeError, BakeResult};

/// Flattened CPU BVH over an expanded triangle array.
#[derive(Debug, Clone)]
pub struct CpuBvh {
    pub nodes: Vec<BvhNode>,
    /// Reordered triangle indices referenced by leaf nodes.
    pub tri_indices: Vec<u32>,
    pub triangles: Vec<GpuTriangle>,
    pub world_aabb: Aabb,
    pub build_stats: BuildStats,
}

impl CpuBvh {
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangles.len() as u32
    }

    /// Index of the root node (last emitted).
    pub fn root_index(&self) -> u32 {
        self.nodes.len() as u32 - 1
    }
}

/// Build a BVH over the given triangles.
pub fn build_bvh(triangles: Vec<GpuTriangle>, options: &BuildOptions) -> BakeResult<CpuBvh> {
    let start_time = Instant::now();

    if triangles.is_empty() {
        return Err(BakeError::init("cannot build BVH from empty mesh"));
    }

    let triangle_count = triangles.len() as u32;

    let tri_aabbs: Vec<Aabb> = triangles.iter().map(|t| t.aabb()).collect();
    let tri_centroids: Vec<[f32; 3]> = triangles.iter().map(|t| t.centroid()).collect();

    let mut world_aabb = Aabb::empty();
    for aabb in &tri_aabbs {
        world_aabb.expand_aabb(aabb);
    }

    let mut tri_indices: Vec<u32> = (0..triangle_count).collect();
    let mut nodes = Vec::new();
    let mut stats = BuildStats {
        triangle_count,
        ..Default::default()
    };

    let root = BuildRange {
        aabb: world_aabb,
        first: 0,
        count: triangle_count,
        depth: 0,
    };
    build_recursive(
        &tri_aabbs,
        &tri_centroids,
        &mut tri_indices,
        &mut nodes,
        root,
        options,
        &mut stats,
    );

    stats.build_time_ms = start_time.elapsed().as_secs_f32() * 1000.0;
    stats.node_count = nodes.len() as u32;
    stats.internal_count = stats.node_count - stats.leaf_count;
    stats.memory_usage_bytes = (nodes.len() * std::mem::size_of::<BvhNode>()
        + tri_indices.len() * std::mem::size_of::<u32>()
        + triangles.len() * std::mem::size_of::<GpuTriangle>()) as u64;

    log::debug!(
        "BVH built: {} triangles, {} nodes, depth {}, {:.2}ms",
        stats.triangle_count,
        stats.node_count,
        stats.max_depth,
        stats.build_time_ms
    );

    Ok(CpuBvh {
        nodes,
        tri_indices,
        triangles,
        world_aabb,
        build_stats: stats,
    })
}

struct BuildRange {
    aabb: Aabb,
    first: u32,
    count: u32,
    depth: u32,
}

fn build_recursive(
    tri_aabbs: &[Aabb],
    tri_centroids: &[[f32; 3]],
    tri_indices: &mut [u32],
    nodes: &mut Vec<BvhNode>,
    range: BuildRange,
    options: &BuildOptions,
    stats: &mut BuildStats,
) -> u32 {
    stats.max_depth = stats.max_depth.max(range.depth);

    if range.count <= options.max_leaf_size || range.depth > 64 {
        return push_leaf(nodes, stats, range.aabb, range.first, range.count);
    }

    let split = match find_median_split(
        tri_centroids,
        &tri_indices[range.first as usize..(range.first + range.count) as usize],
        &range.aabb,
    ) {
        Some(s) => s,
        None => return push_leaf(nodes, stats, range.aabb, range.first, range.count),
    };

    let (axis, split_pos) = split;
    let split_index =
        partition_triangles(tri_indices, range.first, range.count, axis, split_pos, tri_centroids);

    let left_count = split_index - range.first;
    let right_count = range.count - left_count;
    if left_count == 0 || right_count == 0 {
        // Degenerate split (all centroids coincide along the axis).
        return push_leaf(nodes, stats, range.aabb, range.first, range.count);
    }

    let left_aabb = compute_bounds(
        tri_aabbs,
        &tri_indices[range.first as usize..split_index as usize],
    );
    let right_aabb = compute_bounds(
        tri_aabbs,
        &tri_indices[split_index as usize..(range.first + range.count) as usize],
    );

    let left_child = build_recursive(
        tri_aabbs,
        tri_centroids,
        tri_indices,
        nodes,
        BuildRange {
            aabb: left_aabb,
            first: range.first,
            count: left_count,
            depth: range.depth + 1,
        },
        options,
        stats,
    );
    let right_child = build_recursive(
        tri_aabbs,
        tri_centroids,
        tri_indices,
        nodes,
        BuildRange {
            aabb: right_aabb,
            first: split_index,
            count: right_count,
            depth: range.depth + 1,
        },
        options,
        stats,
    );

    let node_idx = nodes.len() as u32;
    nodes.push(BvhNode::internal(range.aabb, left_child, right_child));
    node_idx
}

fn push_leaf(
    nodes: &mut Vec<BvhNode>,
    stats: &mut BuildStats,
    aabb: Aabb,
    first: u32,
    count: u32,
) -> u32 {
    stats.leaf_count += 1;
    let node_idx = nodes.len() as u32;
    nodes.push(BvhNode::leaf(aabb, first, count));
    node_idx
}

/// Pick the widest axis and the median centroid position along it.
fn find_median_split(
    tri_centroids: &[[f32; 3]],
    indices: &[u32],
    parent_aabb: &Aabb,
) -> Option<(usize, f32)> {
    if indices.len() < 2 {
        return None;
    }

    let extent = parent_aabb.extent();
    let axis = if extent[0] > extent[1] && extent[0] > extent[2] {
        0
    } else if extent[1] > extent[2] {
        1
    } else {
        2
    };

    let mut centroids: Vec<f32> = indices
        .iter()
        .map(|&idx| tri_centroids[idx as usize][axis])
        .collect();
    centroids.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let split_pos = centroids[centroids.len() / 2];
    Some((axis, split_pos))
}

/// Partition `indices[first..first+count]` around `split_pos`; returns the
/// absolute index of the first right-side element.
fn partition_triangles(
    indices: &mut [u32],
    first: u32,
    count: u32,
    axis: usize,
    split_pos: f32,
    tri_centroids: &[[f32; 3]],
) -> u32 {
    let range = &mut indices[first as usize..(first + count) as usize];

    let mut left = 0;
    let mut right = range.len();
    while left < right {
        let centroid = tri_centroids[range[left] as usize];
        if centroid[axis] < split_pos {
            left += 1;
        } else {
            right -= 1;
            range.swap(left, right);
        }
    }

    first + left as u32
}

fn compute_bounds(tri_aabbs: &[Aabb], indices: &[u32]) -> Aabb {
    let mut aabb = Aabb::empty();
    for &idx in indices {
        aabb.expand_aabb(&tri_aabbs[idx as usize]);
    }
    aabb
}
