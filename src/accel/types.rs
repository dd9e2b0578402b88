//! Core types for the BVH acceleration structure.
//!
//! GPU-compatible node and triangle layouts plus build options. The node
//! layout matches the WGSL struct in `shaders/lightmap_pass.wgsl` exactly.

use bytemuck::{Pod, Zeroable};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    /// Empty AABB (inverted bounds for union operations).
    pub fn empty() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    pub fn expand_point(&mut self, point: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(point[i]);
            self.max[i] = self.max[i].max(point[i]);
        }
    }

    pub fn expand_aabb(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn extent(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn is_valid(&self) -> bool {
        self.min[0] <= self.max[0] && self.min[1] <= self.max[1] && self.min[2] <= self.max[2]
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// Leaf marker bit in `BvhNode::left`.
pub const LEAF_FLAG: u32 = 0x8000_0000;

/// BVH node, 32 bytes, matching the WGSL layout for GPU traversal.
///
/// Internal node: `left`/`right` are child node indices.
/// Leaf node: `left` carries `LEAF_FLAG | first_tri` (index into the
/// reordered triangle index array), `right` is the triangle count.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left: u32,
    pub aabb_max: [f32; 3],
    pub right: u32,
}

impl BvhNode {
    pub fn internal(aabb: Aabb, left_idx: u32, right_idx: u32) -> Self {
        Self {
            aabb_min: aabb.min,
            left: left_idx,
            aabb_max: aabb.max,
            right: right_idx,
        }
    }

    pub fn leaf(aabb: Aabb, first_tri: u32, tri_count: u32) -> Self {
        debug_assert!(first_tri < LEAF_FLAG);
        Self {
            aabb_min: aabb.min,
            left: LEAF_FLAG | first_tri,
            aabb_max: aabb.max,
            right: tri_count,
        }
    }

    pub fn is_leaf(&self) -> bool {
        (self.left & LEAF_FLAG) != 0
    }

    pub fn is_internal(&self) -> bool {
        !self.is_leaf()
    }

    /// Child indices for internal nodes.
    pub fn children(&self) -> Option<(u32, u32)> {
        if self.is_internal() {
            Some((self.left, self.right))
        } else {
            None
        }
    }

    /// `(first_tri, count)` range for leaf nodes.
    pub fn triangles(&self) -> Option<(u32, u32)> {
        if self.is_leaf() {
            Some((self.left & !LEAF_FLAG, self.right))
        } else {
            None
        }
    }

    pub fn aabb(&self) -> Aabb {
        Aabb {
            min: self.aabb_min,
            max: self.aabb_max,
        }
    }
}

// The WGSL mirror relies on this exact size and stride.
const _: () = {
    assert!(std::mem::size_of::<BvhNode>() == 32);
    assert!(std::mem::align_of::<BvhNode>() == 4);
};

/// Expanded triangle with vec4 components for GPU storage (48 bytes).
/// The `w` lanes are unused padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub v0: [f32; 4],
    pub v1: [f32; 4],
    pub v2: [f32; 4],
}

impl GpuTriangle {
    pub fn new(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3]) -> Self {
        Self {
            v0: [v0[0], v0[1], v0[2], 0.0],
            v1: [v1[0], v1[1], v1[2], 0.0],
            v2: [v2[0], v2[1], v2[2], 0.0],
        }
    }

    pub fn centroid(&self) -> [f32; 3] {
        [
            (self.v0[0] + self.v1[0] + self.v2[0]) / 3.0,
            (self.v0[1] + self.v1[1] + self.v2[1]) / 3.0,
            (self.v0[2] + self.v1[2] + self.v2[2]) / 3.0,
        ]
    }

    pub fn aabb(&self) -> Aabb {
        let mut aabb = Aabb::empty();
        aabb.expand_point([self.v0[0], self.v0[1], self.v0[2]]);
        aabb.expand_point([self.v1[0], self.v1[1], self.v1[2]]);
        aabb.expand_point([self.v2[0], self.v2[1], self.v2[2]]);
        aabb
    }
}

const _: () = {
    assert!(std::mem::size_of::<GpuTriangle>() == 48);
};

/// Build options for BVH construction.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Maximum primitives per leaf node.
    pub max_leaf_size: u32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { max_leaf_size: 4 }
    }
}

/// Statistics from BVH construction.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub build_time_ms: f32,
    pub triangle_count: u32,
    pub node_count: u32,
    pub leaf_count: u32,
    pub internal_count: u32,
    pub max_depth: u32,
    pub memory_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_layout() {
        assert_eq!(std::mem::size_of::<BvhNode>(), 32);
        assert_eq!(std::mem::align_of::<BvhNode>(), 4);

        let aabb = Aabb::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let leaf = BvhNode::leaf(aabb, 3, 4);
        assert!(leaf.is_leaf());
        assert_eq!(leaf.triangles(), Some((3, 4)));
        assert_eq!(leaf.children(), None);

        let internal = BvhNode::internal(aabb, 1, 2);
        assert!(internal.is_internal());
        assert_eq!(internal.children(), Some((1, 2)));
        assert_eq!(internal.triangles(), None);
    }

    #[test]
    fn test_aabb_expand() {
        let mut aabb = Aabb::empty();
        assert!(!aabb.is_valid());
        aabb.expand_point([1.0, -2.0, 3.0]);
        aabb.expand_point([-1.0, 2.0, 0.0]);
        assert!(aabb.is_valid());
        assert_eq!(aabb.min, [-1.0, -2.0, 0.0]);
        assert_eq!(aabb.max, [1.0, 2.0, 3.0]);
        assert_eq!(aabb.center(), [0.0, 0.0, 1.5]);
    }
}
