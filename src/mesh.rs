//! Host-side triangle mesh input.
//!
//! The engine accepts a fixed mesh at session start: interleaved vertices
//! (position, normal, texcoord — 32-byte stride) and a u16 or u32 triangle
//! list. The mesh is immutable for the session lifetime; any geometry change
//! requires a fresh session.

use bytemuck::{Pod, Zeroable};

use crate::error::{BakeError, BakeResult};

/// Interleaved vertex: position (3 floats), normal (3 floats),
/// lightmap texcoord (2 floats). Stride is 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 2],
}

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            texcoord,
        }
    }
}

const _: () = {
    assert!(std::mem::size_of::<Vertex>() == 32);
};

/// Triangle-list index data, 16- or 32-bit.
#[derive(Debug, Clone)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(v) => v.len(),
            IndexData::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index element width in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            IndexData::U16(_) => 2,
            IndexData::U32(_) => 4,
        }
    }

    fn get(&self, i: usize) -> u32 {
        match self {
            IndexData::U16(v) => v[i] as u32,
            IndexData::U32(v) => v[i],
        }
    }
}

/// Immutable host mesh for one baking session.
#[derive(Debug, Clone)]
pub struct MeshCpu {
    vertices: Vec<Vertex>,
    indices: IndexData,
    triangle_count: u32,
}

impl MeshCpu {
    /// Validate and wrap vertex/index data.
    ///
    /// Fails with `BakeError::Init` on an empty mesh, an index count that is
    /// not a multiple of three, or an out-of-range index.
    pub fn new(vertices: Vec<Vertex>, indices: IndexData) -> BakeResult<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(BakeError::init("mesh has no vertices or indices"));
        }
        if indices.len() % 3 != 0 {
            return Err(BakeError::init(format!(
                "index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        let vertex_count = vertices.len() as u32;
        for i in 0..indices.len() {
            let idx = indices.get(i);
            if idx >= vertex_count {
                return Err(BakeError::init(format!(
                    "index {} out of range (vertex count {})",
                    idx, vertex_count
                )));
            }
        }

        let triangle_count = (indices.len() / 3) as u32;

        Ok(Self {
            vertices,
            indices,
            triangle_count,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// The three vertices of triangle `tri_idx`.
    pub fn triangle(&self, tri_idx: usize) -> (Vertex, Vertex, Vertex) {
        let base = tri_idx * 3;
        (
            self.vertices[self.indices.get(base) as usize],
            self.vertices[self.indices.get(base + 1) as usize],
            self.vertices[self.indices.get(base + 2) as usize],
        )
    }

    /// Position-only triangles for BVH construction.
    pub fn triangle_positions(&self) -> Vec<([f32; 3], [f32; 3], [f32; 3])> {
        (0..self.triangle_count as usize)
            .map(|i| {
                let (a, b, c) = self.triangle(i);
                (a.position, b.position, c.position)
            })
            .collect()
    }
}
