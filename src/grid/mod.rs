//! Two-level spatial grid over the world volume.
//!
//! The grid is a fixed partition: blocks tile the world, cells tile each
//! block. Per-frame occupancy lives in GPU buffers owned by
//! [`builder::GridBuilder`]; [`classify::SurfaceClassifier`] derives the
//! sparse surface sets from it. [`GridLayout`] is the host-side mirror of
//! the index math the kernels use, shared by seeding and tests.

pub mod builder;
pub mod classify;

pub use builder::{GridBuffers, GridBuilder};

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, UVec3, Vec3};

use crate::config::{Connectivity, PipelineConfig};

/// Per-frame surface cardinalities, written by the classification kernels
/// and the only grid state ever read back to the host.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GridSurfaceCounts {
    pub surface_blocks: u32,
    pub surface_cells: u32,
}

/// Uniform block shared by every grid-facing kernel (must match shaders).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct GridParams {
    pub world_min: [f32; 3],
    pub _pad0: f32,
    pub cell_size: [f32; 3],
    pub _pad1: f32,
    pub cells_per_axis: [u32; 3],
    pub cell_count: u32,
    pub blocks_per_axis: [u32; 3],
    pub block_count: u32,
    pub cells_per_block_axis: [u32; 3],
    pub cells_per_block: u32,
    pub particle_count: u32,
    pub bricks_per_cell_axis: u32,
    pub block_connectivity: u32,
    pub cell_connectivity: u32,
}

/// Host-side mirror of the grid index math.
#[derive(Debug, Clone)]
pub struct GridLayout {
    pub world_min: Vec3,
    pub world_max: Vec3,
    pub cells_per_axis: UVec3,
    pub blocks_per_axis: UVec3,
    pub cells_per_block_axis: UVec3,
}

impl GridLayout {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            world_min: config.world_min,
            world_max: config.world_max,
            cells_per_axis: config.cells_per_axis,
            blocks_per_axis: config.blocks_per_axis(),
            cells_per_block_axis: config.cells_per_block_axis,
        }
    }

    pub fn cell_count(&self) -> u32 {
        self.cells_per_axis.x * self.cells_per_axis.y * self.cells_per_axis.z
    }

    pub fn block_count(&self) -> u32 {
        self.blocks_per_axis.x * self.blocks_per_axis.y * self.blocks_per_axis.z
    }

    pub fn cell_size(&self) -> Vec3 {
        (self.world_max - self.world_min) / self.cells_per_axis.as_vec3()
    }

    /// Cell containing `pos`. Half-open intervals: a position exactly on a
    /// shared face belongs to the higher cell, except on the world maximum
    /// where it clamps into the last cell.
    pub fn cell_coord_of(&self, pos: Vec3) -> UVec3 {
        let rel = (pos - self.world_min) / self.cell_size();
        let max = self.cells_per_axis.as_ivec3() - IVec3::ONE;
        rel.floor()
            .as_ivec3()
            .clamp(IVec3::ZERO, max)
            .as_uvec3()
    }

    pub fn cell_index(&self, coord: UVec3) -> u32 {
        coord.x
            + coord.y * self.cells_per_axis.x
            + coord.z * self.cells_per_axis.x * self.cells_per_axis.y
    }

    pub fn cell_coord(&self, index: u32) -> UVec3 {
        let xy = self.cells_per_axis.x * self.cells_per_axis.y;
        UVec3::new(
            index % self.cells_per_axis.x,
            (index % xy) / self.cells_per_axis.x,
            index / xy,
        )
    }

    pub fn block_of_cell(&self, cell: UVec3) -> UVec3 {
        cell / self.cells_per_block_axis
    }

    pub fn block_index(&self, coord: UVec3) -> u32 {
        coord.x
            + coord.y * self.blocks_per_axis.x
            + coord.z * self.blocks_per_axis.x * self.blocks_per_axis.y
    }

    pub fn block_coord(&self, index: u32) -> UVec3 {
        let xy = self.blocks_per_axis.x * self.blocks_per_axis.y;
        UVec3::new(
            index % self.blocks_per_axis.x,
            (index % xy) / self.blocks_per_axis.x,
            index / xy,
        )
    }

    /// World-space bounds of a cell.
    pub fn cell_bounds(&self, coord: UVec3) -> (Vec3, Vec3) {
        let min = self.world_min + coord.as_vec3() * self.cell_size();
        (min, min + self.cell_size())
    }

    pub fn params(&self, config: &PipelineConfig) -> GridParams {
        GridParams {
            world_min: self.world_min.to_array(),
            _pad0: 0.0,
            cell_size: self.cell_size().to_array(),
            _pad1: 0.0,
            cells_per_axis: self.cells_per_axis.to_array(),
            cell_count: self.cell_count(),
            blocks_per_axis: self.blocks_per_axis.to_array(),
            block_count: self.block_count(),
            cells_per_block_axis: self.cells_per_block_axis.to_array(),
            cells_per_block: config.cells_per_block(),
            particle_count: config.particle_count,
            bricks_per_cell_axis: config.bricks_per_cell_axis,
            block_connectivity: config.block_connectivity.as_u32(),
            cell_connectivity: config.cell_connectivity.as_u32(),
        }
    }
}

/// Neighbor offsets for a frontier test.
pub fn neighbor_offsets(connectivity: Connectivity) -> Vec<IVec3> {
    match connectivity {
        Connectivity::Faces => vec![
            IVec3::NEG_X,
            IVec3::X,
            IVec3::NEG_Y,
            IVec3::Y,
            IVec3::NEG_Z,
            IVec3::Z,
        ],
        Connectivity::FacesEdgesCorners => {
            let mut out = Vec::with_capacity(26);
            for z in -1..=1 {
                for y in -1..=1 {
                    for x in -1..=1 {
                        if x != 0 || y != 0 || z != 0 {
                            out.push(IVec3::new(x, y, z));
                        }
                    }
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout::new(&PipelineConfig::default())
    }

    #[test]
    fn cell_index_round_trip() {
        let g = layout();
        for idx in [0u32, 1, 17, 255, 4095] {
            assert_eq!(g.cell_index(g.cell_coord(idx)), idx);
        }
    }

    #[test]
    fn positions_map_to_containing_cell() {
        let g = layout();
        // Cell (8,8,8) spans [0.5, 0.5625) on each axis.
        let coord = g.cell_coord_of(Vec3::splat(0.53));
        assert_eq!(coord, UVec3::splat(8));
        let (min, max) = g.cell_bounds(coord);
        assert!(min.cmple(Vec3::splat(0.53)).all());
        assert!(max.cmpgt(Vec3::splat(0.53)).all());
    }

    #[test]
    fn boundary_ties_resolve_upward() {
        let g = layout();
        // 0.5 sits exactly on the face between cells 7 and 8.
        assert_eq!(g.cell_coord_of(Vec3::splat(0.5)).x, 8);
        // The world maximum clamps into the last cell.
        assert_eq!(g.cell_coord_of(Vec3::ONE), UVec3::splat(15));
        assert_eq!(g.cell_coord_of(Vec3::splat(-1.0)), UVec3::ZERO);
    }

    #[test]
    fn blocks_tile_cells() {
        let g = layout();
        assert_eq!(g.block_of_cell(UVec3::new(3, 4, 15)), UVec3::new(0, 1, 3));
        assert_eq!(g.block_index(g.block_coord(63)), 63);
    }

    #[test]
    fn connectivity_offset_counts() {
        assert_eq!(neighbor_offsets(Connectivity::Faces).len(), 6);
        assert_eq!(neighbor_offsets(Connectivity::FacesEdgesCorners).len(), 26);
    }
}
