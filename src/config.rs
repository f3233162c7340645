use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

/// wgpu default `max_compute_workgroups_per_dimension`; dispatches never
/// exceed this along any axis.
pub const MAX_DISPATCH_DIM: u32 = 65_535;

/// Neighborhood rule used by the surface frontier tests.
///
/// Block-level and cell-level classification can be tuned independently;
/// the two levels are not required to agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// 6-connectivity: the axis-aligned face neighbors only.
    Faces,
    /// 26-connectivity: faces, edges and corners.
    FacesEdgesCorners,
}

impl Connectivity {
    /// Encoding passed to the classification kernels.
    pub fn as_u32(self) -> u32 {
        match self {
            Connectivity::Faces => 0,
            Connectivity::FacesEdgesCorners => 1,
        }
    }
}

/// Initial particle distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneKind {
    /// Uniformly random positions with random oscillation speeds.
    Random,
    /// Regular lattice. Static; the motion stage is skipped.
    Grid,
    /// Lattice in x/z with time-driven sinusoidal motion in y.
    Wave,
}

/// Which geometry path feeds the ray tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    /// Full adaptive pipeline: sparse surface cells, per-cell bricks,
    /// incrementally maintained acceleration structure.
    Adaptive,
    /// Degenerate fallback: one unit-cube AABB and a dense SDF volume
    /// at `texture_resolution`.
    Simple,
}

/// Immutable pipeline configuration, fixed for the lifetime of a
/// [`crate::pipeline::SurfacePipeline`].
///
/// All buffer and texture footprints derive from these values, so there is
/// no hot reconfiguration; build a new pipeline instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of simulated particles.
    pub particle_count: u32,

    /// Grid cells along each world axis.
    pub cells_per_axis: UVec3,

    /// Cells along each axis of one block. Must divide `cells_per_axis`.
    pub cells_per_block_axis: UVec3,

    /// World-space bounds of the grid volume.
    pub world_min: Vec3,
    pub world_max: Vec3,

    /// Bricks along each axis of one surface cell.
    pub bricks_per_cell_axis: u32,

    /// Voxels along each axis of one brick in the brick-pool texture.
    pub voxels_per_brick_axis: u32,

    /// Edge resolution of the dense fallback SDF volume (Simple variant).
    pub texture_resolution: u32,

    pub scene: SceneKind,
    pub variant: Variant,

    /// Frontier rule for block classification.
    pub block_connectivity: Connectivity,
    /// Frontier rule for cell classification.
    pub cell_connectivity: Connectivity,

    /// Skip the particle motion stage entirely.
    pub freeze_particles: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            particle_count: 125,
            cells_per_axis: UVec3::splat(16),
            cells_per_block_axis: UVec3::splat(4),
            world_min: Vec3::ZERO,
            world_max: Vec3::ONE,
            bricks_per_cell_axis: 2,
            voxels_per_brick_axis: 8,
            texture_resolution: 256,
            scene: SceneKind::Wave,
            variant: Variant::Adaptive,
            block_connectivity: Connectivity::Faces,
            cell_connectivity: Connectivity::Faces,
            freeze_particles: false,
        }
    }
}

impl PipelineConfig {
    pub fn cell_count(&self) -> u32 {
        self.cells_per_axis.x * self.cells_per_axis.y * self.cells_per_axis.z
    }

    pub fn blocks_per_axis(&self) -> UVec3 {
        self.cells_per_axis / self.cells_per_block_axis
    }

    pub fn block_count(&self) -> u32 {
        let b = self.blocks_per_axis();
        b.x * b.y * b.z
    }

    pub fn cells_per_block(&self) -> u32 {
        let c = self.cells_per_block_axis;
        c.x * c.y * c.z
    }

    pub fn bricks_per_cell(&self) -> u32 {
        self.bricks_per_cell_axis.pow(3)
    }

    /// Sanity-check the derived grid structure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Zero particles is a legal degenerate state, not a config error.
        if self.cells_per_axis.cmpeq(UVec3::ZERO).any()
            || self.cells_per_block_axis.cmpeq(UVec3::ZERO).any()
        {
            return Err(ConfigError::ZeroExtent);
        }
        let rem = UVec3::new(
            self.cells_per_axis.x % self.cells_per_block_axis.x,
            self.cells_per_axis.y % self.cells_per_block_axis.y,
            self.cells_per_axis.z % self.cells_per_block_axis.z,
        );
        if rem.cmpne(UVec3::ZERO).any() {
            return Err(ConfigError::BlockMisaligned {
                cells: self.cells_per_axis,
                block: self.cells_per_block_axis,
            });
        }
        if self.world_max.cmple(self.world_min).any() {
            return Err(ConfigError::EmptyWorld);
        }
        if self.bricks_per_cell_axis == 0 || self.voxels_per_brick_axis == 0 {
            return Err(ConfigError::ZeroExtent);
        }
        // Cell classification runs one thread per cell of a block in a
        // single workgroup.
        if self.cells_per_block() > 256 {
            return Err(ConfigError::BlockTooLarge {
                cells_per_block: self.cells_per_block(),
            });
        }
        // The cell pass launches one workgroup per surface block along x,
        // capped by maxComputeWorkgroupsPerDimension.
        if self.block_count() > MAX_DISPATCH_DIM {
            return Err(ConfigError::TooManyBlocks {
                block_count: self.block_count(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("grid extents must be non-zero on every axis")]
    ZeroExtent,
    #[error("cells per axis {cells} not divisible by block size {block}")]
    BlockMisaligned { cells: UVec3, block: UVec3 },
    #[error("world_max must exceed world_min on every axis")]
    EmptyWorld,
    #[error("{block_count} blocks exceeds the per-dimension dispatch limit")]
    TooManyBlocks { block_count: u32 },
    #[error("{cells_per_block} cells per block exceeds the 256-thread workgroup limit")]
    BlockTooLarge { cells_per_block: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_reference_grid() {
        let cfg = PipelineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.cell_count(), 4096);
        assert_eq!(cfg.block_count(), 64);
        assert_eq!(cfg.cells_per_block(), 64);
        assert_eq!(cfg.bricks_per_cell(), 8);
    }

    #[test]
    fn misaligned_blocks_rejected() {
        let cfg = PipelineConfig {
            cells_per_axis: UVec3::new(16, 16, 18),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BlockMisaligned { .. })
        ));
    }

    #[test]
    fn oversized_block_rejected() {
        let cfg = PipelineConfig {
            cells_per_axis: UVec3::splat(16),
            cells_per_block_axis: UVec3::splat(8),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::BlockTooLarge { .. })));
    }

    #[test]
    fn undispatchable_block_count_rejected() {
        // 64^3 single-cell blocks: one workgroup per block would overflow
        // a one-dimensional dispatch.
        let cfg = PipelineConfig {
            cells_per_axis: UVec3::splat(64),
            cells_per_block_axis: UVec3::splat(1),
            ..Default::default()
        };
        assert!(cfg.block_count() > MAX_DISPATCH_DIM);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TooManyBlocks { .. })
        ));
    }

    #[test]
    fn ron_round_trip() {
        let cfg = PipelineConfig::default();
        let text = ron::to_string(&cfg).unwrap();
        let back: PipelineConfig = ron::from_str(&text).unwrap();
        assert_eq!(back.cell_count(), cfg.cell_count());
        assert_eq!(back.scene, cfg.scene);
    }
}
