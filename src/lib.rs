//! # Brickfield: GPU Particle-to-SDF Surfacing
//!
//! Brickfield turns a set of moving particles into a sparse, traceable
//! signed-distance surface every frame, entirely on the GPU apart from
//! two small counter readbacks.
//!
//! ## Pipeline
//!
//! 1. **Motion** ([`particles`]) - advance particles along their scene's
//!    trajectory.
//! 2. **Grid build** ([`grid::builder`]) - bucket particles into a
//!    two-level grid (blocks of cells) with atomic counters.
//! 3. **Classification** ([`grid::classify`]) - find surface blocks, then
//!    surface cells inside them: occupied, with at least one empty
//!    neighbor under the configured connectivity rule.
//! 4. **Scan** ([`scan`]) - exclusive prefix sum of per-cell counts via
//!    chained scan with decoupled lookback, one pass, no round trips.
//! 5. **Reorder** ([`reorder`]) - scatter particles into cell-contiguous
//!    order for coherent SDF evaluation.
//! 6. **Bricks** ([`bricks`]) - one AABB per brick of each surface cell,
//!    voxels packed into a shared 3D pool texture.
//! 7. **Acceleration structure** ([`accel`]) - software BVH over the
//!    brick AABBs, rebuilt when the brick count changes and refit when it
//!    does not.
//!
//! [`pipeline::SurfacePipeline`] schedules all of it; the two readbacks
//! ([`readback`]) size the later dispatches and allow the frame to end
//! early when nothing is on the surface.
//!
//! ## Key Design
//!
//! - **Two-level sparsity**: cell classification only runs inside surface
//!   blocks, so the fine pass scales with surface area, not volume.
//! - **Grow-only capacity**: buffers and the brick pool never shrink
//!   within a run; reallocation happens on high-water marks only.
//! - **Rebuild vs refit**: the acceleration structure is rebuilt only
//!   when the leaf count changes, otherwise bounds are refit in place.
//!
//! The dense fallback ([`simple`]) trades all the sparsity machinery for
//! one fixed-resolution volume, useful as a baseline and for debugging.

pub mod accel;
pub mod bricks;
pub mod config;
pub mod error;
pub mod gpu;
pub mod grid;
pub mod particles;
pub mod pipeline;
pub mod readback;
pub mod reorder;
pub mod scan;
pub mod simple;
