//! Frame orchestration: particles in, traceable surface out.
//!
//! The adaptive path runs in three submissions per frame, split at the
//! two CPU readbacks that size later dispatches:
//!
//!   1. motion, grid clear, particle bucketing, block classification
//!      -> read back surface block count (all zero: done)
//!   2. cell classification over the surface blocks
//!      -> read back surface cell count (zero: done)
//!   3. count scan, particle reorder, AABB generation, brick fill,
//!      acceleration structure build or refit
//!
//! The simple path skips all of that and evaluates a dense volume.

use std::time::Instant;

use crate::accel::AccelerationStructureManager;
use crate::bricks::{AabbGenerator, BrickPool, MAX_BRICKS};
use crate::config::{PipelineConfig, Variant};
use crate::error::PipelineError;
use crate::gpu::GpuContext;
use crate::grid::classify::SurfaceClassifier;
use crate::grid::{GridBuffers, GridBuilder, GridLayout};
use crate::particles::ParticleSystem;
use crate::readback::CountReadback;
use crate::reorder::ReorderStage;
use crate::scan::csdl::ChainedScanDecoupledLookback;
use crate::scan::PrefixScan;
use crate::simple::SimpleVolume;

/// What one frame produced, for logging and tests.
#[derive(Copy, Clone, Debug, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    pub surface_blocks: u32,
    pub surface_cells: u32,
    pub bricks_count: u32,
    /// Full rebuild this frame (leaf count changed) rather than a refit.
    pub rebuilt: bool,
    /// Wall time through the block-count readback.
    pub classify_ms: f32,
    /// Wall time of the scan/reorder/brick/accel submission.
    pub finalize_ms: f32,
}

/// Everything a ray tracer needs to consume the frame's surface.
pub struct TraceInputs<'a> {
    pub top_level: &'a wgpu::Buffer,
    pub nodes: &'a wgpu::Buffer,
    pub aabbs: &'a wgpu::Buffer,
    pub brick_pool: &'a wgpu::TextureView,
    pub pool_bricks: glam::UVec3,
    pub voxels_per_brick_axis: u32,
    pub built: bool,
}

pub struct SurfacePipeline {
    config: PipelineConfig,
    particles: ParticleSystem,
    buffers: GridBuffers,
    builder: GridBuilder,
    classifier: SurfaceClassifier,
    readback: CountReadback,
    scan: ChainedScanDecoupledLookback,
    reorder: ReorderStage,
    aabb_gen: AabbGenerator,
    brick_pool: BrickPool,
    accel: AccelerationStructureManager,
    simple: Option<SimpleVolume>,

    time: f32,
    frame_index: u64,
}

impl SurfacePipeline {
    pub fn new(ctx: &GpuContext, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let device = &ctx.device;

        let layout = GridLayout::new(&config);
        let particles = ParticleSystem::new(device, &config);
        let buffers = GridBuffers::new(device, &layout, &config);
        let builder = GridBuilder::new(device, &buffers, &particles, &layout);
        let classifier = SurfaceClassifier::new(device, &buffers, layout.block_count());
        let readback = CountReadback::new(device);

        // Scan length is the fixed cell count, so size it once up front;
        // the output buffer address is then stable for dependent binds.
        let mut scan = ChainedScanDecoupledLookback::new(device);
        scan.resize(device, &ctx.queue, layout.cell_count())?;

        let reorder = ReorderStage::new(device, &buffers, &particles, &scan);
        let mut aabb_gen = AabbGenerator::new(device, &buffers);
        let brick_pool = BrickPool::new(device, &config, &buffers, &particles, &scan);
        let accel = AccelerationStructureManager::new(device);
        aabb_gen.rebind(device, accel.aabb_buffer());

        let simple = match config.variant {
            Variant::Simple => Some(SimpleVolume::new(device, &config, &particles)),
            Variant::Adaptive => None,
        };

        log::info!(
            "surface pipeline: {} particles, {} cells, {} blocks, {:?}",
            particles.count(),
            layout.cell_count(),
            layout.block_count(),
            config.variant,
        );

        Ok(Self {
            config,
            particles,
            buffers,
            builder,
            classifier,
            readback,
            scan,
            reorder,
            aabb_gen,
            brick_pool,
            accel,
            simple,
            time: 0.0,
            frame_index: 0,
        })
    }

    /// Advance simulation time and produce this frame's surface.
    pub fn frame(&mut self, ctx: &GpuContext, dt: f32) -> Result<FrameReport, PipelineError> {
        self.time += dt;
        let frame_index = self.frame_index;
        self.frame_index += 1;

        if self.simple.is_some() {
            return self.frame_simple(ctx, frame_index);
        }

        let started = Instant::now();

        // Submission 1: move particles, rebuild the grid, classify blocks.
        let mut encoder = ctx.encoder("Classify Blocks Encoder");
        self.particles
            .record_motion(&ctx.queue, &mut encoder, self.time);
        self.builder.record(&mut encoder);
        self.classifier.record_block_pass(&mut encoder);
        let counts = self
            .readback
            .read(ctx, encoder, &self.buffers.surface_counts);
        let classify_ms = started.elapsed().as_secs_f32() * 1000.0;

        if counts.surface_blocks == 0 {
            log::debug!("frame {frame_index}: no surface blocks");
            return Ok(FrameReport {
                frame_index,
                classify_ms,
                ..Default::default()
            });
        }

        // Submission 2: classify cells inside the surface blocks only.
        let mut encoder = ctx.encoder("Classify Cells Encoder");
        self.classifier
            .record_cell_pass(&mut encoder, counts.surface_blocks);
        let counts = self
            .readback
            .read(ctx, encoder, &self.buffers.surface_counts);

        if counts.surface_cells == 0 {
            return Ok(FrameReport {
                frame_index,
                surface_blocks: counts.surface_blocks,
                classify_ms,
                ..Default::default()
            });
        }

        let bricks_count = counts
            .surface_cells
            .saturating_mul(self.config.bricks_per_cell());
        if bricks_count > MAX_BRICKS {
            return Err(PipelineError::CapacityExceeded {
                requested: bricks_count as u64,
                max: MAX_BRICKS as u64,
            });
        }

        let rebuilt = self.accel.requires_rebuild(bricks_count);
        if self.accel.allocate_aabb_buffer(&ctx.device, bricks_count) {
            self.aabb_gen.rebind(&ctx.device, self.accel.aabb_buffer());
        }
        self.brick_pool.ensure_capacity(&ctx.device, bricks_count);

        // Submission 3: offsets, reorder, bricks, acceleration structure.
        let finalize_started = Instant::now();
        let mut encoder = ctx.encoder("Finalize Surface Encoder");
        encoder.copy_buffer_to_buffer(
            &self.buffers.cell_counts,
            0,
            self.scan.input(),
            0,
            self.config.cell_count() as u64 * 4,
        );
        self.scan.record(&mut encoder);
        self.reorder.record(&mut encoder);
        self.aabb_gen.record(&ctx.queue, &mut encoder, bricks_count);
        self.brick_pool
            .record_fill(&ctx.queue, &mut encoder, bricks_count);
        self.accel
            .record_update(&ctx.queue, &mut encoder, bricks_count);
        ctx.submit_and_wait(encoder);
        let finalize_ms = finalize_started.elapsed().as_secs_f32() * 1000.0;

        Ok(FrameReport {
            frame_index,
            surface_blocks: counts.surface_blocks,
            surface_cells: counts.surface_cells,
            bricks_count,
            rebuilt,
            classify_ms,
            finalize_ms,
        })
    }

    /// Dense fallback: one volume, one world-sized leaf.
    fn frame_simple(
        &mut self,
        ctx: &GpuContext,
        frame_index: u64,
    ) -> Result<FrameReport, PipelineError> {
        let started = Instant::now();
        let Some(simple) = self.simple.as_ref() else {
            return Ok(FrameReport {
                frame_index,
                ..Default::default()
            });
        };

        let rebuilt = self.accel.requires_rebuild(1);
        if self.accel.allocate_aabb_buffer(&ctx.device, 1) {
            self.aabb_gen.rebind(&ctx.device, self.accel.aabb_buffer());
        }
        ctx.queue.write_buffer(
            self.accel.aabb_buffer(),
            0,
            bytemuck::cast_slice(&[crate::bricks::Aabb {
                min: self.config.world_min.to_array(),
                max: self.config.world_max.to_array(),
            }]),
        );

        let mut encoder = ctx.encoder("Simple Volume Encoder");
        self.particles
            .record_motion(&ctx.queue, &mut encoder, self.time);
        simple.record_fill(
            &ctx.queue,
            &mut encoder,
            &self.config,
            self.particles.count(),
        );
        self.accel.record_update(&ctx.queue, &mut encoder, 1);
        ctx.submit_and_wait(encoder);

        Ok(FrameReport {
            frame_index,
            bricks_count: 1,
            rebuilt,
            finalize_ms: started.elapsed().as_secs_f32() * 1000.0,
            ..Default::default()
        })
    }

    pub fn trace_inputs(&self) -> TraceInputs<'_> {
        TraceInputs {
            top_level: self.accel.top_level_buffer(),
            nodes: self.accel.node_buffer(),
            aabbs: self.accel.aabb_buffer(),
            brick_pool: self.brick_pool.view(),
            pool_bricks: self.brick_pool.pool_bricks(),
            voxels_per_brick_axis: self.config.voxels_per_brick_axis,
            built: self.accel.is_structure_built(),
        }
    }

    pub fn is_structure_built(&self) -> bool {
        self.accel.is_structure_built()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn simple_volume(&self) -> Option<&SimpleVolume> {
        self.simple.as_ref()
    }

    pub fn particles(&self) -> &ParticleSystem {
        &self.particles
    }

    pub fn grid_buffers(&self) -> &GridBuffers {
        &self.buffers
    }

    pub fn scan(&self) -> &dyn PrefixScan {
        &self.scan
    }
}
