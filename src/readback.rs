//! GPU→CPU count readback with a strict drain-before-map discipline.
//!
//! Dispatch sizes for the cell-classification and AABB-generation stages
//! are host-side arguments, so the surface counts have to cross back to
//! the CPU mid-frame. [`CountReadback::read`] consumes the caller's
//! encoder, appends the counts copy, submits, and drains the queue before
//! mapping the staging buffer, so all prior work in the encoder is
//! complete before the map resolves.

use crate::gpu::GpuContext;
use crate::grid::GridSurfaceCounts;

pub struct CountReadback {
    staging: wgpu::Buffer,
}

impl CountReadback {
    pub fn new(device: &wgpu::Device) -> Self {
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Counts Staging Buffer"),
            size: std::mem::size_of::<GridSurfaceCounts>() as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { staging }
    }

    /// Submit all work recorded in `encoder` plus the counts copy, drain
    /// the queue, and return the counts. The caller continues with a fresh
    /// encoder of its own.
    pub fn read(
        &self,
        ctx: &GpuContext,
        mut encoder: wgpu::CommandEncoder,
        counts: &wgpu::Buffer,
    ) -> GridSurfaceCounts {
        encoder.copy_buffer_to_buffer(
            counts,
            0,
            &self.staging,
            0,
            std::mem::size_of::<GridSurfaceCounts>() as u64,
        );
        ctx.submit_and_wait(encoder);

        let slice = self.staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, |_| {});
        let _ = ctx.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });

        let result = {
            let data = slice.get_mapped_range();
            *bytemuck::from_bytes::<GridSurfaceCounts>(&data)
        };
        self.staging.unmap();
        result
    }
}
