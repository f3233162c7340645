//! Chained-scan-with-decoupled-lookback exclusive scan.
//!
//! Single compute pass over fixed-size partitions. Each workgroup claims a
//! partition ticket from a bump counter, scans its tile locally, publishes
//! its reduction with a status flag, and resolves its global prefix by
//! polling the published reductions of preceding partitions instead of
//! waiting on a separate reduction round trip.

use crate::error::PipelineError;
use crate::scan::{align4, check_capacity, partition_count, PrefixScan};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

/// Uniform block for the scan kernels (must match shader).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ScanInfo {
    vectorized_size: u32,
    partitions: u32,
    _pad0: u32,
    _pad1: u32,
}

pub struct ChainedScanDecoupledLookback {
    init_pipeline: wgpu::ComputePipeline,
    scan_pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,

    info: wgpu::Buffer,
    scan_in: wgpu::Buffer,
    scan_out: wgpu::Buffer,
    reductions: wgpu::Buffer,
    /// Monotonic partition ticket counter serializing lookback order.
    bump: wgpu::Buffer,

    aligned_size: u32,
    partitions: u32,
}

impl ChainedScanDecoupledLookback {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("CSDL Scan Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/scan_csdl.wgsl").into()),
        });

        let entry = |binding, ty| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        };
        let uniform = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let storage = |read_only| wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        };

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("CSDL Layout"),
                entries: &[
                    entry(0, uniform),
                    entry(1, storage(true)),  // scan in
                    entry(2, storage(false)), // scan out
                    entry(3, storage(false)), // partition reductions
                    entry(4, storage(false)), // ticket bump
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("CSDL Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let init_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("CSDL Init Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("init_scan"),
            compilation_options: Default::default(),
            cache: None,
        });

        let scan_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("CSDL Exclusive Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("scan_exclusive"),
            compilation_options: Default::default(),
            cache: None,
        });

        let info = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("CSDL Info Buffer"),
            contents: bytemuck::cast_slice(&[ScanInfo {
                vectorized_size: 1,
                partitions: 1,
                _pad0: 0,
                _pad1: 0,
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bump = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("CSDL Ticket Buffer"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        // Minimal placeholder allocation; resize() establishes real capacity.
        let (scan_in, scan_out, reductions) = Self::allocate(device, 4, 1);
        let bind_group = Self::make_bind_group(
            device,
            &bind_group_layout,
            &info,
            &scan_in,
            &scan_out,
            &reductions,
            &bump,
        );

        Self {
            init_pipeline,
            scan_pipeline,
            bind_group_layout,
            bind_group,
            info,
            scan_in,
            scan_out,
            reductions,
            bump,
            aligned_size: 4,
            partitions: 1,
        }
    }

    fn allocate(
        device: &wgpu::Device,
        aligned: u32,
        partitions: u32,
    ) -> (wgpu::Buffer, wgpu::Buffer, wgpu::Buffer) {
        let buffer = |label: &str, elems: u32, extra: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: elems as u64 * std::mem::size_of::<u32>() as u64,
                usage: wgpu::BufferUsages::STORAGE | extra,
                mapped_at_creation: false,
            })
        };
        (
            buffer("CSDL Scan In", aligned, wgpu::BufferUsages::COPY_DST),
            buffer("CSDL Scan Out", aligned, wgpu::BufferUsages::COPY_SRC),
            buffer("CSDL Partition Reductions", partitions, wgpu::BufferUsages::empty()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn make_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        info: &wgpu::Buffer,
        scan_in: &wgpu::Buffer,
        scan_out: &wgpu::Buffer,
        reductions: &wgpu::Buffer,
        bump: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CSDL Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: scan_in.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scan_out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: reductions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: bump.as_entire_binding(),
                },
            ],
        })
    }
}

impl PrefixScan for ChainedScanDecoupledLookback {
    fn resize(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        size: u32,
    ) -> Result<(), PipelineError> {
        check_capacity(size)?;

        let aligned = align4(size).max(4);
        let partitions = partition_count(aligned);

        if aligned != self.aligned_size {
            log::debug!(
                "scan capacity change: {} -> {} elements, {} partitions",
                self.aligned_size,
                aligned,
                partitions
            );
            let (scan_in, scan_out, reductions) = Self::allocate(device, aligned, partitions);
            self.scan_in = scan_in;
            self.scan_out = scan_out;
            self.reductions = reductions;
            self.bind_group = Self::make_bind_group(
                device,
                &self.bind_group_layout,
                &self.info,
                &self.scan_in,
                &self.scan_out,
                &self.reductions,
                &self.bump,
            );
            self.aligned_size = aligned;
            self.partitions = partitions;
        }

        queue.write_buffer(
            &self.info,
            0,
            bytemuck::cast_slice(&[ScanInfo {
                vectorized_size: aligned / 4,
                partitions,
                _pad0: 0,
                _pad1: 0,
            }]),
        );
        Ok(())
    }

    fn record(&self, encoder: &mut wgpu::CommandEncoder) {
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("CSDL Init Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.init_pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.partitions.div_ceil(256), 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("CSDL Exclusive Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.scan_pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.partitions, 1, 1);
        }
    }

    fn input(&self) -> &wgpu::Buffer {
        &self.scan_in
    }

    fn output(&self) -> &wgpu::Buffer {
        &self.scan_out
    }
}

#[cfg(test)]
mod tests {
    use crate::scan::PARTITION_SIZE;

    #[test]
    fn partition_size_is_workgroup_times_vec4() {
        assert_eq!(PARTITION_SIZE, 256 * 4);
    }
}
