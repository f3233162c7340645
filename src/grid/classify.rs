//! Surface classification: which blocks and cells sit on the occupied /
//! unoccupied frontier of the particle distribution.
//!
//! Two dispatches. The block pass runs one thread per block and appends
//! qualifying block ids. The cell pass runs one workgroup per *surface*
//! block, so its dispatch count is the block count read back on the host
//! between the two passes. Append order is whatever the atomics resolve;
//! nothing downstream may depend on it.

use crate::grid::GridBuffers;

pub struct SurfaceClassifier {
    block_pipeline: wgpu::ComputePipeline,
    cell_pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    block_count: u32,
}

impl SurfaceClassifier {
    pub fn new(device: &wgpu::Device, buffers: &GridBuffers, block_count: u32) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Surface Classify Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/classify.wgsl").into()),
        });

        let storage_rw = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let storage_ro = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let uniform = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        };

        let entry = |binding, ty| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        };

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Surface Classify Layout"),
                entries: &[
                    entry(0, uniform),            // grid params
                    entry(1, storage_ro),         // cell counts
                    entry(2, storage_ro),         // block counts
                    entry(3, storage_rw),         // surface block indices
                    entry(4, storage_rw),         // surface cell indices
                    entry(5, storage_rw),         // surface counts
                ],
            });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Surface Classify Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.cell_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.block_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.surface_block_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffers.surface_cell_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: buffers.surface_counts.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Surface Classify Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let block_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Block Classify Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("classify_blocks"),
            compilation_options: Default::default(),
            cache: None,
        });

        let cell_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Cell Classify Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("classify_cells"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            block_pipeline,
            cell_pipeline,
            bind_group,
            block_count,
        }
    }

    /// Block-granularity frontier test over the whole grid.
    pub fn record_block_pass(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Block Classify Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.block_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(self.block_count.div_ceil(64), 1, 1);
    }

    /// Cell-granularity frontier test, one workgroup per surface block.
    /// `surface_blocks` comes from the host readback after the block pass.
    pub fn record_cell_pass(&self, encoder: &mut wgpu::CommandEncoder, surface_blocks: u32) {
        if surface_blocks == 0 {
            return;
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Cell Classify Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.cell_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(surface_blocks, 1, 1);
    }
}

#[cfg(test)]
mod tests {
    //! CPU mirror of the frontier rule, exercised against the same layout
    //! math the kernels use.

    use glam::{IVec3, UVec3};

    use crate::config::{Connectivity, PipelineConfig};
    use crate::grid::{neighbor_offsets, GridLayout};

    /// Frontier test shared by both granularities: occupied, with at least
    /// one empty (or out-of-world) neighbor.
    fn is_surface(
        coord: UVec3,
        extent: UVec3,
        occupied: &dyn Fn(UVec3) -> bool,
        connectivity: Connectivity,
    ) -> bool {
        if !occupied(coord) {
            return false;
        }
        neighbor_offsets(connectivity).iter().any(|&delta| {
            let n = coord.as_ivec3() + delta;
            let outside = n.cmplt(IVec3::ZERO).any() || n.cmpge(extent.as_ivec3()).any();
            outside || !occupied(n.as_uvec3())
        })
    }

    fn occupancy_from_positions(layout: &GridLayout, positions: &[glam::Vec3]) -> Vec<u32> {
        let mut counts = vec![0u32; layout.cell_count() as usize];
        for &p in positions {
            counts[layout.cell_index(layout.cell_coord_of(p)) as usize] += 1;
        }
        counts
    }

    #[test]
    fn lone_occupied_cell_is_surface_under_both_rules() {
        let layout = GridLayout::new(&PipelineConfig::default());
        let counts = occupancy_from_positions(&layout, &[glam::Vec3::splat(0.53125)]);
        let occupied = |c: UVec3| counts[layout.cell_index(c) as usize] > 0;
        for conn in [Connectivity::Faces, Connectivity::FacesEdgesCorners] {
            assert!(is_surface(
                UVec3::splat(8),
                layout.cells_per_axis,
                &occupied,
                conn
            ));
        }
    }

    #[test]
    fn empty_cells_never_classify() {
        let layout = GridLayout::new(&PipelineConfig::default());
        let counts = vec![0u32; layout.cell_count() as usize];
        let occupied = |c: UVec3| counts[layout.cell_index(c) as usize] > 0;
        for idx in 0..layout.cell_count() {
            assert!(!is_surface(
                layout.cell_coord(idx),
                layout.cells_per_axis,
                &occupied,
                Connectivity::Faces
            ));
        }
    }

    #[test]
    fn interior_of_a_solid_region_is_not_surface() {
        let layout = GridLayout::new(&PipelineConfig::default());
        // Fully occupy a 3x3x3 cube of cells centered on (8,8,8).
        let occupied = |c: UVec3| {
            let d = c.as_ivec3() - IVec3::splat(8);
            d.abs().max_element() <= 1
        };
        assert!(!is_surface(
            UVec3::splat(8),
            layout.cells_per_axis,
            &occupied,
            Connectivity::FacesEdgesCorners
        ));
        // Under face-only connectivity the same center is also interior.
        assert!(!is_surface(
            UVec3::splat(8),
            layout.cells_per_axis,
            &occupied,
            Connectivity::Faces
        ));
        // A face of the cube is surface.
        assert!(is_surface(
            UVec3::new(7, 8, 8),
            layout.cells_per_axis,
            &occupied,
            Connectivity::Faces
        ));
    }

    #[test]
    fn world_boundary_counts_as_empty() {
        let layout = GridLayout::new(&PipelineConfig::default());
        // Occupy everything: only cells touching the world boundary remain
        // surface.
        let occupied = |_: UVec3| true;
        assert!(is_surface(
            UVec3::ZERO,
            layout.cells_per_axis,
            &occupied,
            Connectivity::Faces
        ));
        assert!(!is_surface(
            UVec3::splat(8),
            layout.cells_per_axis,
            &occupied,
            Connectivity::FacesEdgesCorners
        ));
    }

    #[test]
    fn diagonal_gap_distinguishes_connectivity_rules() {
        let layout = GridLayout::new(&PipelineConfig::default());
        // Occupy everything except the corner-diagonal neighbor of (8,8,8).
        let hole = UVec3::new(9, 9, 9);
        let occupied = |c: UVec3| c != hole;
        assert!(!is_surface(
            UVec3::splat(8),
            layout.cells_per_axis,
            &occupied,
            Connectivity::Faces
        ));
        assert!(is_surface(
            UVec3::splat(8),
            layout.cells_per_axis,
            &occupied,
            Connectivity::FacesEdgesCorners
        ));
    }
}
