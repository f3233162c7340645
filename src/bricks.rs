//! Brick geometry: per-surface-cell AABBs and the pooled voxel volume.
//!
//! Every surface cell is subdivided into a fixed number of bricks. Each
//! brick gets one world-space AABB (ray-tracing leaf geometry) and one
//! voxel sub-volume in a single shared 3D texture, the brick pool.

use bytemuck::{Pod, Zeroable};
use glam::UVec3;
use wgpu::util::DeviceExt;

use crate::config::PipelineConfig;
use crate::grid::GridBuffers;
use crate::particles::ParticleSystem;
use crate::scan::PrefixScan;

/// Hard ceiling on live bricks per frame. A demand above this is a
/// configuration problem (world too finely subdivided), not something to
/// absorb by allocating unboundedly.
pub const MAX_BRICKS: u32 = 1 << 21;

/// One ray-tracing leaf bounding box (must match shaders).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Per-frame brick parameters (must match shaders).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BrickParams {
    bricks_count: u32,
    pool_bricks: [u32; 3],
}

fn iceil_cbrt(n: u64) -> u32 {
    let mut c = (n as f64).cbrt() as u64;
    while c.pow(3) < n {
        c += 1;
    }
    while c > 1 && (c - 1).pow(3) >= n {
        c -= 1;
    }
    c as u32
}

fn iceil_sqrt(n: u64) -> u32 {
    let mut s = (n as f64).sqrt() as u64;
    while s * s < n {
        s += 1;
    }
    while s > 1 && (s - 1) * (s - 1) >= n {
        s -= 1;
    }
    s as u32
}

/// Pick brick-pool dimensions `(x, y, z)` with `x*y*z >= bricks`.
///
/// Greedy search: start at `x = ceil(cbrt(bricks))` and walk x downward;
/// for each x take `y = ceil(sqrt(ceil(bricks/x)))` and
/// `z = ceil(ceil(bricks/x) / y)`, accepting the first triple that covers
/// the target. Falls back to the rounded-up cube if the walk exhausts.
/// The tie-break (prefer the first, largest-to-smallest x) is part of the
/// contract; callers rely on reproducible packing.
pub fn find_brick_pool_dims(bricks: u32) -> UVec3 {
    if bricks == 0 {
        return UVec3::ONE;
    }
    let b = bricks as u64;
    let cbrt = iceil_cbrt(b);
    let mut x = cbrt.max(1);
    while x >= 1 {
        let per_slab = b.div_ceil(x as u64);
        let y = iceil_sqrt(per_slab).max(1);
        let z = per_slab.div_ceil(y as u64) as u32;
        if (x as u64) * (y as u64) * (z as u64) >= b {
            return UVec3::new(x, y, z);
        }
        x -= 1;
    }
    UVec3::splat(cbrt)
}

/// Flat brick index -> 3D slot in the pool, row-major x, then y, then z.
pub fn brick_slot(index: u32, pool_bricks: UVec3) -> UVec3 {
    let xy = pool_bricks.x * pool_bricks.y;
    UVec3::new(
        index % pool_bricks.x,
        (index % xy) / pool_bricks.x,
        index / xy,
    )
}

/// Emits one AABB per brick of every surface cell.
pub struct AabbGenerator {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
    params: wgpu::Buffer,
    grid_params: wgpu::Buffer,
    surface_cell_indices: wgpu::Buffer,
}

impl AabbGenerator {
    pub fn new(device: &wgpu::Device, buffers: &GridBuffers) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("AABB Generation Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/aabb_gen.wgsl").into()),
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
                label: Some("AABB Generation Layout"),
                entries: &[
                    entry(0, uniform),        // grid params
                    entry(1, uniform),        // brick params
                    entry(2, storage(true)),  // surface cell indices
                    entry(3, storage(false)), // aabb buffer
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("AABB Generation Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("AABB Generation Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("generate_aabbs"),
            compilation_options: Default::default(),
            cache: None,
        });

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("AABB Brick Params Buffer"),
            contents: bytemuck::cast_slice(&[BrickParams {
                bricks_count: 0,
                pool_bricks: [1; 3],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            pipeline,
            bind_group_layout,
            bind_group: None,
            params,
            grid_params: buffers.params.clone(),
            surface_cell_indices: buffers.surface_cell_indices.clone(),
        }
    }

    /// Rebuild the bind group against a (re)allocated AABB buffer.
    pub fn rebind(&mut self, device: &wgpu::Device, aabb_buffer: &wgpu::Buffer) {
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("AABB Generation Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.grid_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.surface_cell_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: aabb_buffer.as_entire_binding(),
                },
            ],
        }));
    }

    /// One thread per brick. The AABB buffer must already have capacity
    /// for `bricks_count` entries.
    pub fn record(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        bricks_count: u32,
    ) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };
        if bricks_count == 0 {
            return;
        }
        queue.write_buffer(
            &self.params,
            0,
            bytemuck::cast_slice(&[BrickParams {
                bricks_count,
                pool_bricks: [1; 3],
            }]),
        );
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("AABB Generation Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(bricks_count.div_ceil(64), 1, 1);
    }
}

/// The pooled voxel volume backing all bricks.
///
/// Grow-only within a run: the texture is reallocated only when the brick
/// demand exceeds the current capacity, never shrunk.
pub struct BrickPool {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    pool_bricks: UVec3,
    max_bricks_count: u32,
    voxels_per_brick_axis: u32,

    fill_pipeline: wgpu::ComputePipeline,
    fill_bind_group_layout: wgpu::BindGroupLayout,
    fill_bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
    grid_params: wgpu::Buffer,
    cell_counts: wgpu::Buffer,
    cell_offsets: wgpu::Buffer,
    ordered_particles: wgpu::Buffer,
    surface_cell_indices: wgpu::Buffer,
}

impl BrickPool {
    pub fn new(
        device: &wgpu::Device,
        config: &PipelineConfig,
        buffers: &GridBuffers,
        particles: &ParticleSystem,
        scan: &dyn PrefixScan,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Brick Pool Fill Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/brick_pool.wgsl").into()),
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
        let storage_ro = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        };

        let fill_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Brick Pool Fill Layout"),
                entries: &[
                    entry(0, uniform),    // grid params
                    entry(1, uniform),    // brick params
                    entry(2, storage_ro), // cell counts
                    entry(3, storage_ro), // cell offsets (scan output)
                    entry(4, storage_ro), // ordered particles
                    entry(5, storage_ro), // surface cell indices
                    entry(
                        6,
                        wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: wgpu::TextureFormat::R32Float,
                            view_dimension: wgpu::TextureViewDimension::D3,
                        },
                    ),
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Brick Pool Fill Pipeline Layout"),
            bind_group_layouts: &[&fill_bind_group_layout],
            push_constant_ranges: &[],
        });

        let fill_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Brick Pool Fill Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("fill_bricks"),
            compilation_options: Default::default(),
            cache: None,
        });

        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Brick Pool Params Buffer"),
            contents: bytemuck::cast_slice(&[BrickParams {
                bricks_count: 0,
                pool_bricks: [1; 3],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let pool_bricks = UVec3::ONE;
        let (texture, view) =
            Self::allocate_texture(device, pool_bricks, config.voxels_per_brick_axis);

        let fill_bind_group = Self::make_fill_bind_group(
            device,
            &fill_bind_group_layout,
            &buffers.params,
            &params,
            &buffers.cell_counts,
            scan.output(),
            &particles.ordered,
            &buffers.surface_cell_indices,
            &view,
        );

        Self {
            texture,
            view,
            pool_bricks,
            max_bricks_count: 1,
            voxels_per_brick_axis: config.voxels_per_brick_axis,
            fill_pipeline,
            fill_bind_group_layout,
            fill_bind_group,
            params,
            grid_params: buffers.params.clone(),
            cell_counts: buffers.cell_counts.clone(),
            cell_offsets: scan.output().clone(),
            ordered_particles: particles.ordered.clone(),
            surface_cell_indices: buffers.surface_cell_indices.clone(),
        }
    }

    fn allocate_texture(
        device: &wgpu::Device,
        pool_bricks: UVec3,
        voxels_per_brick_axis: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let voxels = pool_bricks * voxels_per_brick_axis;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Brick Pool Texture"),
            size: wgpu::Extent3d {
                width: voxels.x,
                height: voxels.y,
                depth_or_array_layers: voxels.z,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    #[allow(clippy::too_many_arguments)]
    fn make_fill_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        grid_params: &wgpu::Buffer,
        params: &wgpu::Buffer,
        cell_counts: &wgpu::Buffer,
        cell_offsets: &wgpu::Buffer,
        ordered: &wgpu::Buffer,
        surface_cells: &wgpu::Buffer,
        view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Brick Pool Fill Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: grid_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: cell_counts.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: cell_offsets.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: ordered.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: surface_cells.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(view),
                },
            ],
        })
    }

    /// Grow the pool if `bricks_count` exceeds the current capacity.
    /// Returns true when the texture was reallocated.
    pub fn ensure_capacity(&mut self, device: &wgpu::Device, bricks_count: u32) -> bool {
        if bricks_count <= self.max_bricks_count {
            return false;
        }
        let dims = find_brick_pool_dims(bricks_count);
        log::info!(
            "brick pool grows: {} -> {} bricks, pool {}x{}x{}",
            self.max_bricks_count,
            bricks_count,
            dims.x,
            dims.y,
            dims.z
        );
        let (texture, view) = Self::allocate_texture(device, dims, self.voxels_per_brick_axis);
        self.texture = texture;
        self.view = view;
        self.pool_bricks = dims;
        self.max_bricks_count = dims.x * dims.y * dims.z;
        self.fill_bind_group = Self::make_fill_bind_group(
            device,
            &self.fill_bind_group_layout,
            &self.grid_params,
            &self.params,
            &self.cell_counts,
            &self.cell_offsets,
            &self.ordered_particles,
            &self.surface_cell_indices,
            &self.view,
        );
        true
    }

    /// Write every brick's voxel SDF. One thread per voxel of the live
    /// portion of the pool.
    pub fn record_fill(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        bricks_count: u32,
    ) {
        if bricks_count == 0 {
            return;
        }
        queue.write_buffer(
            &self.params,
            0,
            bytemuck::cast_slice(&[BrickParams {
                bricks_count,
                pool_bricks: self.pool_bricks.to_array(),
            }]),
        );
        let voxels = self.pool_bricks * self.voxels_per_brick_axis;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Brick Pool Fill Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.fill_pipeline);
        pass.set_bind_group(0, &self.fill_bind_group, &[]);
        pass.dispatch_workgroups(
            voxels.x.div_ceil(4),
            voxels.y.div_ceil(4),
            voxels.z.div_ceil(4),
        );
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn max_bricks_count(&self) -> u32 {
        self.max_bricks_count
    }

    pub fn pool_bricks(&self) -> UVec3 {
        self.pool_bricks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct transcription of the documented heuristic, kept separate so
    /// the production code can be checked against it.
    fn reference_dims(bricks: u32) -> UVec3 {
        if bricks == 0 {
            return UVec3::ONE;
        }
        let b = bricks as f64;
        // Anchor on the exact integer cube root; libm cbrt may round a
        // perfect cube across the ceil boundary.
        let start = iceil_cbrt(bricks as u64);
        for x in (1..=start.max(1)).rev() {
            let per_slab = (b / x as f64).ceil();
            let y = per_slab.sqrt().ceil() as u32;
            let z = (per_slab / y as f64).ceil() as u32;
            if x as u64 * y as u64 * z as u64 >= bricks as u64 {
                return UVec3::new(x, y, z);
            }
        }
        UVec3::splat(start)
    }

    #[test]
    fn packing_always_covers_target() {
        for b in [1u32, 2, 3, 7, 8, 9, 63, 64, 65, 511, 512, 1000, 4096, 32768] {
            let d = find_brick_pool_dims(b);
            assert!(
                d.x as u64 * d.y as u64 * d.z as u64 >= b as u64,
                "{b}: {d:?}"
            );
        }
    }

    #[test]
    fn packing_matches_documented_heuristic() {
        for b in 1..=2048 {
            assert_eq!(find_brick_pool_dims(b), reference_dims(b), "b = {b}");
        }
    }

    #[test]
    fn perfect_cubes_pack_exactly() {
        assert_eq!(find_brick_pool_dims(8), UVec3::new(2, 2, 2));
        assert_eq!(find_brick_pool_dims(64), UVec3::new(4, 4, 4));
        assert_eq!(find_brick_pool_dims(512), UVec3::new(8, 8, 8));
    }

    #[test]
    fn zero_bricks_degenerates_to_unit_pool() {
        assert_eq!(find_brick_pool_dims(0), UVec3::ONE);
    }

    #[test]
    fn brick_slot_round_trip() {
        let pool = UVec3::new(3, 4, 5);
        for i in 0..60 {
            let s = brick_slot(i, pool);
            assert!(s.cmplt(pool).all());
            assert_eq!(s.x + s.y * pool.x + s.z * pool.x * pool.y, i);
        }
    }

    #[test]
    fn aabb_record_is_24_bytes() {
        // Matches the six-float ray-tracing AABB layout.
        assert_eq!(std::mem::size_of::<Aabb>(), 24);
    }
}
