fn main() {
    // Rebuild if compute kernels change
    println!("cargo:rerun-if-changed=shaders/particles.wgsl");
    println!("cargo:rerun-if-changed=shaders/grid_build.wgsl");
    println!("cargo:rerun-if-changed=shaders/classify.wgsl");
    println!("cargo:rerun-if-changed=shaders/scan_csdl.wgsl");
    println!("cargo:rerun-if-changed=shaders/reorder.wgsl");
    println!("cargo:rerun-if-changed=shaders/aabb_gen.wgsl");
    println!("cargo:rerun-if-changed=shaders/brick_pool.wgsl");
    println!("cargo:rerun-if-changed=shaders/accel_build.wgsl");
    println!("cargo:rerun-if-changed=shaders/simple_sdf.wgsl");
}
