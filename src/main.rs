//! Headless driver for the surfacing pipeline.
//!
//! Runs a number of frames against the first available adapter and logs
//! per-frame surface statistics. An optional RON config path overrides
//! the defaults:
//!
//! ```text
//! brickfield [config.ron] [frames]
//! ```

use brickfield::config::PipelineConfig;
use brickfield::gpu::GpuContext;
use brickfield::pipeline::SurfacePipeline;

fn load_config(path: &str) -> PipelineConfig {
    match std::fs::read_to_string(path) {
        Ok(text) => match ron::from_str(&text) {
            Ok(config) => {
                log::info!("loaded config from {path}");
                config
            }
            Err(err) => {
                log::warn!("failed to parse {path}: {err}, using defaults");
                PipelineConfig::default()
            }
        },
        Err(err) => {
            log::warn!("failed to read {path}: {err}, using defaults");
            PipelineConfig::default()
        }
    }
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => load_config(&path),
        None => PipelineConfig::default(),
    };
    let frames: u64 = args
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(120);

    let ctx = match GpuContext::new() {
        Ok(ctx) => ctx,
        Err(err) => {
            log::error!("gpu init failed: {err}");
            std::process::exit(1);
        }
    };

    let mut pipeline = match SurfacePipeline::new(&ctx, config) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            log::error!("pipeline init failed: {err}");
            std::process::exit(1);
        }
    };

    let dt = 1.0 / 60.0;
    for _ in 0..frames {
        match pipeline.frame(&ctx, dt) {
            Ok(report) => {
                log::info!(
                    "frame {}: {} surface blocks, {} surface cells, {} bricks{} ({:.2} ms classify, {:.2} ms finalize)",
                    report.frame_index,
                    report.surface_blocks,
                    report.surface_cells,
                    report.bricks_count,
                    if report.rebuilt { ", rebuilt" } else { "" },
                    report.classify_ms,
                    report.finalize_ms,
                );
            }
            Err(err) => {
                log::error!("frame failed: {err}");
                std::process::exit(1);
            }
        }
    }

    log::info!(
        "done: {} frames, structure built: {}",
        frames,
        pipeline.is_structure_built()
    );
}
