// src/main.rs

use anyhow::Result;
use following_distance::pipeline::AnalysisMetrics;
use following_distance::types::Config;
use following_distance::video_processor::VideoProcessor;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚗 Following Distance Analysis Starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Thresholds: danger={:.1}m warn={:.1}m persistence={:.2}s recovery={:.1}m skip={}",
        config.thresholds.dist_danger_m,
        config.thresholds.dist_warn_m,
        config.thresholds.danger_persistence_sec,
        config.thresholds.recovery_threshold_m,
        config.sampling.frame_skip
    );

    let processor = VideoProcessor::new(config.clone(), AnalysisMetrics::new());
    let logs = processor.find_detection_logs()?;

    if logs.is_empty() {
        error!("No detection logs found in {}", config.video.input_dir);
        return Ok(());
    }

    for (idx, path) in logs.iter().enumerate() {
        info!("Processing {}/{}: {}", idx + 1, logs.len(), path.display());

        // One bad log must not stop the batch
        match processor.process_log(path) {
            Ok(outcome) => match processor.write_outcome(&outcome) {
                Ok(report_path) => info!("  Report written to {}", report_path.display()),
                Err(e) => error!("  Failed to write report for {}: {:#}", outcome.name, e),
            },
            Err(e) => error!("  Failed to analyze {}: {:#}", path.display(), e),
        }
    }

    let summary = processor.metrics().summary();
    info!(
        "Done: {} videos ({} danger, {} positive, {} safe), {} sampled frames in {:.1}s",
        summary.videos_processed,
        summary.danger_videos,
        summary.positive_videos,
        summary.safe_videos,
        summary.sampled_frames,
        summary.elapsed_secs
    );
    info!("Metrics: {}", serde_json::to_string(&summary)?);

    Ok(())
}
