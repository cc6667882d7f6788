// src/pipeline/metrics.rs
//
// Counters for a batch run. Cheap to clone and share between workers,
// each video still owns its own engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AnalysisMetrics {
    pub videos_processed: Arc<AtomicU64>,
    pub source_frames: Arc<AtomicU64>,
    pub sampled_frames: Arc<AtomicU64>,
    pub detections_seen: Arc<AtomicU64>,
    pub lane_contained: Arc<AtomicU64>,
    pub degenerate_estimates: Arc<AtomicU64>,
    pub tracks_evicted: Arc<AtomicU64>,
    pub danger_events: Arc<AtomicU64>,
    pub recovery_events: Arc<AtomicU64>,
    pub danger_videos: Arc<AtomicU64>,
    pub positive_videos: Arc<AtomicU64>,
    pub safe_videos: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl AnalysisMetrics {
    pub fn new() -> Self {
        Self {
            videos_processed: Arc::new(AtomicU64::new(0)),
            source_frames: Arc::new(AtomicU64::new(0)),
            sampled_frames: Arc::new(AtomicU64::new(0)),
            detections_seen: Arc::new(AtomicU64::new(0)),
            lane_contained: Arc::new(AtomicU64::new(0)),
            degenerate_estimates: Arc::new(AtomicU64::new(0)),
            tracks_evicted: Arc::new(AtomicU64::new(0)),
            danger_events: Arc::new(AtomicU64::new(0)),
            recovery_events: Arc::new(AtomicU64::new(0)),
            danger_videos: Arc::new(AtomicU64::new(0)),
            positive_videos: Arc::new(AtomicU64::new(0)),
            safe_videos: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn frames_per_sec(&self) -> f64 {
        let frames = self.sampled_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            videos_processed: self.videos_processed.load(Ordering::Relaxed),
            source_frames: self.source_frames.load(Ordering::Relaxed),
            sampled_frames: self.sampled_frames.load(Ordering::Relaxed),
            detections_seen: self.detections_seen.load(Ordering::Relaxed),
            lane_contained: self.lane_contained.load(Ordering::Relaxed),
            degenerate_estimates: self.degenerate_estimates.load(Ordering::Relaxed),
            tracks_evicted: self.tracks_evicted.load(Ordering::Relaxed),
            danger_events: self.danger_events.load(Ordering::Relaxed),
            recovery_events: self.recovery_events.load(Ordering::Relaxed),
            danger_videos: self.danger_videos.load(Ordering::Relaxed),
            positive_videos: self.positive_videos.load(Ordering::Relaxed),
            safe_videos: self.safe_videos.load(Ordering::Relaxed),
            frames_per_sec: self.frames_per_sec(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for AnalysisMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub videos_processed: u64,
    pub source_frames: u64,
    pub sampled_frames: u64,
    pub detections_seen: u64,
    pub lane_contained: u64,
    pub degenerate_estimates: u64,
    pub tracks_evicted: u64,
    pub danger_events: u64,
    pub recovery_events: u64,
    pub danger_videos: u64,
    pub positive_videos: u64,
    pub safe_videos: u64,
    pub frames_per_sec: f64,
    pub elapsed_secs: f64,
}
