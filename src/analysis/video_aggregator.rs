// src/analysis/video_aggregator.rs
//
// Per-video driver for the following-distance engine.
//
// Signal flow per sampled frame:
//   Detections → LaneContainmentFilter → DistanceEstimator → TrackState
//                                                              │
//                      danger_confirmed / positive_confirmed ◀─┘
//                      per-second danger log
//
// One aggregator per video. Frames must arrive in time order; the EMA and
// the persistence counters depend on it.

use super::distance_estimator::{DistanceEstimate, DistanceEstimator};
use super::lane_filter::LaneContainmentFilter;
use super::track_state::{TrackState, TrackTransition};
use crate::pipeline::{EventBus, RiskEvent};
use crate::types::{
    AnalysisLogs, AnalysisReport, Config, DangerSecond, Detection, StalePolicy, StreamHeader,
    ThresholdConfig, TrackingConfig, Verdict,
};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

const MAX_PENDING_EVENTS: usize = 256;

/// Tolerance for `persistence / period` landing a hair above an integer
const LIMIT_EPSILON: f64 = 1e-9;

/// Longest stream (s) the per-second log will grow to cover
pub const MAX_STREAM_SECONDS: f64 = 24.0 * 3600.0;

// ============================================================================
// STREAM-RESOLVED PARAMETERS
// ============================================================================

/// Values fixed once per stream from the config and the stream header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    pub fps: f64,
    pub frame_w: f64,
    pub frame_h: f64,
    pub frame_skip: u32,
    pub hfov_deg: f64,
    /// Wall time between sampled frames (s)
    pub sample_period: f64,
    /// Consecutive danger frames needed to confirm
    pub danger_limit: u32,
}

impl EngineParams {
    pub fn resolve(config: &Config, header: &StreamHeader) -> Result<Self> {
        if header.width == 0 || header.height == 0 {
            bail!(
                "stream has degenerate frame size {}x{}",
                header.width,
                header.height
            );
        }

        let fps = if header.fps.is_finite() && header.fps > 0.0 {
            header.fps
        } else {
            warn!(
                "Stream reports fps={}, falling back to {:.1}",
                header.fps, config.sampling.fallback_fps
            );
            config.sampling.fallback_fps
        };

        let frame_w = header.width as f64;
        let frame_h = header.height as f64;
        let geometry = &config.geometry;
        let hfov_deg = if geometry.hfov_auto {
            if frame_w / frame_h > geometry.wide_aspect_ratio {
                geometry.hfov_wide_deg
            } else {
                geometry.hfov_narrow_deg
            }
        } else {
            geometry.hfov_deg
        };

        let frame_skip = config.sampling.frame_skip;
        let sample_period = frame_skip as f64 / fps;
        let danger_limit =
            danger_limit_frames(config.thresholds.danger_persistence_sec, sample_period);

        Ok(Self {
            fps,
            frame_w,
            frame_h,
            frame_skip,
            hfov_deg,
            sample_period,
            danger_limit,
        })
    }

    /// Timestamp (s) of a 1-based source frame index
    pub fn timestamp_of(&self, frame_index: u64) -> f64 {
        frame_index as f64 / self.fps
    }

    /// False for frame indices whose timestamp lies past `MAX_STREAM_SECONDS`.
    pub fn within_stream_horizon(&self, frame_index: u64) -> bool {
        let ts = self.timestamp_of(frame_index);
        ts.is_finite() && ts <= MAX_STREAM_SECONDS
    }

    pub fn is_sampled(&self, frame_index: u64) -> bool {
        frame_index % self.frame_skip as u64 == 0
    }
}

/// `ceil(persistence / period)`, at least one frame.
pub fn danger_limit_frames(persistence_sec: f64, sample_period: f64) -> u32 {
    if sample_period <= 0.0 {
        return 1;
    }
    let frames = (persistence_sec / sample_period - LIMIT_EPSILON).ceil();
    frames.max(1.0) as u32
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// What happened to one frame's detections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub detections: usize,
    pub lane_contained: usize,
    pub degenerate: usize,
    pub evicted: usize,
    pub danger_confirmations: usize,
    pub recovery_confirmations: usize,
}

pub struct VideoAggregator {
    params: EngineParams,
    thresholds: ThresholdConfig,
    tracking: TrackingConfig,
    lane_filter: LaneContainmentFilter,
    estimator: DistanceEstimator,
    tracks: HashMap<i64, TrackState>,
    danger_confirmed: bool,
    positive_confirmed: bool,
    danger_log: Vec<bool>,
    sampled_frames: u64,
    events: EventBus,
}

impl VideoAggregator {
    pub fn new(config: &Config, header: &StreamHeader) -> Result<Self> {
        config.validate()?;
        let params = EngineParams::resolve(config, header)?;

        info!(
            "🎥 Stream {}x{} @ {:.1} FPS → hfov={:.0}°, sample every {:.3}s, danger after {} frames",
            header.width,
            header.height,
            params.fps,
            params.hfov_deg,
            params.sample_period,
            params.danger_limit
        );

        Ok(Self {
            params,
            thresholds: config.thresholds.clone(),
            tracking: config.tracking.clone(),
            lane_filter: LaneContainmentFilter::new(config.lane.clone()),
            estimator: DistanceEstimator::new(
                &config.geometry,
                &config.smoothing,
                params.hfov_deg,
            ),
            tracks: HashMap::new(),
            danger_confirmed: false,
            positive_confirmed: false,
            danger_log: Vec::new(),
            sampled_frames: 0,
            events: EventBus::new(MAX_PENDING_EVENTS),
        })
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Convenience for sources that count frames: derives timestamp and dt.
    pub fn process_source_frame(
        &mut self,
        frame_index: u64,
        detections: &[Detection],
    ) -> FrameSummary {
        let timestamp = self.params.timestamp_of(frame_index);
        let dt = self.params.sample_period;
        self.process_frame(timestamp, dt, detections)
    }

    /// Fold one sampled frame into the engine.
    pub fn process_frame(
        &mut self,
        timestamp: f64,
        dt: f64,
        detections: &[Detection],
    ) -> FrameSummary {
        self.sampled_frames += 1;
        let mut summary = FrameSummary {
            detections: detections.len(),
            ..FrameSummary::default()
        };
        let mut observed: HashSet<i64> = HashSet::with_capacity(detections.len());

        for det in detections {
            if !self.lane_filter.contains(
                det.x,
                det.bottom_y(),
                det.w,
                self.params.frame_w,
                self.params.frame_h,
            ) {
                continue;
            }
            summary.lane_contained += 1;
            observed.insert(det.track_id);

            let track = self
                .tracks
                .entry(det.track_id)
                .or_insert_with(|| TrackState::new(det.track_id));

            let estimate = self.estimator.estimate(
                det.w,
                self.params.frame_w,
                track.last_distance(),
                track.last_speed(),
                dt,
            );
            if estimate.degenerate {
                summary.degenerate += 1;
                debug!(
                    "Track {} has degenerate geometry (w={:.1}px), using 0m sentinel",
                    det.track_id, det.w
                );
            }

            let transition = track.observe(estimate, &self.thresholds, self.params.danger_limit);
            debug!(
                "Track {} t={:.2}s d={:.1}m v={:.2}m/s run={} status={}",
                det.track_id,
                timestamp,
                estimate.distance_m,
                estimate.closing_speed_mps,
                track.danger_frames(),
                track.status(&self.thresholds).as_str()
            );

            let min_distance_m = track.min_distance();
            self.apply_transition(
                det.track_id,
                timestamp,
                estimate,
                min_distance_m,
                transition,
                &mut summary,
            );
        }

        summary.evicted = match self.tracking.stale_policy {
            StalePolicy::EmptyFrame if detections.is_empty() => self.age_tracks(timestamp, None),
            StalePolicy::EmptyFrame => 0,
            StalePolicy::PerTrack => self.age_tracks(timestamp, Some(&observed)),
        };

        summary
    }

    fn apply_transition(
        &mut self,
        track_id: i64,
        timestamp: f64,
        estimate: DistanceEstimate,
        min_distance_m: f64,
        transition: TrackTransition,
        summary: &mut FrameSummary,
    ) {
        let distance_m = estimate.distance_m;
        if transition.in_danger {
            self.mark_danger_second(timestamp);
        }

        if transition.danger_confirmed {
            if !self.danger_confirmed {
                info!(
                    "🚨 Danger confirmed: track {} at {:.1}m ({:.2}s)",
                    track_id, distance_m, timestamp
                );
            }
            self.danger_confirmed = true;
        }
        if transition.danger_newly_confirmed {
            summary.danger_confirmations += 1;
            self.events.publish(RiskEvent::DangerConfirmed {
                track_id,
                timestamp,
                distance_m,
                closing_speed_mps: estimate.closing_speed_mps,
            });
        }

        if transition.recovered {
            if !self.positive_confirmed {
                info!(
                    "✅ Recovery confirmed: track {} backed off {:.1}m → {:.1}m ({:.2}s)",
                    track_id, min_distance_m, distance_m, timestamp
                );
            }
            self.positive_confirmed = true;
        }
        if transition.recovery_newly_confirmed {
            summary.recovery_confirmations += 1;
            self.events.publish(RiskEvent::RecoveryConfirmed {
                track_id,
                timestamp,
                min_distance_m,
                distance_m,
            });
        }
    }

    /// Age every track not in `observed` (all tracks when `None`) and drop
    /// the ones past the grace window. Returns the number evicted.
    fn age_tracks(&mut self, timestamp: f64, observed: Option<&HashSet<i64>>) -> usize {
        let grace = self.tracking.stale_grace_frames;
        let mut expired: Vec<(i64, u32)> = Vec::new();

        for (id, track) in self.tracks.iter_mut() {
            if observed.is_some_and(|seen| seen.contains(id)) {
                continue;
            }
            if track.mark_stale(grace) {
                expired.push((*id, track.stale_frames()));
            }
        }
        expired.sort_unstable();

        for (track_id, stale_frames) in &expired {
            self.tracks.remove(track_id);
            debug!(
                "🗑️  Track {} evicted after {} stale frames",
                track_id, stale_frames
            );
            self.events.publish(RiskEvent::TrackEvicted {
                track_id: *track_id,
                timestamp,
                stale_frames: *stale_frames,
            });
        }
        expired.len()
    }

    fn mark_danger_second(&mut self, timestamp: f64) {
        if !(timestamp.is_finite() && timestamp <= MAX_STREAM_SECONDS) {
            warn!(
                "Timestamp {}s outside the {}s stream horizon, not logged",
                timestamp, MAX_STREAM_SECONDS
            );
            return;
        }
        let second = timestamp.max(0.0).floor() as usize;
        if self.danger_log.len() <= second {
            self.danger_log.resize(second + 1, false);
        }
        self.danger_log[second] = true;
    }

    /// Danger beats a later recovery.
    pub fn verdict(&self) -> Verdict {
        if self.danger_confirmed {
            Verdict::Danger
        } else if self.positive_confirmed {
            Verdict::Positive
        } else {
            Verdict::Safe
        }
    }

    pub fn is_danger_confirmed(&self) -> bool {
        self.danger_confirmed
    }

    pub fn is_positive_confirmed(&self) -> bool {
        self.positive_confirmed
    }

    /// Index = second, value = a danger frame was seen in that second
    pub fn danger_log(&self) -> &[bool] {
        &self.danger_log
    }

    pub fn duration_seconds(&self) -> usize {
        self.danger_log.len()
    }

    pub fn sampled_frames(&self) -> u64 {
        self.sampled_frames
    }

    pub fn track(&self, track_id: i64) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn drain_events(&mut self) -> Vec<RiskEvent> {
        self.events.drain()
    }

    pub fn report(&self) -> AnalysisReport {
        AnalysisReport {
            status: self.verdict(),
            fps: self.params.fps,
            logs: AnalysisLogs {
                following_distance: self
                    .danger_log
                    .iter()
                    .map(|&is_detected| DangerSecond { is_detected })
                    .collect(),
            },
            video_duration_seconds: self.duration_seconds(),
        }
    }
}
