// src/analysis/track_state.rs
//
// Per-track danger persistence and recovery state.
//
//   cold ──first estimate──▶ tracking
//                            ├─ danger run: consecutive frames below DIST_DANGER_M
//                            └─ warning zone: ever below DIST_WARN_M, tracks min distance
//
// A danger run confirms once it reaches the persistence frame limit. A track
// that entered the warning zone and then backed off by RECOVERY_THRESHOLD_M
// from its minimum counts as a recovery.

use super::distance_estimator::DistanceEstimate;
use crate::types::ThresholdConfig;

/// Minimum-distance placeholder before a track enters the warning zone
const NO_MIN_DISTANCE: f64 = 999.0;

/// Display classification of a track (what an overlay would paint)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Safe,
    Warning,
    Danger,
    Recovered,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Warning => "WARNING",
            Self::Danger => "DANGER",
            Self::Recovered => "RECOVERED",
        }
    }
}

/// What one observation did to a track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackTransition {
    /// Smoothed distance is below the danger threshold this frame
    pub in_danger: bool,
    /// Danger run is at or past the persistence limit
    pub danger_confirmed: bool,
    /// First frame on which this run reached the limit
    pub danger_newly_confirmed: bool,
    /// Recovery condition holds this frame
    pub recovered: bool,
    /// First recovery ever seen on this track
    pub recovery_newly_confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct TrackState {
    pub id: i64,
    last_distance: Option<f64>,
    last_speed: f64,
    min_distance: f64,
    danger_frames: u32,
    entered_warning: bool,
    recovery_done: bool,
    stale_frames: u32,
}

impl TrackState {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            last_distance: None,
            last_speed: 0.0,
            min_distance: NO_MIN_DISTANCE,
            danger_frames: 0,
            entered_warning: false,
            recovery_done: false,
            stale_frames: 0,
        }
    }

    pub fn last_distance(&self) -> Option<f64> {
        self.last_distance
    }

    pub fn last_speed(&self) -> f64 {
        self.last_speed
    }

    pub fn min_distance(&self) -> f64 {
        self.min_distance
    }

    pub fn danger_frames(&self) -> u32 {
        self.danger_frames
    }

    pub fn entered_warning(&self) -> bool {
        self.entered_warning
    }

    pub fn recovery_done(&self) -> bool {
        self.recovery_done
    }

    pub fn stale_frames(&self) -> u32 {
        self.stale_frames
    }

    pub fn is_cold(&self) -> bool {
        self.last_distance.is_none()
    }

    /// Apply a fresh estimate. `danger_limit` is the persistence length in sampled frames.
    pub fn observe(
        &mut self,
        estimate: DistanceEstimate,
        thresholds: &ThresholdConfig,
        danger_limit: u32,
    ) -> TrackTransition {
        let dist = estimate.distance_m;
        self.last_distance = Some(dist);
        self.last_speed = estimate.closing_speed_mps;
        self.stale_frames = 0;

        let mut transition = TrackTransition::default();

        if dist < thresholds.dist_danger_m {
            self.danger_frames = self.danger_frames.saturating_add(1);
            transition.in_danger = true;
            if self.danger_frames >= danger_limit {
                transition.danger_confirmed = true;
                transition.danger_newly_confirmed = self.danger_frames == danger_limit;
            }
        } else {
            self.danger_frames = 0;
        }

        if dist < thresholds.dist_warn_m {
            self.entered_warning = true;
            self.min_distance = self.min_distance.min(dist);
        }

        if self.entered_warning && dist - self.min_distance >= thresholds.recovery_threshold_m {
            transition.recovered = true;
            transition.recovery_newly_confirmed = !self.recovery_done;
            self.recovery_done = true;
        }

        transition
    }

    /// Count one frame without an observation. Returns true once the track
    /// has been missing for longer than `grace_frames`.
    pub fn mark_stale(&mut self, grace_frames: u32) -> bool {
        self.stale_frames = self.stale_frames.saturating_add(1);
        self.stale_frames > grace_frames
    }

    pub fn status(&self, thresholds: &ThresholdConfig) -> TrackStatus {
        if self.recovery_done {
            return TrackStatus::Recovered;
        }
        match self.last_distance {
            Some(d) if d < thresholds.dist_danger_m => TrackStatus::Danger,
            Some(d) if d < thresholds.dist_warn_m => TrackStatus::Warning,
            _ => TrackStatus::Safe,
        }
    }
}
