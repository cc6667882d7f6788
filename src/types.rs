// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub geometry: GeometryConfig,
    pub smoothing: SmoothingConfig,
    pub thresholds: ThresholdConfig,
    pub lane: LaneConfig,
    pub tracking: TrackingConfig,
    pub sampling: SamplingConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Assumed real vehicle width (m)
    pub w_real: f64,
    /// Camera mount height (m)
    pub h_cam: f64,
    /// Reference height on the target vehicle (m)
    pub h_target_ref: f64,
    /// Horizontal field of view (deg), used as-is when `hfov_auto` is off
    pub hfov_deg: f64,
    /// Pick the field of view from the stream's aspect ratio
    pub hfov_auto: bool,
    pub hfov_wide_deg: f64,
    pub hfov_narrow_deg: f64,
    /// Aspect ratio (w / h) above which a stream counts as wide
    pub wide_aspect_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// EMA weight of a new raw distance sample
    pub ema_alpha: f64,
    /// EMA weight of a new raw closing-speed sample
    pub ema_alpha_v: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub dist_warn_m: f64,
    pub dist_danger_m: f64,
    pub danger_persistence_sec: f64,
    pub recovery_threshold_m: f64,
}

/// Ego-lane trapezoid, all values are fractions of the frame size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    pub top_w: f64,
    pub bottom_w: f64,
    pub start_y: f64,
    pub offset_x: f64,
    pub width_containment_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// A track is evicted once its stale counter exceeds this
    pub stale_grace_frames: u32,
    pub stale_policy: StalePolicy,
}

/// Which frames count against a track's stale counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Only frames where the detector reported nothing at all
    EmptyFrame,
    /// Any frame in which the track had no lane-contained observation
    PerTrack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Analyze every n-th source frame
    pub frame_skip: u32,
    /// Frame rate assumed when the source reports none
    pub fallback_fps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_dir: String,
    pub output_dir: String,
    pub early_exit_on_danger: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

// ============================================================================
// STREAM INPUT
// ============================================================================

/// Per-stream properties reported by the frame source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// One tracked vehicle box in pixel space, as delivered by the detector/tracker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub track_id: i64,
    /// Box center x
    pub x: f64,
    /// Box center y
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Detection {
    pub fn new(track_id: i64, x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            track_id,
            x,
            y,
            w,
            h,
        }
    }

    pub fn bottom_y(&self) -> f64 {
        self.y + self.h / 2.0
    }
}

/// One source frame of detector output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    /// 1-based source frame counter
    pub frame_index: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Danger,
    Positive,
    Safe,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Danger => "danger",
            Self::Positive => "positive",
            Self::Safe => "safe",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DangerSecond {
    #[serde(rename = "isDetected")]
    pub is_detected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisLogs {
    #[serde(rename = "followingDistance")]
    pub following_distance: Vec<DangerSecond>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub status: Verdict,
    pub fps: f64,
    pub logs: AnalysisLogs,
    pub video_duration_seconds: usize,
}
