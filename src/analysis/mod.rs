// src/analysis/mod.rs
//
// Following-distance engine.
//
// Signal flow:
//   Tracked boxes → lane_filter → distance_estimator → track_state ─┐
//                                                                  ├→ Verdict
//   video_aggregator owns the track registry and the per-second log ┘
//
// Everything here is single-threaded and per video.

pub mod distance_estimator;
pub mod lane_filter;
pub mod track_state;
pub mod video_aggregator;

pub use distance_estimator::{DistanceEstimate, DistanceEstimator};
pub use lane_filter::{LaneContainmentFilter, LaneSpan};
pub use track_state::{TrackState, TrackStatus, TrackTransition};
pub use video_aggregator::{
    danger_limit_frames, EngineParams, FrameSummary, VideoAggregator, MAX_STREAM_SECONDS,
};
