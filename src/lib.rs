// src/lib.rs

pub mod analysis;
pub mod config;
pub mod pipeline;
pub mod types;
pub mod video_processor;

pub use analysis::VideoAggregator;
pub use types::{AnalysisReport, Config, Detection, FrameRecord, StreamHeader, Verdict};
