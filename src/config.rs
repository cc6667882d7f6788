// src/config.rs

use crate::types::{
    Config, GeometryConfig, LaneConfig, LoggingConfig, SamplingConfig, SmoothingConfig,
    StalePolicy, ThresholdConfig, TrackingConfig, VideoConfig,
};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs;
use tracing::{info, warn};

/// Env var holding a flat JSON object of option overrides (hyperparameter sweeps)
pub const OVERRIDE_ENV_VAR: &str = "FOLLOWING_DISTANCE_CONFIG_JSON";

impl Config {
    /// Load from YAML, apply overrides from `OVERRIDE_ENV_VAR`, validate.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::env::var(OVERRIDE_ENV_VAR).ok();
        if let Some(raw) = &raw {
            info!("Applying config override from {}: {}", OVERRIDE_ENV_VAR, raw);
        }
        Self::load_with_override(path, raw.as_deref())
    }

    /// Load from YAML, apply an explicit JSON override (if any), validate.
    /// Does not look at the process environment.
    pub fn load_with_override(path: &str, override_json: Option<&str>) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let mut config: Config =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing config {}", path))?;

        if let Some(raw) = override_json {
            config
                .apply_override_json(raw)
                .with_context(|| format!("applying override to {}", path))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Thresholds of the original 15m / 0.6s engine.
    pub fn baseline() -> Self {
        Self {
            geometry: GeometryConfig {
                w_real: 1.8,
                h_cam: 2.8,
                h_target_ref: 0.6,
                hfov_deg: 85.0,
                hfov_auto: true,
                hfov_wide_deg: 100.0,
                hfov_narrow_deg: 85.0,
                wide_aspect_ratio: 1.5,
            },
            smoothing: SmoothingConfig {
                ema_alpha: 0.3,
                ema_alpha_v: 0.1,
            },
            thresholds: ThresholdConfig {
                dist_warn_m: 25.0,
                dist_danger_m: 15.0,
                danger_persistence_sec: 0.6,
                recovery_threshold_m: 5.0,
            },
            lane: LaneConfig {
                top_w: 0.1,
                bottom_w: 0.4,
                start_y: 0.55,
                offset_x: 0.02,
                width_containment_ratio: 0.9,
            },
            tracking: TrackingConfig {
                stale_grace_frames: 5,
                stale_policy: StalePolicy::EmptyFrame,
            },
            sampling: SamplingConfig {
                frame_skip: 2,
                fallback_fps: 10.0,
            },
            video: VideoConfig {
                input_dir: "detections".to_string(),
                output_dir: "results".to_string(),
                early_exit_on_danger: false,
            },
            logging: LoggingConfig {
                level: "following_distance=info".to_string(),
            },
        }
    }

    /// Fewer false positives: closer danger line, longer persistence, wider warning zone.
    pub fn conservative() -> Self {
        let mut config = Self::baseline();
        config.thresholds = ThresholdConfig {
            dist_warn_m: 30.0,
            dist_danger_m: 12.0,
            danger_persistence_sec: 0.8,
            recovery_threshold_m: 5.0,
        };
        config
    }

    /// Apply a JSON object of flat option names, e.g. `{"DIST_DANGER_M": 12.0}`.
    pub fn apply_override_json(&mut self, raw: &str) -> Result<()> {
        let value: Value =
            serde_json::from_str(raw).context("config override is not valid JSON")?;
        let Value::Object(map) = value else {
            bail!("config override must be a JSON object");
        };

        for (key, value) in &map {
            self.apply_override(key, value)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &Value) -> Result<()> {
        let num = || {
            value
                .as_f64()
                .with_context(|| format!("override {} must be a number", key))
        };

        match key {
            "W_REAL" => self.geometry.w_real = num()?,
            "H_CAM" => self.geometry.h_cam = num()?,
            "H_TARGET_REF" => self.geometry.h_target_ref = num()?,
            "HFOV_DEG" => {
                self.geometry.hfov_deg = num()?;
                if self.geometry.hfov_auto {
                    warn!("HFOV_DEG override is ignored while hfov_auto is enabled");
                }
            }
            "EMA_ALPHA" => self.smoothing.ema_alpha = num()?,
            "EMA_ALPHA_V" => self.smoothing.ema_alpha_v = num()?,
            "DIST_WARN_M" => self.thresholds.dist_warn_m = num()?,
            "DIST_DANGER_M" => self.thresholds.dist_danger_m = num()?,
            "DANGER_PERSISTENCE_SEC" => self.thresholds.danger_persistence_sec = num()?,
            "RECOVERY_THRESHOLD_M" => self.thresholds.recovery_threshold_m = num()?,
            "LANE_TOP_W" => self.lane.top_w = num()?,
            "LANE_BOTTOM_W" => self.lane.bottom_w = num()?,
            "LANE_START_Y" => self.lane.start_y = num()?,
            "LANE_OFFSET_X" => self.lane.offset_x = num()?,
            "WIDTH_CONTAINMENT_RATIO" => self.lane.width_containment_ratio = num()?,
            "FRAME_SKIP" => {
                let skip = value
                    .as_u64()
                    .with_context(|| format!("override {} must be a positive integer", key))?;
                self.sampling.frame_skip = u32::try_from(skip)
                    .with_context(|| format!("override {} out of range", key))?;
            }
            "STALE_GRACE_FRAMES" => {
                let grace = value
                    .as_u64()
                    .with_context(|| format!("override {} must be an integer", key))?;
                self.tracking.stale_grace_frames = u32::try_from(grace)
                    .with_context(|| format!("override {} out of range", key))?;
            }
            _ => bail!("unknown config override: {}", key),
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let g = &self.geometry;
        ensure_positive("geometry.w_real", g.w_real)?;
        ensure_finite("geometry.h_cam", g.h_cam)?;
        ensure_finite("geometry.h_target_ref", g.h_target_ref)?;
        for (name, deg) in [
            ("geometry.hfov_deg", g.hfov_deg),
            ("geometry.hfov_wide_deg", g.hfov_wide_deg),
            ("geometry.hfov_narrow_deg", g.hfov_narrow_deg),
        ] {
            if !(deg > 0.0 && deg < 180.0) {
                bail!("{} must be in (0, 180), got {}", name, deg);
            }
        }
        ensure_positive("geometry.wide_aspect_ratio", g.wide_aspect_ratio)?;

        ensure_unit_weight("smoothing.ema_alpha", self.smoothing.ema_alpha)?;
        ensure_unit_weight("smoothing.ema_alpha_v", self.smoothing.ema_alpha_v)?;

        let t = &self.thresholds;
        ensure_non_negative("thresholds.dist_warn_m", t.dist_warn_m)?;
        ensure_non_negative("thresholds.dist_danger_m", t.dist_danger_m)?;
        ensure_non_negative("thresholds.danger_persistence_sec", t.danger_persistence_sec)?;
        ensure_non_negative("thresholds.recovery_threshold_m", t.recovery_threshold_m)?;
        if t.dist_warn_m < t.dist_danger_m {
            warn!(
                "⚠️  Warning distance {:.1}m is below danger distance {:.1}m",
                t.dist_warn_m, t.dist_danger_m
            );
        }

        let l = &self.lane;
        for (name, frac) in [
            ("lane.top_w", l.top_w),
            ("lane.bottom_w", l.bottom_w),
            ("lane.start_y", l.start_y),
        ] {
            if !(0.0..=1.0).contains(&frac) {
                bail!("{} must be a fraction in [0, 1], got {}", name, frac);
            }
        }
        if l.start_y >= 1.0 {
            bail!("lane.start_y must be below 1.0, got {}", l.start_y);
        }
        if !(-1.0..=1.0).contains(&l.offset_x) {
            bail!("lane.offset_x must be in [-1, 1], got {}", l.offset_x);
        }
        ensure_unit_weight("lane.width_containment_ratio", l.width_containment_ratio)?;

        if self.sampling.frame_skip == 0 {
            bail!("sampling.frame_skip must be at least 1");
        }
        ensure_positive("sampling.fallback_fps", self.sampling.fallback_fps)?;

        Ok(())
    }
}

fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        bail!("{} must be finite, got {}", name, value);
    }
    Ok(())
}

fn ensure_positive(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        bail!("{} must be positive, got {}", name, value);
    }
    Ok(())
}

fn ensure_non_negative(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value >= 0.0) {
        bail!("{} must be non-negative, got {}", name, value);
    }
    Ok(())
}

/// Weights and ratios live in (0, 1]
fn ensure_unit_weight(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        bail!("{} must be in (0, 1], got {}", name, value);
    }
    Ok(())
}
