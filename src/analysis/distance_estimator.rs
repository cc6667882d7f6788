// src/analysis/distance_estimator.rs
//
// Monocular distance from box width (pinhole model) with EMA smoothing.
//
//   L     = W_real * frame_w / (2 * w_px * tan(hfov / 2))   slant range
//   D_raw = sqrt(L² - h_rel²)  with h_rel = H_cam - H_target_ref
//
// When L² <= h_rel² the height correction is skipped and L is used directly.
// Closing speed is positive when the gap shrinks.

use crate::types::{GeometryConfig, SmoothingConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEstimate {
    /// Smoothed horizontal distance (m)
    pub distance_m: f64,
    /// Smoothed closing speed (m/s)
    pub closing_speed_mps: f64,
    /// Geometry was unusable; distance and speed are the zero sentinel
    pub degenerate: bool,
}

impl DistanceEstimate {
    fn sentinel() -> Self {
        Self {
            distance_m: 0.0,
            closing_speed_mps: 0.0,
            degenerate: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistanceEstimator {
    w_real: f64,
    h_rel: f64,
    half_hfov_tan: f64,
    alpha_d: f64,
    alpha_v: f64,
}

impl DistanceEstimator {
    /// `hfov_deg` is the stream's resolved field of view.
    pub fn new(geometry: &GeometryConfig, smoothing: &SmoothingConfig, hfov_deg: f64) -> Self {
        Self {
            w_real: geometry.w_real,
            h_rel: geometry.h_cam - geometry.h_target_ref,
            half_hfov_tan: (hfov_deg.to_radians() / 2.0).tan(),
            alpha_d: smoothing.ema_alpha,
            alpha_v: smoothing.ema_alpha_v,
        }
    }

    /// Unsmoothed horizontal distance, `None` for degenerate geometry.
    pub fn raw_distance(&self, w_px: f64, frame_w: f64) -> Option<f64> {
        let denominator = 2.0 * w_px * self.half_hfov_tan;
        if !(denominator.is_finite() && denominator > 0.0) {
            return None;
        }

        let slant = self.w_real * frame_w / denominator;
        if slant * slant > self.h_rel * self.h_rel {
            Some((slant * slant - self.h_rel * self.h_rel).sqrt())
        } else {
            Some(slant)
        }
    }

    /// Fold one observation into the track's previous smoothed values.
    pub fn estimate(
        &self,
        w_px: f64,
        frame_w: f64,
        last_distance: Option<f64>,
        last_speed: f64,
        dt: f64,
    ) -> DistanceEstimate {
        let Some(d_raw) = self.raw_distance(w_px, frame_w) else {
            return DistanceEstimate::sentinel();
        };

        let distance_m = match last_distance {
            Some(prev) => prev * (1.0 - self.alpha_d) + d_raw * self.alpha_d,
            None => d_raw,
        };

        let closing_speed_mps = match last_distance {
            Some(prev) if dt > 0.0 => {
                let raw_v = (prev - distance_m) / dt;
                last_speed * (1.0 - self.alpha_v) + raw_v * self.alpha_v
            }
            _ => 0.0,
        };

        DistanceEstimate {
            distance_m,
            closing_speed_mps,
            degenerate: false,
        }
    }
}

/// Box width in pixels at which a vehicle appears at horizontal distance `distance_m`.
/// Inverse of the estimator's raw geometry, used to synthesize detections.
#[cfg(test)]
pub(crate) fn width_px_for_distance(
    geometry: &GeometryConfig,
    hfov_deg: f64,
    distance_m: f64,
    frame_w: f64,
) -> f64 {
    let h_rel = geometry.h_cam - geometry.h_target_ref;
    let slant = (distance_m * distance_m + h_rel * h_rel).sqrt();
    geometry.w_real * frame_w / (2.0 * slant * (hfov_deg.to_radians() / 2.0).tan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Config;

    fn estimator(hfov_deg: f64) -> (DistanceEstimator, GeometryConfig) {
        let config = Config::baseline();
        (
            DistanceEstimator::new(&config.geometry, &config.smoothing, hfov_deg),
            config.geometry,
        )
    }

    #[test]
    fn test_raw_distance_matches_pinhole() {
        let (est, geometry) = estimator(90.0);
        // tan(45°) = 1 → L = 1.8 * 1280 / (2 * 64) = 18m
        let raw = est.raw_distance(64.0, 1280.0).unwrap();
        let h_rel = geometry.h_cam - geometry.h_target_ref;
        assert!((raw - (18.0f64 * 18.0 - h_rel * h_rel).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_height_correction_fallback() {
        let (est, _) = estimator(90.0);
        // Huge box → slant 1.8 * 100 / (2 * 100) = 0.9m, below h_rel = 2.2m
        let raw = est.raw_distance(100.0, 100.0).unwrap();
        assert!((raw - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_camera_below_target_reference() {
        let mut config = Config::baseline();
        config.geometry.h_cam = 0.5;
        config.geometry.h_target_ref = 2.0;
        assert!(config.validate().is_ok());
        let est = DistanceEstimator::new(&config.geometry, &config.smoothing, 90.0);

        // slant 0.9m, below |h_rel| = 1.5m → fallback to slant
        let near = est.raw_distance(100.0, 100.0).unwrap();
        assert!((near - 0.9).abs() < 1e-9);

        // slant 18m → correction uses h_rel² regardless of sign
        let far = est.raw_distance(64.0, 1280.0).unwrap();
        assert!((far - (18.0f64 * 18.0 - 1.5 * 1.5).sqrt()).abs() < 1e-9);

        let first = est.estimate(100.0, 100.0, None, 0.0, 0.2);
        let second = est.estimate(100.0, 100.0, Some(first.distance_m), 0.0, 0.2);
        assert!(first.distance_m.is_finite());
        assert!(second.distance_m.is_finite());
        assert!(second.closing_speed_mps.is_finite());
    }

    #[test]
    fn test_zero_width_is_sentinel() {
        let (est, _) = estimator(85.0);
        let out = est.estimate(0.0, 1280.0, Some(20.0), 1.0, 0.2);
        assert!(out.degenerate);
        assert_eq!(out.distance_m, 0.0);
        assert_eq!(out.closing_speed_mps, 0.0);
    }

    #[test]
    fn test_cold_start_uses_raw_value() {
        let (est, _) = estimator(85.0);
        let raw = est.raw_distance(80.0, 1280.0).unwrap();
        let out = est.estimate(80.0, 1280.0, None, 0.0, 0.2);
        assert_eq!(out.distance_m, raw);
        assert_eq!(out.closing_speed_mps, 0.0);
        assert!(!out.degenerate);
    }

    #[test]
    fn test_ema_and_closing_speed() {
        let (est, _) = estimator(85.0);
        let raw = est.raw_distance(80.0, 1280.0).unwrap();
        let prev = raw + 10.0;
        let out = est.estimate(80.0, 1280.0, Some(prev), 0.0, 0.2);

        let expected_d = prev * 0.7 + raw * 0.3;
        assert!((out.distance_m - expected_d).abs() < 1e-9);
        let expected_v = ((prev - expected_d) / 0.2) * 0.1;
        assert!((out.closing_speed_mps - expected_v).abs() < 1e-9);
        assert!(out.closing_speed_mps > 0.0, "gap is closing");
    }

    #[test]
    fn test_no_speed_without_positive_dt() {
        let (est, _) = estimator(85.0);
        let out = est.estimate(80.0, 1280.0, Some(40.0), 3.0, 0.0);
        assert_eq!(out.closing_speed_mps, 0.0);
    }

    #[test]
    fn test_constant_width_converges_to_raw() {
        let (est, _) = estimator(100.0);
        let raw = est.raw_distance(120.0, 1920.0).unwrap();

        let mut last_d = Some(raw * 3.0);
        let mut last_v = 0.0;
        for _ in 0..200 {
            let out = est.estimate(120.0, 1920.0, last_d, last_v, 0.2);
            last_d = Some(out.distance_m);
            last_v = out.closing_speed_mps;
        }
        assert!((last_d.unwrap() - raw).abs() < 1e-6);
        assert!(last_v.abs() < 1e-3);
    }

    #[test]
    fn test_width_helper_inverts_estimator() {
        let (est, geometry) = estimator(85.0);
        let w = width_px_for_distance(&geometry, 85.0, 22.5, 1280.0);
        let raw = est.raw_distance(w, 1280.0).unwrap();
        assert!((raw - 22.5).abs() < 1e-9);
    }
}
