// src/analysis/lane_filter.rs
//
// Ego-lane membership test for a single detection.
//
// The lane is a fixed trapezoid in image space: it starts at `start_y` of the
// frame height with width `top_w`, widens linearly down to `bottom_w` at the
// bottom edge, and its center can be shifted by `offset_x` to compensate for
// an off-center camera mount. A detection is in the lane when enough of its
// horizontal extent overlaps the lane at the height of its bottom edge.

use crate::types::LaneConfig;

/// Horizontal extent of the lane at one image row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneSpan {
    pub x1: f64,
    pub x2: f64,
}

impl LaneSpan {
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }
}

#[derive(Debug, Clone)]
pub struct LaneContainmentFilter {
    config: LaneConfig,
}

impl LaneContainmentFilter {
    pub fn new(config: LaneConfig) -> Self {
        Self { config }
    }

    /// Lane extent at `y_bottom`, or `None` above the lane start line.
    pub fn lane_span_at(&self, y_bottom: f64, frame_w: f64, frame_h: f64) -> Option<LaneSpan> {
        let cfg = &self.config;
        let start_y = frame_h * cfg.start_y;
        if y_bottom < start_y {
            return None;
        }

        let top_w = frame_w * cfg.top_w;
        let bottom_w = frame_w * cfg.bottom_w;
        let rel_y = (y_bottom - start_y) / (frame_h - start_y);
        let lane_w = top_w + (bottom_w - top_w) * rel_y;
        let center_x = frame_w / 2.0 + frame_w * cfg.offset_x;

        Some(LaneSpan {
            x1: center_x - lane_w / 2.0,
            x2: center_x + lane_w / 2.0,
        })
    }

    /// Fraction of the box width that lies inside the lane (0 when above the lane)
    pub fn overlap_ratio(
        &self,
        x_center: f64,
        y_bottom: f64,
        bbox_w: f64,
        frame_w: f64,
        frame_h: f64,
    ) -> f64 {
        if bbox_w <= 0.0 {
            return 0.0;
        }
        let Some(lane) = self.lane_span_at(y_bottom, frame_w, frame_h) else {
            return 0.0;
        };

        let veh_x1 = x_center - bbox_w / 2.0;
        let veh_x2 = x_center + bbox_w / 2.0;
        let overlap_w = (veh_x2.min(lane.x2) - veh_x1.max(lane.x1)).max(0.0);
        overlap_w / bbox_w
    }

    /// Is the detection inside the ego lane? The ratio boundary is inclusive.
    pub fn contains(
        &self,
        x_center: f64,
        y_bottom: f64,
        bbox_w: f64,
        frame_w: f64,
        frame_h: f64,
    ) -> bool {
        if bbox_w <= 0.0 || y_bottom < frame_h * self.config.start_y {
            return false;
        }
        self.overlap_ratio(x_center, y_bottom, bbox_w, frame_w, frame_h)
            >= self.config.width_containment_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(ratio: f64) -> LaneContainmentFilter {
        LaneContainmentFilter::new(LaneConfig {
            top_w: 0.1,
            bottom_w: 0.4,
            start_y: 0.5,
            offset_x: 0.0,
            width_containment_ratio: ratio,
        })
    }

    #[test]
    fn test_lane_span_interpolates_width() {
        let f = filter(0.9);
        let top = f.lane_span_at(500.0, 1000.0, 1000.0).unwrap();
        assert!((top.width() - 100.0).abs() < 1e-9);
        let mid = f.lane_span_at(750.0, 1000.0, 1000.0).unwrap();
        assert!((mid.width() - 250.0).abs() < 1e-9);
        let bottom = f.lane_span_at(1000.0, 1000.0, 1000.0).unwrap();
        assert_eq!(bottom, LaneSpan { x1: 300.0, x2: 700.0 });
    }

    #[test]
    fn test_above_start_line_rejected() {
        let f = filter(0.1);
        assert!(f.lane_span_at(499.0, 1000.0, 1000.0).is_none());
        // Dead center, but above the lane start
        assert!(!f.contains(500.0, 499.0, 50.0, 1000.0, 1000.0));
        assert!(f.contains(500.0, 500.0, 50.0, 1000.0, 1000.0));
    }

    #[test]
    fn test_containment_boundary_is_inclusive() {
        let f = filter(0.9);
        // Lane at the bottom row spans 300..700. Box 290..390 → overlap 90/100.
        assert_eq!(f.overlap_ratio(340.0, 1000.0, 100.0, 1000.0, 1000.0), 0.9);
        assert!(f.contains(340.0, 1000.0, 100.0, 1000.0, 1000.0));
        // One pixel further out → 89/100
        assert!(!f.contains(339.0, 1000.0, 100.0, 1000.0, 1000.0));
    }

    #[test]
    fn test_offset_shifts_lane_center() {
        let mut cfg = filter(0.9).config;
        cfg.offset_x = 0.1;
        let f = LaneContainmentFilter::new(cfg);
        let span = f.lane_span_at(1000.0, 1000.0, 1000.0).unwrap();
        assert!((span.x1 - 400.0).abs() < 1e-9);
        assert!((span.x2 - 800.0).abs() < 1e-9);
        assert!(f.contains(750.0, 1000.0, 60.0, 1000.0, 1000.0));
        assert!(!f.contains(320.0, 1000.0, 60.0, 1000.0, 1000.0));
    }

    #[test]
    fn test_zero_width_box_rejected() {
        let f = filter(0.5);
        assert_eq!(f.overlap_ratio(500.0, 900.0, 0.0, 1000.0, 1000.0), 0.0);
        assert!(!f.contains(500.0, 900.0, 0.0, 1000.0, 1000.0));
    }
}
