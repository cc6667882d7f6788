// src/pipeline/event_bus.rs
//
// Bounded queue of risk events. The aggregator publishes, the host drains
// and reports. Nothing downstream reaches into track state directly.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RiskEvent {
    /// A track stayed inside the danger distance for the persistence window
    DangerConfirmed {
        track_id: i64,
        timestamp: f64,
        distance_m: f64,
        closing_speed_mps: f64,
    },

    /// A track backed off from its closest approach by the recovery distance
    RecoveryConfirmed {
        track_id: i64,
        timestamp: f64,
        min_distance_m: f64,
        distance_m: f64,
    },

    TrackEvicted {
        track_id: i64,
        timestamp: f64,
        stale_frames: u32,
    },
}

impl RiskEvent {
    pub fn track_id(&self) -> i64 {
        match self {
            Self::DangerConfirmed { track_id, .. }
            | Self::RecoveryConfirmed { track_id, .. }
            | Self::TrackEvicted { track_id, .. } => *track_id,
        }
    }
}

pub struct EventBus {
    events: VecDeque<RiskEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: RiskEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<RiskEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}
