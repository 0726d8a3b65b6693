//! Threshold crossing detection.
//!
//! A [`ThresholdMonitor`] watches every committed state and records a
//! [`Transition`] whenever a watched channel reaches a level from below or
//! drops beneath it from above. Each crossing is recorded once.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use resonance_types::{AggregateState, CrossingDirection, Transition};
use tracing::info;

use crate::config::ThresholdConfig;
use crate::store::StateObserver;

#[derive(Debug)]
struct MonitorInner {
    last_values: BTreeMap<String, f64>,
    log: VecDeque<Transition>,
}

/// Records threshold crossings into a bounded log.
#[derive(Debug)]
pub struct ThresholdMonitor {
    thresholds: Vec<ThresholdConfig>,
    capacity: usize,
    inner: Mutex<MonitorInner>,
}

impl ThresholdMonitor {
    /// Create a monitor primed with `current` so the first observed state
    /// is compared against real values.
    pub fn new(thresholds: Vec<ThresholdConfig>, current: &AggregateState, capacity: usize) -> Self {
        Self {
            thresholds,
            capacity: capacity.max(1),
            inner: Mutex::new(MonitorInner {
                last_values: current.channels.clone(),
                log: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recorded transitions, newest last.
    pub fn recent(&self) -> Vec<Transition> {
        self.lock().log.iter().cloned().collect()
    }

    /// Transitions recorded for one channel, newest last.
    pub fn recent_for(&self, channel: &str) -> Vec<Transition> {
        self.lock()
            .log
            .iter()
            .filter(|t| t.channel == channel)
            .cloned()
            .collect()
    }

    /// Configured thresholds.
    pub fn thresholds(&self) -> &[ThresholdConfig] {
        &self.thresholds
    }
}

fn crossing(previous: f64, current: f64, level: f64) -> Option<CrossingDirection> {
    if previous < level && current >= level {
        Some(CrossingDirection::Rising)
    } else if previous >= level && current < level {
        Some(CrossingDirection::Falling)
    } else {
        None
    }
}

impl StateObserver for ThresholdMonitor {
    fn on_state_change(&self, state: &AggregateState) {
        let mut inner = self.lock();
        for threshold in &self.thresholds {
            let Some(current) = state.get(&threshold.channel) else {
                continue;
            };
            let Some(previous) = inner.last_values.get(&threshold.channel).copied() else {
                continue;
            };
            let Some(direction) = crossing(previous, current, threshold.level) else {
                continue;
            };

            info!(
                threshold = %threshold.name,
                channel = %threshold.channel,
                level = threshold.level,
                value = current,
                version = state.version,
                ?direction,
                "threshold crossed"
            );
            if inner.log.len() >= self.capacity {
                inner.log.pop_front();
            }
            inner.log.push_back(Transition {
                name: threshold.name.clone(),
                channel: threshold.channel.clone(),
                level: threshold.level,
                direction,
                value: current,
                version: state.version,
                at: Utc::now(),
            });
        }
        inner.last_values.clone_from(&state.channels);
    }
}
