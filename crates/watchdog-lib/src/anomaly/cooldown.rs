//! Repeat-alert suppression
//!
//! Applied after detection: an anomaly of a given type for a given HPA is
//! emitted at most once per cooldown window. Times come from the anomaly
//! itself so replayed data filters the same way as live data.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

use super::types::{Anomaly, AnomalyType};
use crate::cache::to_chrono;
use crate::models::HpaKey;

/// Key for suppression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CooldownKey {
    key: HpaKey,
    anomaly_type: AnomalyType,
}

/// Post-filter over detector output
pub struct AlertCooldown {
    window: chrono::Duration,
    /// Last emission time per (HPA, type)
    last_emitted: DashMap<CooldownKey, DateTime<Utc>>,
}

impl AlertCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window: to_chrono(window),
            last_emitted: DashMap::new(),
        }
    }

    /// Check if an anomaly should be suppressed
    pub fn should_suppress(&self, anomaly: &Anomaly) -> bool {
        let key = CooldownKey {
            key: anomaly.key.clone(),
            anomaly_type: anomaly.anomaly_type,
        };

        match self.last_emitted.get(&key) {
            Some(last) => anomaly.timestamp - *last < self.window,
            None => false,
        }
    }

    /// Record that an anomaly was emitted
    pub fn record(&self, anomaly: &Anomaly) {
        let key = CooldownKey {
            key: anomaly.key.clone(),
            anomaly_type: anomaly.anomaly_type,
        };
        self.last_emitted
            .entry(key)
            .and_modify(|last| {
                if anomaly.timestamp > *last {
                    *last = anomaly.timestamp;
                }
            })
            .or_insert(anomaly.timestamp);
    }

    /// Keep the anomalies outside their cooldown and record them
    pub fn filter(&self, anomalies: Vec<Anomaly>) -> Vec<Anomaly> {
        let mut emitted = Vec::with_capacity(anomalies.len());
        let mut newest: Option<DateTime<Utc>> = None;

        for anomaly in anomalies {
            if self.should_suppress(&anomaly) {
                continue;
            }
            self.record(&anomaly);
            newest = newest.max(Some(anomaly.timestamp));
            emitted.push(anomaly);
        }

        if let Some(now) = newest {
            self.prune(now);
        }
        emitted
    }

    /// Drop entries whose cooldown has elapsed as of `now`
    pub fn prune(&self, now: DateTime<Utc>) {
        let window = self.window;
        self.last_emitted.retain(|_, last| now - *last < window);
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }

    pub fn clear(&self) {
        self.last_emitted.clear();
    }
}
