//! Process configuration, read once from `SALONBOOK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::model::{HOUR_MS, MINUTE_MS, Ms};

/// Scheduling knobs shared by every tenant engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Step between candidate start times.
    pub slot_granularity_min: i64,
    /// Minimum notice before the current start of an appointment being rescheduled.
    pub reschedule_lead_ms: Ms,
    /// Appointments starting within `[now + start, now + end]` get a reminder.
    pub reminder_window_ms: (Ms, Ms),
    pub reminder_interval: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            slot_granularity_min: 30,
            reschedule_lead_ms: 2 * HOUR_MS,
            reminder_window_ms: (20 * HOUR_MS, 28 * HOUR_MS),
            reminder_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub policy: BookingPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "salonbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            policy: BookingPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults and
    /// unparseable values fall back with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let policy_defaults = BookingPolicy::default();

        let lead_min: i64 = parsed(&lookup, "SALONBOOK_RESCHEDULE_LEAD_MIN", policy_defaults.reschedule_lead_ms / MINUTE_MS);
        let reminder_secs: u64 = parsed(
            &lookup,
            "SALONBOOK_REMINDER_INTERVAL_SECS",
            policy_defaults.reminder_interval.as_secs(),
        );

        Self {
            bind: lookup("SALONBOOK_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "SALONBOOK_PORT", defaults.port),
            data_dir: lookup("SALONBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("SALONBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "SALONBOOK_MAX_CONNECTIONS", defaults.max_connections),
            compact_threshold: parsed(&lookup, "SALONBOOK_COMPACT_THRESHOLD", defaults.compact_threshold),
            metrics_port: lookup("SALONBOOK_METRICS_PORT").and_then(|s| match s.parse() {
                Ok(p) => Some(p),
                Err(_) => {
                    warn!(value = %s, "ignoring invalid SALONBOOK_METRICS_PORT");
                    None
                }
            }),
            tls_cert: lookup("SALONBOOK_TLS_CERT"),
            tls_key: lookup("SALONBOOK_TLS_KEY"),
            policy: BookingPolicy {
                slot_granularity_min: parsed(
                    &lookup,
                    "SALONBOOK_SLOT_GRANULARITY_MIN",
                    policy_defaults.slot_granularity_min,
                )
                .max(1),
                reschedule_lead_ms: lead_min.max(0) * MINUTE_MS,
                reminder_window_ms: policy_defaults.reminder_window_ms,
                reminder_interval: Duration::from_secs(reminder_secs.max(1)),
            },
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable setting, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.port, 5433);
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.policy, BookingPolicy::default());
        assert_eq!(config.policy.reschedule_lead_ms, 2 * HOUR_MS);
        assert!(config.metrics_port.is_none());
    }

    #[test]
    fn overrides_apply() {
        let config = Config::from_lookup(lookup_from(&[
            ("SALONBOOK_PORT", "6000"),
            ("SALONBOOK_DATA_DIR", "/var/lib/salonbook"),
            ("SALONBOOK_SLOT_GRANULARITY_MIN", "15"),
            ("SALONBOOK_RESCHEDULE_LEAD_MIN", "90"),
            ("SALONBOOK_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.port, 6000);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/salonbook"));
        assert_eq!(config.policy.slot_granularity_min, 15);
        assert_eq!(config.policy.reschedule_lead_ms, 90 * MINUTE_MS);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("SALONBOOK_PORT", "not-a-port"),
            ("SALONBOOK_SLOT_GRANULARITY_MIN", "0"),
            ("SALONBOOK_METRICS_PORT", "99999"),
        ]));
        assert_eq!(config.port, 5433);
        assert_eq!(config.policy.slot_granularity_min, 1);
        assert_eq!(config.metrics_port, None);
    }
}
