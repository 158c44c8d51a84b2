//! Liveness probes and the outcome record every probe produces.

pub mod http;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sites::Site;

pub use self::http::HttpProber;

/// Tri-state result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    /// A response arrived with status in [200, 400).
    Up,
    /// A response arrived with any other status.
    Down,
    /// No response at all: timeout, DNS, TLS, refused connection.
    Error,
}

impl Reachability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reachability::Up => "up",
            Reachability::Down => "down",
            Reachability::Error => "error",
        }
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reachability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Reachability::Up),
            "down" => Ok(Reachability::Down),
            "error" => Ok(Reachability::Error),
            other => Err(format!("unknown reachability '{}'", other)),
        }
    }
}

/// Map a received HTTP status to Up/Down.
pub fn classify(status: u16) -> Reachability {
    if (200..400).contains(&status) {
        Reachability::Up
    } else {
        Reachability::Down
    }
}

/// Immutable record of one probe attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub site: String,
    pub observed_at: DateTime<Utc>,
    pub reachable: Reachability,
    /// Absent when no response was received.
    pub status_code: Option<u16>,
    #[serde(rename = "latency_seconds", serialize_with = "serialize_secs")]
    pub latency: Duration,
}

impl Outcome {
    pub fn responded(site: &Site, observed_at: DateTime<Utc>, status: u16, latency: Duration) -> Self {
        Self {
            site: site.as_str().to_string(),
            observed_at,
            reachable: classify(status),
            status_code: Some(status),
            latency,
        }
    }

    pub fn failed(site: &Site, observed_at: DateTime<Utc>, latency: Duration) -> Self {
        Self {
            site: site.as_str().to_string(),
            observed_at,
            reachable: Reachability::Error,
            status_code: None,
            latency,
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// A liveness check against one site.
///
/// Implementations never fail: every failure mode is encoded in the returned
/// [`Outcome`]. They must not touch storage.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn check(&self, site: &Site) -> Outcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(199), Reachability::Down);
        assert_eq!(classify(200), Reachability::Up);
        assert_eq!(classify(204), Reachability::Up);
        assert_eq!(classify(301), Reachability::Up);
        assert_eq!(classify(399), Reachability::Up);
        assert_eq!(classify(400), Reachability::Down);
        assert_eq!(classify(500), Reachability::Down);
    }

    #[test]
    fn test_reachability_text_round_trips() {
        for r in [Reachability::Up, Reachability::Down, Reachability::Error] {
            assert_eq!(r.as_str().parse::<Reachability>().unwrap(), r);
        }
        assert!("UP".parse::<Reachability>().is_err());
    }

    #[test]
    fn test_failed_outcome_has_no_status() {
        let site = Site::parse("https://example.com").unwrap();
        let o = Outcome::failed(&site, Utc::now(), Duration::from_millis(250));
        assert_eq!(o.reachable, Reachability::Error);
        assert_eq!(o.status_code, None);
    }

    #[test]
    fn test_outcome_serializes_latency_as_seconds() {
        let site = Site::parse("https://example.com").unwrap();
        let o = Outcome::responded(&site, Utc::now(), 503, Duration::from_millis(500));
        let v = serde_json::to_value(&o).unwrap();
        assert_eq!(v["reachable"], "down");
        assert_eq!(v["status_code"], 503);
        assert_eq!(v["latency_seconds"], 0.5);
    }
}
