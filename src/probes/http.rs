use super::{Outcome, Prober};
use crate::scheduler::clock::{Clock, SystemClock};
use crate::sites::Site;
use anyhow::{Context, Result};
use chrono::SubsecRound;
use reqwest::{redirect, Client};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Total per-request timeout unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_REDIRECTS: usize = 10;

/// HTTP(S) liveness probe: one HEAD request, status only, body never read.
///
/// Certificate and hostname verification stay enabled; redirects are followed
/// and the final status is the one recorded.
#[derive(Clone)]
pub struct HttpProber {
    client: Client,
    clock: Arc<dyn Clock>,
}

impl HttpProber {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            clock: Arc::new(SystemClock),
        })
    }

    /// Clock used to stamp `observed_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

fn failure_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_redirect() {
        "redirect"
    } else {
        "request"
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn check(&self, site: &Site) -> Outcome {
        let observed_at = self.clock.now().trunc_subsecs(0);
        let start = Instant::now();
        let result = self.client.head(site.as_str()).send().await;
        let latency = start.elapsed();

        match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                debug!(site = %site, status, latency_ms = latency.as_millis() as u64, "Probe answered");
                Outcome::responded(site, observed_at, status, latency)
            }
            Err(e) => {
                debug!(site = %site, kind = failure_kind(&e), error = %e, "Probe failed");
                Outcome::failed(site, observed_at, latency)
            }
        }
    }
}
