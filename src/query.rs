//! Read side: latest status and recent history per site.
//!
//! "Never probed" is `Ok(None)` / an empty history; a storage failure is an
//! `Err`. Callers must keep the two apart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::probes::{Outcome, Reachability};
use crate::sites::SiteList;
use crate::storage::{OutcomeStore, StoreError};

/// Number of history points shown per site when the caller does not say.
pub const DEFAULT_HISTORY_POINTS: usize = 24;

/// One point of a site's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryPoint {
    pub observed_at: DateTime<Utc>,
    pub reachable: Reachability,
}

impl From<&Outcome> for HistoryPoint {
    fn from(o: &Outcome) -> Self {
        Self {
            observed_at: o.observed_at,
            reachable: o.reachable,
        }
    }
}

/// Latest status plus recent history of one monitored site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteStatus {
    pub site: String,
    pub latest: Option<Outcome>,
    pub history: Vec<HistoryPoint>,
}

#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<dyn OutcomeStore>,
    sites: SiteList,
}

impl QueryFacade {
    pub fn new(store: Arc<dyn OutcomeStore>, sites: SiteList) -> Self {
        Self { store, sites }
    }

    pub fn latest(&self, site: &str) -> Result<Option<Outcome>, StoreError> {
        self.store.latest(site)
    }

    pub fn history(&self, site: &str, limit: usize) -> Result<Vec<HistoryPoint>, StoreError> {
        Ok(self
            .store
            .history(site, limit)?
            .iter()
            .map(HistoryPoint::from)
            .collect())
    }

    /// Status of every site in the current snapshot, in list order.
    pub fn overview(&self, limit: usize) -> Result<Vec<SiteStatus>, StoreError> {
        let snapshot = self.sites.current();
        snapshot
            .iter()
            .map(|site| {
                let history = self.store.history(site.as_str(), limit)?;
                // history is a suffix of the log, so its tail is the latest row
                let latest = match history.last() {
                    Some(last) => Some(last.clone()),
                    None if limit == 0 => self.store.latest(site.as_str())?,
                    None => None,
                };
                Ok(SiteStatus {
                    site: site.as_str().to_string(),
                    latest,
                    history: history.iter().map(HistoryPoint::from).collect(),
                })
            })
            .collect()
    }

    pub fn sites(&self) -> &SiteList {
        &self.sites
    }
}
