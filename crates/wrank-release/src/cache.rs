use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wrank_adapters::RosterSource;
use wrank_core::RosterEntry;
use wrank_storage::FetchError;

pub const DEFAULT_ROSTER_TTL: Duration = Duration::from_secs(600);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct CacheSlot {
    fetched_at: Instant,
    entries: Vec<RosterEntry>,
}

/// Per-weight-class roster cache. The whole map is locked for the duration of
/// a lookup, refresh fetch included, so a weight class is never fetched twice
/// concurrently.
pub struct RosterCache {
    source: Arc<dyn RosterSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slots: Mutex<HashMap<i32, CacheSlot>>,
}

impl RosterCache {
    pub fn new(source: Arc<dyn RosterSource>, ttl: Duration) -> Self {
        Self::with_clock(source, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn RosterSource>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<dyn RosterSource> {
        &self.source
    }

    /// Serves a non-empty slot younger than the TTL, otherwise refetches and
    /// replaces the slot. A failed or empty fetch leaves the old slot untouched.
    pub async fn get_roster(&self, weight_class: i32) -> Result<Vec<RosterEntry>, FetchError> {
        let mut slots = self.slots.lock().await;

        if let Some(slot) = slots.get(&weight_class) {
            let age = self.clock.now().saturating_duration_since(slot.fetched_at);
            if age < self.ttl && !slot.entries.is_empty() {
                debug!(weight_class, entries = slot.entries.len(), "roster cache hit");
                return Ok(slot.entries.clone());
            }
        }

        let entries = self.source.fetch_roster(weight_class).await?;
        if entries.is_empty() {
            warn!(weight_class, source = self.source.source_id(), "roster fetch returned no entries");
            return Err(FetchError::Parse {
                url: format!("{}:weight/{weight_class}", self.source.source_id()),
                reason: "roster source returned no wrestlers".to_string(),
            });
        }
        info!(
            weight_class,
            entries = entries.len(),
            source = self.source.source_id(),
            "roster cache refreshed"
        );
        slots.insert(
            weight_class,
            CacheSlot {
                fetched_at: self.clock.now(),
                entries: entries.clone(),
            },
        );
        Ok(entries)
    }
}
