//!  Farewatch Fare Monitor
//!
//!  Copyright (C) 2026  The Farewatch developers
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Search results by id, oldest evicted first once over capacity.
//!
//! With a snapshot attached, saves are debounced: a burst of searches
//! within `flush_delay` costs one write. [`SearchHistory::flush`] saves
//! right away, for shutdown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::errors::SearchError;
use crate::flights_search::SearchResult;
use crate::persistence::JsonSnapshot;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, SearchResult>,
    order: VecDeque<String>,
}

pub struct SearchHistory {
    entries: Arc<RwLock<Entries>>,
    capacity: usize,
    snapshot: Option<Arc<JsonSnapshot<Vec<SearchResult>>>>,
    flush_delay: Duration,
    flush_pending: Arc<AtomicBool>,
}

impl Default for SearchHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl SearchHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::default(),
            capacity: capacity.max(1),
            snapshot: None,
            flush_delay: DEFAULT_FLUSH_DELAY,
            flush_pending: Arc::default(),
        }
    }

    /// Persist changes to `snapshot` and restore its last contents.
    pub async fn with_snapshot(mut self, snapshot: JsonSnapshot<Vec<SearchResult>>) -> anyhow::Result<Self> {
        if let Some(saved) = snapshot.load().await? {
            tracing::info!(count = saved.len(), path = %snapshot.path().display(), "Restored search history");
            let mut entries = self.entries.write().await;
            for result in saved {
                push(&mut entries, result, self.capacity);
            }
        }
        self.snapshot = Some(Arc::new(snapshot));
        Ok(self)
    }

    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    pub async fn record(&self, result: SearchResult) {
        push(&mut *self.entries.write().await, result, self.capacity);

        let Some(snapshot) = &self.snapshot else {
            return;
        };
        if self.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries = Arc::clone(&self.entries);
        let snapshot = Arc::clone(snapshot);
        let pending = Arc::clone(&self.flush_pending);
        let delay = self.flush_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.store(false, Ordering::SeqCst);
            save(&entries, &snapshot).await;
        });
    }

    /// Save now, without waiting for a pending debounced write.
    pub async fn flush(&self) {
        if let Some(snapshot) = &self.snapshot {
            save(&self.entries, snapshot).await;
        }
    }

    pub async fn get(&self, search_id: &str) -> Result<SearchResult, SearchError> {
        self.entries
            .read()
            .await
            .by_id
            .get(search_id)
            .cloned()
            .ok_or_else(|| SearchError::NotFound(search_id.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.order.len()
    }

    /// Most recent first.
    pub async fn recent(&self, limit: usize) -> Vec<SearchResult> {
        let entries = self.entries.read().await;
        entries
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| entries.by_id.get(id).cloned())
            .collect()
    }
}

async fn save(entries: &RwLock<Entries>, snapshot: &JsonSnapshot<Vec<SearchResult>>) {
    let (generation, all) = {
        let entries = entries.read().await;
        let all: Vec<_> = entries
            .order
            .iter()
            .filter_map(|id| entries.by_id.get(id).cloned())
            .collect();
        (snapshot.next_generation(), all)
    };
    match snapshot.save_generation(generation, &all).await {
        Ok(true) => tracing::debug!(count = all.len(), "Search history saved"),
        Ok(false) => {}
        Err(e) => tracing::error!("Failed to persist search history: {:#}", e),
    }
}

fn push(entries: &mut Entries, result: SearchResult, capacity: usize) {
    let id = result.search_id.clone();
    if entries.by_id.insert(id.clone(), result).is_none() {
        entries.order.push_back(id);
    }
    while entries.order.len() > capacity {
        if let Some(oldest) = entries.order.pop_front() {
            entries.by_id.remove(&oldest);
        }
    }
}
