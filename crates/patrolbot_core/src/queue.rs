use std::collections::HashSet;

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::api::WikiReadApi;
pub use crate::api::{FeedEntry, FeedQuery};

/// The feed rejects a zero start date, so sweeps begin from timestamp 1.
const INITIAL_CURSOR: &str = "1";

/// A feed entry that must drive cursor advancement arrived without a
/// creation timestamp. Pagination cannot continue correctly past it.
#[derive(Debug, Error)]
#[error("feed entry {title} (page id {page_id}) has no creation_date")]
pub struct QueueProtocolError {
    pub title: String,
    pub page_id: i64,
}

/// Walks the unreviewed feed oldest-first in fixed-size chunks.
///
/// Consecutive fetches overlap on purpose: creation timestamps are not
/// unique, and restarting from one past the last seen timestamp could skip
/// entries that share it. The pager restarts from the last timestamp itself
/// and drops entries it has already yielded this sweep, so callers see each
/// page at most once.
pub struct QueuePager {
    query: FeedQuery,
    cursor: String,
    last_tail_id: Option<i64>,
    seen: HashSet<i64>,
    exhausted: bool,
}

impl QueuePager {
    pub fn new(query: FeedQuery) -> Self {
        Self {
            query,
            cursor: INITIAL_CURSOR.to_string(),
            last_tail_id: None,
            seen: HashSet::new(),
            exhausted: false,
        }
    }

    /// The next deduplicated feed chunk, or None once the feed is drained.
    /// The chunk may be empty when every entry in a fetch was an overlap.
    pub fn next_chunk<A: WikiReadApi>(&mut self, api: &mut A) -> Result<Option<Vec<FeedEntry>>> {
        if self.exhausted {
            return Ok(None);
        }
        let chunk = api.feed_chunk(&self.query, &self.cursor)?;
        let Some(tail) = chunk.last() else {
            debug!("feed returned no entries; sweep complete");
            self.exhausted = true;
            return Ok(None);
        };
        if self.last_tail_id == Some(tail.page_id) {
            // Same tail as the previous fetch: nothing newer exists yet.
            debug!(tail = tail.page_id, "feed tail unchanged; sweep complete");
            self.exhausted = true;
            return Ok(None);
        }
        let next_cursor = tail.creation_date.clone().ok_or_else(|| QueueProtocolError {
            title: tail.title.clone(),
            page_id: tail.page_id,
        })?;
        self.last_tail_id = Some(tail.page_id);
        self.cursor = next_cursor;
        let fresh: Vec<FeedEntry> = chunk
            .into_iter()
            .filter(|entry| self.seen.insert(entry.page_id))
            .collect();
        debug!(yielded = fresh.len(), cursor = %self.cursor, "feed chunk");
        Ok(Some(fresh))
    }
}
