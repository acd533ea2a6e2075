//! Scripted in-memory wiki for unit tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::api::{
    ApiError, FeedEntry, FeedQuery, Transcluder, WikiPage, WikiReadApi, WikiWriteApi,
};
use crate::title::Title;

/// Fake API client backed by in-memory maps. Pages edited through it update
/// the map, so a later fetch sees the new text the way a live wiki would.
pub struct MockApi {
    pub pages: BTreeMap<String, WikiPage>,
    /// Scripted feed responses, one per `feed_chunk` call, in order. Calls
    /// past the end of the script return an empty chunk.
    pub feed: Vec<Vec<FeedEntry>>,
    pub feed_cursors: Vec<String>,
    pub embedded: BTreeMap<String, Vec<Transcluder>>,
    pub reviewed: Vec<i64>,
    /// Every edit made, as (prefixed title, text, summary).
    pub edits: Vec<(String, String, String)>,
    pub now: DateTime<Utc>,
    pub logged_in: bool,
    pub requests: usize,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            feed: Vec::new(),
            feed_cursors: Vec::new(),
            embedded: BTreeMap::new(),
            reviewed: Vec::new(),
            edits: Vec::new(),
            now: DateTime::UNIX_EPOCH,
            logged_in: false,
            requests: 0,
        }
    }

    pub fn insert_page(&mut self, title: Title, page_id: i64, content: &str) {
        let page = WikiPage {
            title: title.clone(),
            page_id,
            revision_id: page_id * 10,
            timestamp: "2024-01-05T00:00:00Z".to_string(),
            content: content.to_string(),
        };
        self.pages.insert(title.prefixed(), page);
    }

    pub fn page_text(&self, title: &Title) -> Option<&str> {
        self.pages
            .get(&title.prefixed())
            .map(|page| page.content.as_str())
    }

    pub fn edits_to(&self, title: &Title) -> Vec<&(String, String, String)> {
        let prefixed = title.prefixed();
        self.edits.iter().filter(|(t, _, _)| *t == prefixed).collect()
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl WikiReadApi for MockApi {
    fn fetch_page(&mut self, title: &Title) -> Result<Option<WikiPage>, ApiError> {
        self.requests += 1;
        Ok(self.pages.get(&title.prefixed()).cloned())
    }

    fn embedded_in(&mut self, title: &Title) -> Result<Vec<Transcluder>, ApiError> {
        self.requests += 1;
        Ok(self
            .embedded
            .get(&title.prefixed())
            .cloned()
            .unwrap_or_default())
    }

    fn feed_chunk(&mut self, _query: &FeedQuery, cursor: &str) -> Result<Vec<FeedEntry>, ApiError> {
        self.requests += 1;
        self.feed_cursors.push(cursor.to_string());
        let call_index = self.feed_cursors.len() - 1;
        Ok(self.feed.get(call_index).cloned().unwrap_or_default())
    }

    fn server_time(&mut self) -> Result<DateTime<Utc>, ApiError> {
        self.requests += 1;
        Ok(self.now)
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}

impl WikiWriteApi for MockApi {
    fn login(&mut self, _username: &str, _password: &str) -> Result<(), ApiError> {
        self.requests += 1;
        self.logged_in = true;
        Ok(())
    }

    fn edit_page(&mut self, title: &Title, text: &str, summary: &str) -> Result<(), ApiError> {
        self.requests += 1;
        self.edits
            .push((title.prefixed(), text.to_string(), summary.to_string()));
        let page = self
            .pages
            .entry(title.prefixed())
            .or_insert_with(|| WikiPage {
                title: title.clone(),
                page_id: 0,
                revision_id: 0,
                timestamp: String::new(),
                content: String::new(),
            });
        page.content = text.to_string();
        page.revision_id += 1;
        Ok(())
    }

    fn mark_reviewed(&mut self, page_id: i64) -> Result<(), ApiError> {
        self.requests += 1;
        self.reviewed.push(page_id);
        Ok(())
    }
}
