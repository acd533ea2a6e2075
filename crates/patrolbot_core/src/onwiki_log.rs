use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::api::{WikiReadApi, WikiWriteApi};
use crate::config::BotConfig;
use crate::title::{Namespace, Title};

pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S (UTC)";

/// One recorded omission. `page` is stored in wikilink-target form (leading
/// colon for mainspace) so stored keys match the rendered messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub page: String,
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

/// Day key (wiki server date) to the events recorded that day.
pub type LogData = BTreeMap<String, Vec<LogEvent>>;

/// A JSON log kept on a wiki page.
///
/// The store is read fresh before every mutation and written back only when
/// something actually changed, so a run that finds nothing new costs no
/// edits. A page is recorded at most once across all days; repeat findings
/// are dropped until cleanup retires the entry.
pub struct OnWikiLog {
    title: Title,
    max_age_days: i64,
}

struct LoadedStore {
    data: LogData,
    fingerprint: String,
}

impl OnWikiLog {
    pub fn new(title: Title, max_age_days: i64) -> Self {
        Self {
            title,
            max_age_days,
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            Title::new(Namespace::User, &config.log_title()),
            config.max_log_age_days(),
        )
    }

    pub fn title(&self) -> &Title {
        &self.title
    }

    /// Record one event for `page` under today's server-time day key.
    /// A page already present anywhere in the store is left alone.
    pub fn log<A: WikiWriteApi>(
        &self,
        api: &mut A,
        code: &str,
        page: &Title,
        message: String,
    ) -> Result<()> {
        let mut store = self.load(api)?;
        let key = page.link_target();
        if contains_page(&store.data, &key) {
            debug!(page = %page, "already logged; leaving the existing entry");
            return Ok(());
        }
        let now = api.server_time()?;
        let day = now.format(DAY_KEY_FORMAT).to_string();
        store.data.entry(day).or_default().push(LogEvent {
            page: key.clone(),
            code: code.to_string(),
            message,
            timestamp: now.format(EVENT_TIMESTAMP_FORMAT).to_string(),
        });
        let summary = format!("Logging [[{key}]] (code {code})");
        self.persist(api, store, &summary)
    }

    /// Retire entries that no longer need attention: whole days older than
    /// the age limit go first, then entries whose page is no longer pending
    /// review, then any day left empty.
    pub fn cleanup<A: WikiWriteApi>(
        &self,
        api: &mut A,
        still_pending: &BTreeSet<String>,
    ) -> Result<()> {
        let mut store = self.load(api)?;
        let today = api.server_time()?.date_naive();
        let days: Vec<String> = store.data.keys().cloned().collect();
        for day in days {
            if self.day_expired(&day, today)? {
                store.data.remove(&day);
                continue;
            }
            let Some(events) = store.data.get_mut(&day) else {
                continue;
            };
            events.retain(|event| {
                let bare = event.page.strip_prefix(':').unwrap_or(&event.page);
                still_pending.contains(bare)
            });
            if events.is_empty() {
                store.data.remove(&day);
            }
        }
        self.persist(api, store, "Removing old and/or reviewed entries.")
    }

    fn day_expired(&self, day: &str, today: NaiveDate) -> Result<bool> {
        let date = NaiveDate::parse_from_str(day, DAY_KEY_FORMAT).with_context(|| {
            format!("malformed day key {day:?} in {}", self.title.prefixed())
        })?;
        Ok(today - date > Duration::days(self.max_age_days))
    }

    fn load<A: WikiReadApi>(&self, api: &mut A) -> Result<LoadedStore> {
        let text = match api.fetch_page(&self.title)? {
            Some(page) => page.content,
            None => String::new(),
        };
        let trimmed = text.trim();
        let data: LogData = if trimmed.is_empty() {
            LogData::new()
        } else {
            serde_json::from_str(trimmed).with_context(|| {
                format!("log page {} does not hold valid JSON", self.title.prefixed())
            })?
        };
        let fingerprint = store_fingerprint(&data)?;
        Ok(LoadedStore { data, fingerprint })
    }

    fn persist<A: WikiWriteApi>(&self, api: &mut A, store: LoadedStore, summary: &str) -> Result<()> {
        if store_fingerprint(&store.data)? == store.fingerprint {
            debug!(log = %self.title, "log store unchanged; not writing");
            return Ok(());
        }
        let body =
            serde_json::to_string(&store.data).context("failed to serialize the log store")?;
        info!(log = %self.title, summary, "writing log store");
        api.edit_page(&self.title, &body, summary)?;
        Ok(())
    }
}

fn contains_page(data: &LogData, page: &str) -> bool {
    data.values().flatten().any(|event| event.page == page)
}

fn store_fingerprint(data: &LogData) -> Result<String> {
    let canonical =
        serde_json::to_string(data).context("failed to serialize the log store")?;
    let digest = Sha256::digest(canonical.as_bytes());
    let mut fingerprint = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        fingerprint.push_str(&format!("{byte:02x}"));
    }
    Ok(fingerprint)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::{LogData, OnWikiLog};
    use crate::testing::MockApi;
    use crate::title::{Namespace, Title};

    fn log_title() -> Title {
        Title::new(Namespace::User, "Patrolbot/logs/skippedRfDs.json")
    }

    fn stored_data(api: &MockApi) -> LogData {
        let text = api.page_text(&log_title()).expect("log page");
        serde_json::from_str(text).expect("valid store")
    }

    #[test]
    fn first_event_creates_the_day_bucket() {
        let mut api = MockApi::new();
        api.now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 30, 0).unwrap();
        let log = OnWikiLog::new(log_title(), 7);

        log.log(&mut api, "RFD1", &Title::mainspace("Widget"), "[[:Widget]] not filed.".to_string())
            .expect("log");

        let data = stored_data(&api);
        let events = data.get("2024-01-10").expect("day bucket");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].page, ":Widget");
        assert_eq!(events[0].code, "RFD1");
        assert_eq!(events[0].timestamp, "2024-01-10 12:30:00 (UTC)");
        assert_eq!(api.edits.len(), 1);
        assert_eq!(api.edits[0].2, "Logging [[:Widget]] (code RFD1)");
    }

    #[test]
    fn repeat_findings_for_a_page_are_dropped() {
        let mut api = MockApi::new();
        api.now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let log = OnWikiLog::new(log_title(), 7);

        log.log(&mut api, "RFD1", &Title::mainspace("Widget"), "first".to_string())
            .expect("log");
        // Next sweep, different code, same page: still one entry, no edit.
        api.now = Utc.with_ymd_and_hms(2024, 1, 11, 9, 0, 0).unwrap();
        log.log(&mut api, "RFD2", &Title::mainspace("Widget"), "second".to_string())
            .expect("log");

        let data = stored_data(&api);
        assert_eq!(data.len(), 1);
        assert_eq!(data["2024-01-10"].len(), 1);
        assert_eq!(data["2024-01-10"][0].message, "first");
        assert_eq!(api.edits.len(), 1);
    }

    #[test]
    fn cleanup_retires_old_handled_and_empty_days() {
        let mut api = MockApi::new();
        api.now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 30, 0).unwrap();
        let seeded = concat!(
            "{",
            "\"2024-01-01\":[{\"page\":\":Old\",\"code\":\"RFD1\",\"message\":\"m\",\"timestamp\":\"t\"}],",
            "\"2024-01-05\":[",
            "{\"page\":\":Keep\",\"code\":\"RFD1\",\"message\":\"m\",\"timestamp\":\"t\"},",
            "{\"page\":\":Gone\",\"code\":\"RFD2\",\"message\":\"m\",\"timestamp\":\"t\"}],",
            "\"2024-01-08\":[{\"page\":\":Handled\",\"code\":\"RFD0\",\"message\":\"m\",\"timestamp\":\"t\"}]",
            "}",
        );
        api.insert_page(log_title(), 77, seeded);
        let log = OnWikiLog::new(log_title(), 7);

        let pending: BTreeSet<String> = ["Old", "Keep"].iter().map(|s| s.to_string()).collect();
        log.cleanup(&mut api, &pending).expect("cleanup");

        let data = stored_data(&api);
        // 2024-01-01 is nine days old: dropped wholesale, pending or not.
        assert!(!data.contains_key("2024-01-01"));
        // 2024-01-05 keeps only the still-pending entry.
        let kept: Vec<&str> = data["2024-01-05"].iter().map(|e| e.page.as_str()).collect();
        assert_eq!(kept, vec![":Keep"]);
        // 2024-01-08 lost its only entry and disappears with it.
        assert!(!data.contains_key("2024-01-08"));
        assert_eq!(api.edits.len(), 1);
        assert_eq!(api.edits[0].2, "Removing old and/or reviewed entries.");
    }

    #[test]
    fn day_exactly_at_the_age_limit_survives() {
        let mut api = MockApi::new();
        api.now = Utc.with_ymd_and_hms(2024, 1, 10, 23, 59, 0).unwrap();
        api.insert_page(
            log_title(),
            77,
            "{\"2024-01-03\":[{\"page\":\":Keep\",\"code\":\"RFD1\",\"message\":\"m\",\"timestamp\":\"t\"}]}",
        );
        let log = OnWikiLog::new(log_title(), 7);
        let pending: BTreeSet<String> = ["Keep"].iter().map(|s| s.to_string()).collect();
        log.cleanup(&mut api, &pending).expect("cleanup");

        assert!(stored_data(&api).contains_key("2024-01-03"));
        // Nothing changed, so nothing was written.
        assert!(api.edits.is_empty());
    }

    #[test]
    fn cleanup_of_a_missing_log_page_writes_nothing() {
        let mut api = MockApi::new();
        api.now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let log = OnWikiLog::new(log_title(), 7);
        log.cleanup(&mut api, &BTreeSet::new()).expect("cleanup");
        assert!(api.edits.is_empty());
        assert!(api.page_text(&log_title()).is_none());
    }

    #[test]
    fn malformed_store_is_an_error() {
        let mut api = MockApi::new();
        api.insert_page(log_title(), 77, "not json at all");
        let log = OnWikiLog::new(log_title(), 7);
        let error = log
            .log(&mut api, "RFD1", &Title::mainspace("Widget"), "m".to_string())
            .expect_err("malformed store");
        assert!(error.to_string().contains("valid JSON"));
    }
}
