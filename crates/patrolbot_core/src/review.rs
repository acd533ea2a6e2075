use std::collections::BTreeSet;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::api::{FeedEntry, FeedQuery, WikiWriteApi};
use crate::onwiki_log::OnWikiLog;
use crate::queue::QueuePager;
use crate::title::Title;
use crate::verify::{self, ForumSettings, Verification};

/// Progress of one pass over the feed. Reconciliation only starts once the
/// feed is fully drained, so the pending set is complete when the log is
/// pruned against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Sweeping,
    Reconciling,
    Done,
}

/// Counters for one completed sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub reviewed: usize,
    pub flagged: usize,
    pub skipped: usize,
    pub vanished: usize,
    pub request_count: usize,
}

/// Drives one sweep: drain the unreviewed feed, verify every entry, mark
/// the complete ones reviewed, then reconcile the on-wiki log against what
/// is still pending.
pub struct ReviewController {
    forum: ForumSettings,
    log: OnWikiLog,
    feed: FeedQuery,
    phase: SweepPhase,
    unreviewed_titles: BTreeSet<String>,
    report: SweepReport,
}

impl ReviewController {
    pub fn new(forum: ForumSettings, log: OnWikiLog, feed: FeedQuery) -> Self {
        Self {
            forum,
            log,
            feed,
            phase: SweepPhase::Sweeping,
            unreviewed_titles: BTreeSet::new(),
            report: SweepReport::default(),
        }
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    /// Titles seen this sweep and still awaiting review.
    pub fn pending(&self) -> &BTreeSet<String> {
        &self.unreviewed_titles
    }

    pub fn run<A: WikiWriteApi>(&mut self, api: &mut A) -> Result<SweepReport> {
        self.phase = SweepPhase::Sweeping;
        let mut pager = QueuePager::new(self.feed.clone());
        while let Some(chunk) = pager.next_chunk(api)? {
            for entry in chunk {
                self.handle_entry(api, entry)?;
            }
        }

        self.phase = SweepPhase::Reconciling;
        info!(
            pending = self.unreviewed_titles.len(),
            "feed drained; reconciling the log"
        );
        self.log.cleanup(api, &self.unreviewed_titles)?;

        self.phase = SweepPhase::Done;
        self.report.request_count = api.request_count();
        Ok(self.report.clone())
    }

    fn handle_entry<A: WikiWriteApi>(&mut self, api: &mut A, entry: FeedEntry) -> Result<()> {
        self.report.scanned += 1;
        self.unreviewed_titles.insert(entry.title.clone());
        let title = Title::mainspace(&entry.title);
        let Some(page) = api.fetch_page(&title)? else {
            // Deleted between the feed listing and the fetch; the feed will
            // stop returning it on its own.
            debug!(title = %title, "feed entry no longer exists");
            self.report.vanished += 1;
            return Ok(());
        };
        match verify::verify(api, &self.log, &self.forum, &page)? {
            Verification::Filed => {
                api.mark_reviewed(page.page_id)?;
                info!(title = %title, "nomination verified; marked reviewed");
                self.unreviewed_titles.remove(&entry.title);
                self.report.reviewed += 1;
            }
            Verification::NotNominated => {
                debug!(title = %title, "no nomination template; leaving for human review");
                self.report.skipped += 1;
            }
            Verification::Unfiled | Verification::FiledNotTranscluded => {
                self.report.flagged += 1;
            }
        }
        Ok(())
    }
}
