use anyhow::Result;
use tracing::{debug, info};

use crate::api::{ApiError, Transcluder, WikiPage, WikiReadApi, WikiWriteApi};
use crate::config::BotConfig;
use crate::matcher::{self, NominationDate};
use crate::onwiki_log::OnWikiLog;
use crate::title::{Namespace, Title, normalize_name};

/// Where a page stands with respect to the deletion forum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// No nomination template on the page. Not this bot's business.
    NotNominated,
    /// Nominated, but absent from the forum log page the template names.
    Unfiled,
    /// Present on the log page, but the log page is not yet transcluded
    /// onto the forum's main page, so nobody is seeing the discussion.
    FiledNotTranscluded,
    /// Nominated, filed and visible. Safe to mark reviewed.
    Filed,
}

/// Codes stored in the on-wiki log. The numbering is part of the log format
/// and stays stable even if new codes are ever added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCode {
    NotFiledRedlink,
    NotFiled,
    NotTranscluded,
}

impl SkipCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFiledRedlink => "RFD0",
            Self::NotFiled => "RFD1",
            Self::NotTranscluded => "RFD2",
        }
    }

    /// Human-readable log message naming the page and the log page the
    /// nomination should have landed on.
    pub fn render(self, page: &Title, forum_log: &Title) -> String {
        let page = page.link_target();
        let log = forum_log.link_target();
        match self {
            Self::NotFiledRedlink => {
                format!("[[{page}]] not filed to [[{log}]] (currently a redlink).")
            }
            Self::NotFiled => format!("[[{page}]] not filed to [[{log}]]."),
            Self::NotTranscluded => format!(
                "[[{page}]] filed to [[{log}]], but that log page has not been transcluded to the main discussion page."
            ),
        }
    }
}

/// Forum location. `root` is the discussion venue's base page in the
/// project namespace; daily logs hang off it as subpages.
#[derive(Debug, Clone)]
pub struct ForumSettings {
    root: String,
}

impl ForumSettings {
    pub fn new(root: &str) -> Self {
        Self {
            root: normalize_name(root),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(&config.forum_root())
    }

    /// The main forum page every day log must be transcluded onto.
    pub fn forum_page(&self) -> Title {
        Title::new(Namespace::Project, &self.root)
    }

    /// Day log title for a nomination date, built verbatim from the
    /// template's parameters.
    pub fn log_page(&self, date: &NominationDate) -> Title {
        Title::new(
            Namespace::Project,
            &format!("{}/Log/{} {} {}", self.root, date.year, date.month, date.day),
        )
    }

    /// Whether a transcluder is the main forum page itself. The server
    /// reports its own prefix for the project namespace, so the comparison
    /// goes through the namespace id and the local name.
    fn is_main_forum(&self, transcluder: &Transcluder) -> bool {
        if transcluder.ns != Namespace::Project.id() {
            return false;
        }
        let local = transcluder
            .title
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(&transcluder.title);
        normalize_name(local) == self.root
    }
}

/// A classification plus the context needed to log it.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub verification: Verification,
    /// Present for every nominated-but-incomplete verdict: the code to
    /// record and the forum log page it refers to.
    pub skip: Option<(SkipCode, Title)>,
}

/// Work out where `page` stands. Read-only: no review, no log writes.
pub fn classify<A: WikiReadApi>(
    api: &mut A,
    forum: &ForumSettings,
    page: &WikiPage,
) -> Result<Outcome> {
    let Some(date) = matcher::find_nomination(&page.content) else {
        return Ok(Outcome {
            verification: Verification::NotNominated,
            skip: None,
        });
    };
    let log_title = forum.log_page(&date);
    let log_page = match api.require_page(&log_title) {
        Ok(log_page) => log_page,
        Err(ApiError::PageNotFound { .. }) => {
            debug!(page = %page.title, log = %log_title, "named forum log page does not exist");
            return Ok(Outcome {
                verification: Verification::Unfiled,
                skip: Some((SkipCode::NotFiledRedlink, log_title)),
            });
        }
        Err(error) => return Err(error.into()),
    };
    if !matcher::anchor_in(&log_page.content, &page.title.anchor()) {
        return Ok(Outcome {
            verification: Verification::Unfiled,
            skip: Some((SkipCode::NotFiled, log_title)),
        });
    }
    let transcluders = api.embedded_in(&log_title)?;
    if !transcluders.iter().any(|t| forum.is_main_forum(t)) {
        debug!(log = %log_title, "day log is not transcluded onto the main forum page");
        return Ok(Outcome {
            verification: Verification::FiledNotTranscluded,
            skip: Some((SkipCode::NotTranscluded, log_title)),
        });
    }
    Ok(Outcome {
        verification: Verification::Filed,
        skip: None,
    })
}

/// Classify `page` and record any incomplete nomination in the on-wiki log.
pub fn verify<A: WikiWriteApi>(
    api: &mut A,
    log: &OnWikiLog,
    forum: &ForumSettings,
    page: &WikiPage,
) -> Result<Verification> {
    let outcome = classify(api, forum, page)?;
    if let Some((code, log_title)) = &outcome.skip {
        info!(page = %page.title, code = code.as_str(), "nomination incomplete");
        let message = code.render(&page.title, log_title);
        log.log(api, code.as_str(), &page.title, message)?;
    }
    Ok(outcome.verification)
}
