use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::BotConfig;
use crate::title::Title;

/// The placeholder token MediaWiki hands out when the session has nothing
/// real to offer. Receiving it on a write path means the login did not take.
const EMPTY_TOKEN: &str = r"+\";

/// How much of an offending payload the error display keeps.
const PAYLOAD_SNIPPET_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Connectivity or HTTP-level failure. Not retried here; the caller
    /// decides whether a fresh sweep is worth starting.
    #[error("MediaWiki request failed")]
    Transport(#[from] reqwest::Error),
    /// The response was not the JSON shape we asked for. The full body is
    /// kept on the variant for offline inspection.
    #[error("MediaWiki response was not the expected JSON: {}", snippet(.body))]
    InvalidJson { body: String },
    /// The API answered with an `error` member; payload preserved verbatim.
    #[error("MediaWiki API error [{code}]: {info}")]
    Api {
        code: String,
        info: String,
        payload: String,
    },
    /// A token request produced the empty placeholder instead of a token.
    #[error("MediaWiki returned an empty {kind} token")]
    MissingToken { kind: &'static str },
    /// Produced by `require_page` when a page that must exist does not.
    #[error("page does not exist: {title}")]
    PageNotFound { title: String },
}

/// One unreviewed entry from the new pages feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedEntry {
    pub title: String,
    #[serde(rename = "pageid")]
    pub page_id: i64,
    #[serde(default)]
    pub creation_date: Option<String>,
}

/// Show-flags for the new pages feed. `nominated` drives the feed's
/// "showdeleted" switch, which means nominated for deletion, not deleted.
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub redirects: bool,
    pub nominated: bool,
    pub others: bool,
}

impl FeedQuery {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            redirects: config.patrol.include_redirects.unwrap_or(false),
            nominated: config.patrol.include_nominated.unwrap_or(true),
            others: config.patrol.include_others.unwrap_or(false),
        }
    }
}

/// A fetched page revision.
#[derive(Debug, Clone)]
pub struct WikiPage {
    pub title: Title,
    pub page_id: i64,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
}

/// A page that transcludes some other page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Transcluder {
    pub ns: i32,
    pub title: String,
}

/// Read-only wiki operations. Everything the verdict logic needs, so tests
/// can exercise it against a scripted fake instead of a live wiki.
pub trait WikiReadApi {
    /// Current text of a page, or None when it does not exist.
    fn fetch_page(&mut self, title: &Title) -> Result<Option<WikiPage>, ApiError>;

    /// Every page transcluding `title`, across continuation boundaries.
    fn embedded_in(&mut self, title: &Title) -> Result<Vec<Transcluder>, ApiError>;

    /// One feed chunk starting at `cursor` (a creation timestamp).
    fn feed_chunk(&mut self, query: &FeedQuery, cursor: &str) -> Result<Vec<FeedEntry>, ApiError>;

    /// The wiki's own clock. Day bucketing follows it, not the local clock.
    fn server_time(&mut self) -> Result<DateTime<Utc>, ApiError>;

    fn request_count(&self) -> usize;

    /// Like `fetch_page`, for callers that need the page to exist.
    fn require_page(&mut self, title: &Title) -> Result<WikiPage, ApiError> {
        self.fetch_page(title)?.ok_or_else(|| ApiError::PageNotFound {
            title: title.prefixed(),
        })
    }
}

/// Mutating wiki operations, on top of the read surface.
pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<(), ApiError>;

    fn edit_page(&mut self, title: &Title, text: &str, summary: &str) -> Result<(), ApiError>;

    /// Mark a feed entry as reviewed, without notifying the page creator.
    fn mark_reviewed(&mut self, page_id: i64) -> Result<(), ApiError>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            api_url: config.api_url().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ_MS", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE_MS", 10_000),
        }
    }
}

/// Synchronous MediaWiki client. One cookie session, one request at a time,
/// paced by the rate limit. Failed requests are surfaced, never retried.
pub struct MediaWikiClient {
    client: Client,
    api_url: Url,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    last_was_write: bool,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            anyhow::bail!("no API endpoint configured; set wiki.api_url or WIKI_API_URL");
        }
        let api_url = Url::parse(&config.api_url)
            .with_context(|| format!("invalid API endpoint: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            api_url,
            config,
            last_request_at: None,
            last_was_write: false,
            request_count: 0,
            csrf_token: None,
        })
    }

    /// Space requests out. A write is followed by the longer write delay
    /// before whatever request comes next, read or write.
    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay_ms = if self.last_was_write {
            self.config.rate_limit_write_ms
        } else {
            self.config.rate_limit_read_ms
        };
        if let Some(last) = self.last_request_at {
            let delay = Duration::from_millis(delay_ms);
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.last_was_write = is_write;
        self.request_count += 1;
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let pairs = build_params(params);
        self.apply_rate_limit(false);
        debug!(action = params_action(params), "GET api");
        let response = self
            .client
            .get(self.api_url.clone())
            .header("User-Agent", self.config.user_agent.clone())
            .query(&pairs)
            .send()?;
        if let Err(error) = response.error_for_status_ref() {
            return Err(ApiError::Transport(error));
        }
        let body = response.text()?;
        parse_api_payload(&body)
    }

    fn request_json_post(&mut self, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let pairs = build_params(params);
        self.apply_rate_limit(true);
        debug!(action = params_action(params), "POST api");
        let response = self
            .client
            .post(self.api_url.clone())
            .header("User-Agent", self.config.user_agent.clone())
            .form(&pairs)
            .send()?;
        if let Err(error) = response.error_for_status_ref() {
            return Err(ApiError::Transport(error));
        }
        let body = response.text()?;
        parse_api_payload(&body)
    }

    /// CSRF token for this session, fetched once and reused.
    fn ensure_csrf_token(&mut self) -> Result<String, ApiError> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let payload = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let raw = payload.to_string();
        let parsed: TokenQueryResponse = decode(payload)?;
        let token = parsed
            .query
            .tokens
            .csrftoken
            .ok_or(ApiError::InvalidJson { body: raw })?;
        if is_empty_token(&token) {
            return Err(ApiError::MissingToken { kind: "csrf" });
        }
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn fetch_page(&mut self, title: &Title) -> Result<Option<WikiPage>, ApiError> {
        let payload = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.prefixed()),
            ("prop", "revisions".to_string()),
            ("rvprop", "ids|timestamp|content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let raw = payload.to_string();
        let parsed: QueryResponse = decode(payload)?;
        let Some(page) = parsed.query.pages.into_iter().next() else {
            return Err(ApiError::InvalidJson { body: raw });
        };
        if page.missing {
            return Ok(None);
        }
        let Some(revision) = page.revisions.into_iter().next() else {
            return Err(ApiError::InvalidJson { body: raw });
        };
        let Some(slot) = revision.slots.and_then(|slots| slots.main) else {
            return Err(ApiError::InvalidJson { body: raw });
        };
        Ok(Some(WikiPage {
            title: Title::from_api(page.ns, &page.title),
            page_id: page.pageid,
            revision_id: revision.revid,
            timestamp: revision.timestamp,
            content: slot.content,
        }))
    }

    fn embedded_in(&mut self, title: &Title) -> Result<Vec<Transcluder>, ApiError> {
        let mut transcluders = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "embeddedin".to_string()),
                ("eititle", title.prefixed()),
                ("eilimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("eicontinue", token.clone()));
            }
            let payload = self.request_json_get(&params)?;
            let parsed: QueryResponse = decode(payload)?;
            transcluders.extend(parsed.query.embeddedin);
            continue_token = parsed.continuation.and_then(|c| c.eicontinue);
            if continue_token.is_none() {
                return Ok(transcluders);
            }
        }
    }

    fn feed_chunk(&mut self, query: &FeedQuery, cursor: &str) -> Result<Vec<FeedEntry>, ApiError> {
        let mut params = vec![
            ("action", "pagetriagelist".to_string()),
            ("namespace", "0".to_string()),
            ("showunreviewed", "1".to_string()),
            ("dir", "oldestfirst".to_string()),
            ("limit", "200".to_string()),
            ("date_range_from", cursor.to_string()),
        ];
        if query.redirects {
            params.push(("showredirs", "1".to_string()));
        }
        if query.nominated {
            params.push(("showdeleted", "1".to_string()));
        }
        if query.others {
            params.push(("showothers", "1".to_string()));
        }
        let payload = self.request_json_get(&params)?;
        let parsed: FeedResponse = decode(payload)?;
        Ok(parsed.pagetriagelist.pages)
    }

    fn server_time(&mut self) -> Result<DateTime<Utc>, ApiError> {
        let payload = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "siteinfo".to_string()),
            ("siprop", "general".to_string()),
        ])?;
        let raw = payload.to_string();
        let parsed: SiteInfoResponse = decode(payload)?;
        DateTime::parse_from_rfc3339(&parsed.query.general.time)
            .map(|time| time.with_timezone(&Utc))
            .map_err(|_| ApiError::InvalidJson { body: raw })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<(), ApiError> {
        let payload = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let raw = payload.to_string();
        let parsed: TokenQueryResponse = decode(payload)?;
        let login_token = parsed
            .query
            .tokens
            .logintoken
            .ok_or(ApiError::InvalidJson { body: raw })?;
        if is_empty_token(&login_token) {
            return Err(ApiError::MissingToken { kind: "login" });
        }

        let payload = self.request_json_post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        let raw = payload.to_string();
        let parsed: LoginResponse = decode(payload)?;
        match parsed.login {
            Some(login) if login.result == "Success" => {
                // Tokens issued before login belong to the anonymous session.
                self.csrf_token = None;
                Ok(())
            }
            Some(login) => Err(ApiError::Api {
                code: "login_failed".to_string(),
                info: login.reason.unwrap_or(login.result),
                payload: raw,
            }),
            None => Err(ApiError::InvalidJson { body: raw }),
        }
    }

    fn edit_page(&mut self, title: &Title, text: &str, summary: &str) -> Result<(), ApiError> {
        let token = self.ensure_csrf_token()?;
        let payload = self.request_json_post(&[
            ("action", "edit".to_string()),
            ("title", title.prefixed()),
            ("text", text.to_string()),
            ("summary", summary.to_string()),
            ("bot", "1".to_string()),
            ("token", token),
        ])?;
        let raw = payload.to_string();
        let parsed: EditResponse = decode(payload)?;
        match parsed.edit {
            Some(edit) if edit.result.as_deref() == Some("Success") => Ok(()),
            _ => Err(ApiError::Api {
                code: "edit_failed".to_string(),
                info: format!("edit of {} did not succeed", title.prefixed()),
                payload: raw,
            }),
        }
    }

    fn mark_reviewed(&mut self, page_id: i64) -> Result<(), ApiError> {
        let token = self.ensure_csrf_token()?;
        let payload = self.request_json_post(&[
            ("action", "pagetriageaction".to_string()),
            ("pageid", page_id.to_string()),
            ("reviewed", "1".to_string()),
            ("skipnotif", "1".to_string()),
            ("token", token),
        ])?;
        let raw = payload.to_string();
        let parsed: PageTriageActionResponse = decode(payload)?;
        match parsed.pagetriageaction {
            Some(action) if action.result.as_deref() == Some("success") => Ok(()),
            _ => Err(ApiError::Api {
                code: "review_failed".to_string(),
                info: format!("review of page id {page_id} did not succeed"),
                payload: raw,
            }),
        }
    }
}

/// Decode a response body, mapping non-JSON bodies and API-level `error`
/// members to their error variants.
fn parse_api_payload(body: &str) -> Result<Value, ApiError> {
    let payload: Value = serde_json::from_str(body).map_err(|_| ApiError::InvalidJson {
        body: body.to_string(),
    })?;
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("no further information")
            .to_string();
        return Err(ApiError::Api {
            code,
            info,
            payload: payload.to_string(),
        });
    }
    Ok(payload)
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    let raw = payload.to_string();
    serde_json::from_value(payload).map_err(|_| ApiError::InvalidJson { body: raw })
}

fn is_empty_token(token: &str) -> bool {
    token.is_empty() || token == EMPTY_TOKEN
}

/// Fixed parameters every request carries, plus the caller's, with empty
/// values dropped.
fn build_params(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("format".to_string(), "json".to_string()),
        ("formatversion".to_string(), "2".to_string()),
    ];
    for (key, value) in params {
        if value.is_empty() {
            continue;
        }
        pairs.push((key.to_string(), value.clone()));
    }
    pairs
}

fn params_action<'a>(params: &'a [(&str, String)]) -> &'a str {
    params
        .iter()
        .find(|(key, _)| *key == "action")
        .map(|(_, value)| value.as_str())
        .unwrap_or("unknown")
}

fn snippet(body: &str) -> String {
    if body.len() <= PAYLOAD_SNIPPET_LEN {
        return body.to_string();
    }
    let mut cut = PAYLOAD_SNIPPET_LEN;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &body[..cut])
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    query: QueryPayload,
    #[serde(rename = "continue")]
    continuation: Option<ContinuePayload>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct QueryPayload {
    pages: Vec<PageQueryItem>,
    embeddedin: Vec<Transcluder>,
}

#[derive(Debug, Deserialize)]
struct ContinuePayload {
    eicontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    #[serde(default)]
    pageid: i64,
    ns: i32,
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    timestamp: String,
    slots: Option<RevisionSlots>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlots {
    main: Option<RevisionSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TokenQueryResponse {
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize)]
struct TokenQueryPayload {
    tokens: TokenSet,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TokenSet {
    csrftoken: Option<String>,
    logintoken: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    login: Option<LoginPayload>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    result: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize)]
struct EditPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageTriageActionResponse {
    pagetriageaction: Option<PageTriageActionPayload>,
}

#[derive(Debug, Deserialize)]
struct PageTriageActionPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    pagetriagelist: FeedPayload,
}

#[derive(Debug, Deserialize)]
struct FeedPayload {
    #[serde(default)]
    pages: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct SiteInfoResponse {
    query: SiteInfoPayload,
}

#[derive(Debug, Deserialize)]
struct SiteInfoPayload {
    general: SiteInfoGeneral,
}

#[derive(Debug, Deserialize)]
struct SiteInfoGeneral {
    time: String,
}

#[cfg(test)]
mod tests {
    use super::{ApiError, is_empty_token, parse_api_payload, snippet};

    #[test]
    fn api_level_errors_are_lifted_out_of_the_payload() {
        let body = r#"{"error":{"code":"badtoken","info":"Invalid CSRF token."}}"#;
        match parse_api_payload(body) {
            Err(ApiError::Api { code, info, .. }) => {
                assert_eq!(code, "badtoken");
                assert_eq!(info, "Invalid CSRF token.");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn non_json_bodies_keep_the_raw_text() {
        match parse_api_payload("<html>maintenance</html>") {
            Err(ApiError::InvalidJson { body }) => {
                assert!(body.contains("maintenance"));
            }
            other => panic!("expected InvalidJson, got {other:?}"),
        }
    }

    #[test]
    fn valid_payloads_pass_through() {
        let payload = parse_api_payload(r#"{"query":{"pages":[]}}"#).unwrap();
        assert!(payload.get("query").is_some());
    }

    #[test]
    fn empty_token_placeholder_is_recognized() {
        assert!(is_empty_token(""));
        assert!(is_empty_token(r"+\"));
        assert!(!is_empty_token("0123456789abcdef+\\"));
    }

    #[test]
    fn long_payload_snippets_are_truncated() {
        let long = "x".repeat(500);
        let shown = snippet(&long);
        assert!(shown.len() < 250);
        assert!(shown.ends_with("..."));
    }
}
