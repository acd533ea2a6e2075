//! Wikitext scanning for nomination templates and forum-log anchors.
//!
//! Deliberately not a general wikitext parser: the bot only recognizes the
//! handful of constructs the deletion-discussion workflow produces.

/// The escaping wrapper the nomination macro leaves behind so it survives
/// substitution. Stripped before template names are read.
const SUBST_WRAPPER: &str = "<includeonly>safesubst:</includeonly>";

/// Template names that mark a page as nominated for discussion.
const NOMINATION_TEMPLATE_NAMES: [&str; 2] = ["#invoke:RfD", "Rfd-NPF/core"];

/// Date parameters read off a nomination template, verbatim as written on
/// the page. They name a forum log page; nothing validates them against a
/// calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NominationDate {
    pub year: String,
    pub month: String,
    pub day: String,
}

/// Scan page text for a nomination template and pull out its date
/// parameters. Returns None when the page carries no complete nomination.
pub fn find_nomination(wikitext: &str) -> Option<NominationDate> {
    let text = wikitext.replace(SUBST_WRAPPER, "");
    for call in scan_templates(&text) {
        if !NOMINATION_TEMPLATE_NAMES.contains(&call.name.as_str()) {
            continue;
        }
        let (Some(year), Some(month), Some(day)) =
            (call.param("year"), call.param("month"), call.param("day"))
        else {
            // A name match without the date parameters cannot name a log
            // page; keep scanning in case a complete invocation follows.
            continue;
        };
        return Some(NominationDate {
            year: year.to_string(),
            month: month.to_string(),
            day: day.to_string(),
        });
    }
    None
}

/// True when the log page text carries an entry anchored to `anchor`,
/// either as a section heading or as an id attribute on a span tag.
pub fn anchor_in(log_wikitext: &str, anchor: &str) -> bool {
    let target = compress_ws(anchor);
    if log_wikitext
        .lines()
        .any(|line| heading_title(line).is_some_and(|title| compress_ws(&title) == target))
    {
        return true;
    }
    span_anchor_matches(log_wikitext, &target)
}

#[derive(Debug, Clone)]
struct TemplateCall {
    name: String,
    params: Vec<(String, String)>,
}

impl TemplateCall {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Collect every `{{...}}` invocation in the text, including nested ones.
fn scan_templates(text: &str) -> Vec<TemplateCall> {
    let chars: Vec<char> = text.chars().collect();
    let mut calls = Vec::new();
    let mut index = 0;
    while index + 1 < chars.len() {
        if chars[index] == '{'
            && chars[index + 1] == '{'
            && (index == 0 || chars[index - 1] != '{')
            && let Some(body) = braced_body(&chars, index)
        {
            calls.push(parse_invocation(&body));
        }
        index += 1;
    }
    calls
}

/// Body of the `{{...}}` pair opening at `start`, or None when unbalanced.
fn braced_body(chars: &[char], start: usize) -> Option<String> {
    let mut depth = 0usize;
    let mut cursor = start;
    while cursor + 1 < chars.len() {
        if chars[cursor] == '{' && chars[cursor + 1] == '{' {
            depth += 1;
            cursor += 2;
            continue;
        }
        if chars[cursor] == '}' && chars[cursor + 1] == '}' {
            depth -= 1;
            if depth == 0 {
                return Some(chars[start + 2..cursor].iter().collect());
            }
            cursor += 2;
            continue;
        }
        cursor += 1;
    }
    None
}

/// Split a template body into name and named parameters. The pipes that
/// separate parameters only count at nesting depth zero, so templates and
/// links inside parameter values stay whole.
fn parse_invocation(body: &str) -> TemplateCall {
    let chars: Vec<char> = body.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut index = 0;
    while index < chars.len() {
        if index + 1 < chars.len() {
            let pair = (chars[index], chars[index + 1]);
            if pair == ('{', '{') || pair == ('[', '[') {
                depth += 1;
                current.push(pair.0);
                current.push(pair.1);
                index += 2;
                continue;
            }
            if pair == ('}', '}') || pair == (']', ']') {
                depth = depth.saturating_sub(1);
                current.push(pair.0);
                current.push(pair.1);
                index += 2;
                continue;
            }
        }
        let ch = chars[index];
        if ch == '|' && depth == 0 {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
        index += 1;
    }
    segments.push(current);

    let name = compress_ws(&segments[0]);
    let mut params = Vec::new();
    for segment in &segments[1..] {
        if let Some((key, value)) = segment.split_once('=') {
            params.push((key.trim().to_string(), value.trim().to_string()));
        }
        // Positional parameters are ignored; the nomination macro only
        // uses named ones.
    }
    TemplateCall { name, params }
}

/// Title text of a heading line (`== ... ==` through `====== ... ======`),
/// or None. Level-1 headings are valid markup but conventionally reserved
/// for page titles; forum entries never use them.
fn heading_title(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let start = trimmed.chars().take_while(|ch| *ch == '=').count();
    let end = trimmed.chars().rev().take_while(|ch| *ch == '=').count();
    if start < 2 || start != end || start > 6 || trimmed.len() < start + end + 1 {
        return None;
    }
    let content = trimmed[start..trimmed.len() - end].trim();
    if content.is_empty() {
        return None;
    }
    Some(content.to_string())
}

fn span_anchor_matches(text: &str, target: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    let mut offset = 0;
    while let Some(found) = lowered[offset..].find("<span") {
        let tag_start = offset + found + "<span".len();
        // Reject longer tag names sharing the prefix.
        if text[tag_start..]
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphanumeric())
        {
            offset = tag_start;
            continue;
        }
        let Some(tag_len) = text[tag_start..].find('>') else {
            return false;
        };
        let tag_body = text[tag_start..tag_start + tag_len].trim_end_matches('/');
        if let Some(id_value) = attribute_value(tag_body, "id")
            && compress_ws(&id_value) == target
        {
            return true;
        }
        offset = tag_start + tag_len + 1;
    }
    false
}

/// Value of the named attribute inside a tag body, handling quoted values
/// that contain spaces. Returns None when the attribute is absent or bare.
fn attribute_value(tag_body: &str, name: &str) -> Option<String> {
    let mut rest = tag_body;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return None;
        }
        let name_end = rest
            .find(|ch: char| ch == '=' || ch.is_whitespace())
            .unwrap_or(rest.len());
        let attr = &rest[..name_end];
        let tail = rest[name_end..].trim_start();
        let Some(tail) = tail.strip_prefix('=') else {
            // Bare attribute with no value; it cannot anchor anything.
            rest = tail;
            continue;
        };
        let tail = tail.trim_start();
        let (value, after) = match tail.chars().next() {
            Some(quote @ ('"' | '\'')) => match tail[1..].find(quote) {
                Some(close) => (&tail[1..1 + close], &tail[2 + close..]),
                None => (&tail[1..], ""),
            },
            _ => {
                let end = tail.find(char::is_whitespace).unwrap_or(tail.len());
                (&tail[..end], &tail[end..])
            }
        };
        if attr.eq_ignore_ascii_case(name) {
            return Some(value.to_string());
        }
        rest = after;
    }
}

pub(crate) fn compress_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
