use std::fmt;

/// Namespaces the bot works in, with their canonical numeric ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Main,
    Talk,
    User,
    Project,
    Template,
    Category,
}

impl Namespace {
    pub fn id(self) -> i32 {
        match self {
            Self::Main => 0,
            Self::Talk => 1,
            Self::User => 2,
            Self::Project => 4,
            Self::Template => 10,
            Self::Category => 14,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Main => "",
            Self::Talk => "Talk:",
            Self::User => "User:",
            Self::Project => "Project:",
            Self::Template => "Template:",
            Self::Category => "Category:",
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Main),
            1 => Some(Self::Talk),
            2 => Some(Self::User),
            4 => Some(Self::Project),
            10 => Some(Self::Template),
            14 => Some(Self::Category),
            _ => None,
        }
    }
}

/// A page title: namespace plus normalized local name.
///
/// Normalization turns underscores into spaces and collapses whitespace runs,
/// so titles copied from URLs, feed entries and page text all compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Title {
    namespace: Namespace,
    name: String,
}

impl Title {
    pub fn new(namespace: Namespace, name: &str) -> Self {
        Self {
            namespace,
            name: normalize_name(name),
        }
    }

    pub fn mainspace(name: &str) -> Self {
        Self::new(Namespace::Main, name)
    }

    /// Build a title from an API response's `ns` and prefixed `title` fields.
    /// The prefix the server used may be a site-specific alias, so everything
    /// up to the first colon is dropped for non-main namespaces.
    pub fn from_api(ns: i32, full_title: &str) -> Self {
        let Some(namespace) = Namespace::from_id(ns) else {
            // Unknown namespace: keep the prefixed form whole so round trips
            // back to the API stay intact.
            return Self::new(Namespace::Main, full_title);
        };
        let name = if namespace == Namespace::Main {
            full_title
        } else {
            full_title
                .split_once(':')
                .map(|(_, rest)| rest)
                .unwrap_or(full_title)
        };
        Self::new(namespace, name)
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full title the way API parameters expect it, without a leading colon.
    pub fn prefixed(&self) -> String {
        format!("{}{}", self.namespace.prefix(), self.name)
    }

    /// Wikilink target form: mainspace titles carry the explicit leading
    /// colon so `[[...]]` links to the page instead of transcluding it.
    pub fn link_target(&self) -> String {
        match self.namespace {
            Namespace::Main => format!(":{}", self.name),
            _ => self.prefixed(),
        }
    }

    /// The anchor a forum log entry for this page carries: the prefixed
    /// title with double quotes escaped the way the entry markup writes
    /// them into heading ids.
    pub fn anchor(&self) -> String {
        self.prefixed().replace('"', "&quot;")
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed())
    }
}

pub(crate) fn normalize_name(raw: &str) -> String {
    raw.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::{Namespace, Title};

    #[test]
    fn normalizes_underscores_and_whitespace() {
        let title = Title::mainspace("Foo__Bar  baz ");
        assert_eq!(title.name(), "Foo Bar baz");
        assert_eq!(title, Title::mainspace("Foo Bar baz"));
    }

    #[test]
    fn prefixed_and_link_target() {
        let page = Title::mainspace("Widget");
        assert_eq!(page.prefixed(), "Widget");
        assert_eq!(page.link_target(), ":Widget");

        let forum = Title::new(Namespace::Project, "Redirects for discussion");
        assert_eq!(forum.prefixed(), "Project:Redirects for discussion");
        assert_eq!(forum.link_target(), "Project:Redirects for discussion");
    }

    #[test]
    fn anchor_escapes_double_quotes() {
        let title = Title::mainspace("Foo \"Bar\"");
        assert_eq!(title.anchor(), "Foo &quot;Bar&quot;");
    }

    #[test]
    fn from_api_strips_site_specific_prefix() {
        let title = Title::from_api(4, "Wikipedia:Redirects for discussion/Log/2024 January 5");
        assert_eq!(title.namespace(), Namespace::Project);
        assert_eq!(title.name(), "Redirects for discussion/Log/2024 January 5");
        assert_eq!(
            title.prefixed(),
            "Project:Redirects for discussion/Log/2024 January 5"
        );
    }

    #[test]
    fn from_api_keeps_unknown_namespaces_whole() {
        let title = Title::from_api(118, "Draft:Widget");
        assert_eq!(title.prefixed(), "Draft:Widget");
    }

    #[test]
    fn from_api_mainspace_title_with_colon() {
        let title = Title::from_api(0, "Dr. Strangelove: or something");
        assert_eq!(title.name(), "Dr. Strangelove: or something");
    }
}
