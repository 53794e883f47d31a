//! Keyword blocklists shared by the censoring proxies.
//!
//! A keyword matches a name (DNS query name, HTTP `Host`, TLS SNI) when it is
//! an ASCII case-insensitive substring of that name. This mirrors how a DPI
//! box matches `ooni.io` inside `mia-ps.ooni.io.` without caring about label
//! boundaries.
//!
//! Keyword sets are built once from configuration and only read afterwards,
//! so they are shared between connection handlers behind an `Arc` without
//! any locking.

/// An immutable set of substring keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    /// Build a keyword set, discarding empty keywords.
    ///
    /// An empty keyword would match every name, which is never what a
    /// blocklist entry means.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_ascii_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Return the first keyword contained in `name`, if any.
    pub fn find(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.keywords
            .iter()
            .find(|k| name.contains(k.as_str()))
            .map(String::as_str)
    }

    /// Check whether any keyword is contained in `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Number of keywords in the set.
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// Check whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_match() {
        let set = KeywordSet::new(["ooni.io"]);
        assert!(set.matches("mia-ps.ooni.io."));
        assert!(set.matches("ooni.io"));
        assert!(!set.matches("ooni.nu"));
    }

    #[test]
    fn test_case_insensitive() {
        let set = KeywordSet::new(["OONI.io"]);
        assert!(set.matches("API.Ooni.IO"));
    }

    #[test]
    fn test_empty_keywords_discarded() {
        let set = KeywordSet::new(["", "  ", "example"]);
        assert_eq!(set.len(), 1);
        assert!(!set.matches("ooni.org"));
    }

    #[test]
    fn test_find_returns_first_match_in_order() {
        let set = KeywordSet::new(["ooni", "ooni.io"]);
        assert_eq!(set.find("www.ooni.io"), Some("ooni"));
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let set = KeywordSet::default();
        assert!(set.is_empty());
        assert!(!set.matches("anything"));
    }
}
