//! Request router (§6.2): "a simple URL-pattern → rewrite table" the HTTP
//! listener consults before constructing a context. Patterns are literal
//! prefixes; the first match wins and its prefix is swapped for the
//! replacement, leaving the remainder of the path untouched.

/// Ordered list of `(from_prefix, to_prefix)` rewrites.
#[derive(Debug, Clone, Default)]
pub struct RewriteTable {
    rules: Vec<(String, String)>,
}

impl RewriteTable {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rules.push((from.into(), to.into()));
        self
    }

    /// Rewrites `path` through the first matching rule. Returns the
    /// original path unchanged if nothing matches.
    pub fn rewrite<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        for (from, to) in &self.rules {
            if let Some(rest) = path.strip_prefix(from.as_str()) {
                return std::borrow::Cow::Owned(format!("{to}{rest}"));
            }
        }
        std::borrow::Cow::Borrowed(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_matching_prefix() {
        let table = RewriteTable::new().with_rule("/api/v1", "/v1");
        assert_eq!(table.rewrite("/api/v1/cache/warm"), "/v1/cache/warm");
    }

    #[test]
    fn leaves_unmatched_paths_untouched() {
        let table = RewriteTable::new().with_rule("/api/v1", "/v1");
        assert_eq!(table.rewrite("/health"), "/health");
    }

    #[test]
    fn first_matching_rule_wins() {
        let table = RewriteTable::new()
            .with_rule("/api", "/v2")
            .with_rule("/api/v1", "/v1");
        assert_eq!(table.rewrite("/api/v1/x"), "/v2/v1/x");
    }
}
