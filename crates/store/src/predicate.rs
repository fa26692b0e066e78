//! Parses the simple `path`-only predicates the Searcher and Syncer issue against the
//! store, guarding against the SQL-injection-adjacent hazard the design calls out
//! (§9): single quotes inside a literal must be escaped by doubling, never interpolated
//! raw into a query string.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WherePredicate {
    PathEquals(String),
    PathStartsWith(String),
}

impl WherePredicate {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            WherePredicate::PathEquals(p) => path == p,
            WherePredicate::PathStartsWith(prefix) => path.starts_with(prefix.as_str()),
        }
    }

    /// Render as the `delete(whereExpr)` string form the design documents, escaping
    /// single quotes by doubling.
    pub fn to_expr(&self) -> String {
        match self {
            WherePredicate::PathEquals(p) => format!("path = '{}'", escape(p)),
            WherePredicate::PathStartsWith(prefix) => {
                format!("path LIKE '{}%'", escape(prefix))
            }
        }
    }

    /// Parse a `path = '...'` or `path LIKE '...%'` expression back into a predicate.
    pub fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();
        if let Some(rest) = expr.strip_prefix("path LIKE '") {
            let inner = rest.strip_suffix("%'")?;
            return Some(WherePredicate::PathStartsWith(unescape(inner)));
        }
        if let Some(rest) = expr.strip_prefix("path = '") {
            let inner = rest.strip_suffix('\'')?;
            return Some(WherePredicate::PathEquals(unescape(inner)));
        }
        None
    }
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

fn unescape(s: &str) -> String {
    s.replace("''", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_equals() {
        let p = WherePredicate::PathEquals("src/a.rs".to_string());
        let expr = p.to_expr();
        assert_eq!(WherePredicate::parse(&expr), Some(p));
    }

    #[test]
    fn round_trips_starts_with() {
        let p = WherePredicate::PathStartsWith("src/".to_string());
        let expr = p.to_expr();
        assert_eq!(expr, "path LIKE 'src/%'");
        assert_eq!(WherePredicate::parse(&expr), Some(p));
    }

    #[test]
    fn escapes_embedded_single_quotes() {
        let p = WherePredicate::PathEquals("o'brien.rs".to_string());
        let expr = p.to_expr();
        assert_eq!(expr, "path = 'o''brien.rs'");
        assert_eq!(WherePredicate::parse(&expr), Some(p));
    }

    #[test]
    fn matches_checks_prefix_and_equality() {
        assert!(WherePredicate::PathStartsWith("src/".into()).matches("src/a.rs"));
        assert!(!WherePredicate::PathStartsWith("src/".into()).matches("lib/a.rs"));
        assert!(WherePredicate::PathEquals("a.rs".into()).matches("a.rs"));
    }
}
