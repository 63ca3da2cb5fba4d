//! Shell-style `*` glob matching for Tool Registry visibility rules
//! (spec §4.9). Only `*` is special; every other character (including the
//! `__` separator in `serverName__originalName`) matches literally.

/// Matches `name` against `pattern`, where `*` stands for any run of zero
/// or more characters. No other metacharacters are interpreted.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    match_at(pattern.as_bytes(), name.as_bytes())
}

fn match_at(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => {
            if match_at(rest, name) {
                return true;
            }
            !name.is_empty() && match_at(pattern, &name[1..])
        }
        Some((p, rest)) => match name.split_first() {
            Some((n, name_rest)) if n == p => match_at(rest, name_rest),
            _ => false,
        },
    }
}

/// True if any pattern in `patterns` matches `name`.
pub fn any_match(patterns: &[String], name: &str) -> bool {
    patterns.iter().any(|p| glob_match(p, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_with_no_wildcard() {
        assert!(glob_match("github__list_issues", "github__list_issues"));
        assert!(!glob_match("github__list_issues", "github__create_issue"));
    }

    #[test]
    fn trailing_wildcard_matches_prefix() {
        assert!(glob_match("github__*", "github__list_issues"));
        assert!(!glob_match("github__*", "gitlab__list_issues"));
    }

    #[test]
    fn leading_and_embedded_wildcards() {
        assert!(glob_match("*__list_issues", "github__list_issues"));
        assert!(glob_match("*list*", "github__list_issues"));
    }

    #[test]
    fn bare_star_matches_everything() {
        assert!(glob_match("*", "anything__at_all"));
    }

    #[test]
    fn any_match_checks_whole_list() {
        let patterns = vec!["gitlab__*".to_string(), "github__list_*".to_string()];
        assert!(any_match(&patterns, "github__list_issues"));
        assert!(!any_match(&patterns, "github__create_issue"));
    }
}
