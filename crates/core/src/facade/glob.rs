//! Minimal glob-to-regex translator (`*`, `?`, `**`) used by
//! `Nexus::glob`/`Nexus::grep`. Matches a single path segment unless
//! `**` is present, mirroring shell glob semantics closely enough for
//! the façade's file-pattern filtering — not a full `.gitignore`-style
//! matcher.

use regex::Regex;

pub fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '(' | ')' | '+' | '|' | '^' | '$' | '[' | ']' | '{' | '}' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    Regex::new(&out).unwrap_or_else(|_| Regex::new("$^").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_within_segment_only() {
        let re = glob_to_regex("*.rs");
        assert!(re.is_match("main.rs"));
        assert!(!re.is_match("src/main.rs"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let re = glob_to_regex("**/*.rs");
        assert!(re.is_match("src/main.rs"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let re = glob_to_regex("a?c");
        assert!(re.is_match("abc"));
        assert!(!re.is_match("ac"));
    }
}
