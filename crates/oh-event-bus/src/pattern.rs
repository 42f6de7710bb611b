//! Pattern list parsing and glob compilation

use regex::Regex;

/// Split a pattern string on `,` or `;` into trimmed, non-empty patterns
pub fn parse_patterns(input: &str) -> Vec<String> {
    input
        .split([',', ';'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compile a glob into an anchored regex: `*` matches any substring, every
/// other character matches literally.
pub fn compile_glob(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
}

/// Anything accepted as a subscription pattern input
///
/// A single string may itself be a delimiter-separated list; lists are
/// flattened the same way element by element.
pub trait IntoPatterns {
    fn into_patterns(self) -> Vec<String>;
}

impl IntoPatterns for &str {
    fn into_patterns(self) -> Vec<String> {
        parse_patterns(self)
    }
}

impl IntoPatterns for String {
    fn into_patterns(self) -> Vec<String> {
        parse_patterns(&self)
    }
}

impl IntoPatterns for &String {
    fn into_patterns(self) -> Vec<String> {
        parse_patterns(self)
    }
}

impl<S: AsRef<str>> IntoPatterns for Vec<S> {
    fn into_patterns(self) -> Vec<String> {
        self.iter().flat_map(|s| parse_patterns(s.as_ref())).collect()
    }
}

impl<S: AsRef<str>> IntoPatterns for &[S] {
    fn into_patterns(self) -> Vec<String> {
        self.iter().flat_map(|s| parse_patterns(s.as_ref())).collect()
    }
}

impl<S: AsRef<str>, const N: usize> IntoPatterns for [S; N] {
    fn into_patterns(self) -> Vec<String> {
        self.iter().flat_map(|s| parse_patterns(s.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_patterns_delimiters() {
        assert_eq!(
            parse_patterns(" items/a , things/*;;rules/x ;"),
            vec!["items/a", "things/*", "rules/x"]
        );
        assert!(parse_patterns(" ,; ").is_empty());
    }

    #[test]
    fn test_list_inputs_are_flattened() {
        let patterns = vec!["a,b", " c "].into_patterns();
        assert_eq!(patterns, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_glob_is_anchored() {
        let re = compile_glob("items/*").unwrap();
        assert!(re.is_match("items/foo"));
        assert!(re.is_match("items/"));
        assert!(!re.is_match("xitems/foo"));
        assert!(!re.is_match("things/foo"));
    }

    #[test]
    fn test_glob_escapes_metacharacters() {
        let re = compile_glob("items/a.b+(c)*").unwrap();
        assert!(re.is_match("items/a.b+(c)"));
        assert!(re.is_match("items/a.b+(c)/state"));
        assert!(!re.is_match("items/aXb+(c)"));
    }

    #[test]
    fn test_glob_middle_star() {
        let re = compile_glob("*/Kitchen_*").unwrap();
        assert!(re.is_match("items/Kitchen_Light"));
        assert!(!re.is_match("items/Living_Light"));
    }
}
