//! The regular-expression value type.
//!
//! Regex values expose `find`, `findAll(n)` and `match` methods and back the
//! `~` (match), `~~` (find) and `~~~` (find all) binary operators.

use regex::Regex;

/// A compiled regular expression with its source pattern.
#[derive(Debug, Clone)]
pub(crate) struct RegexValue {
    pub pattern: String,
    re: Regex,
}

/// A single match: byte offsets and the matched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegexMatch {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl RegexValue {
    pub fn compile(pattern: &str) -> Result<Self, String> {
        match Regex::new(pattern) {
            Ok(re) => Ok(Self {
                pattern: pattern.to_owned(),
                re,
            }),
            Err(err) => Err(err.to_string()),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.is_match(text)
    }

    pub fn find(&self, text: &str) -> Option<RegexMatch> {
        self.re.find(text).map(|m| RegexMatch {
            start: m.start(),
            end: m.end(),
            text: m.as_str().to_owned(),
        })
    }

    /// Every match, up to `limit` when it is positive.
    pub fn find_all(&self, text: &str, limit: i64) -> Vec<RegexMatch> {
        let mut out = Vec::new();
        for m in self.re.find_iter(text) {
            if limit > 0 && out.len() as i64 >= limit {
                break;
            }
            out.push(RegexMatch {
                start: m.start(),
                end: m.end(),
                text: m.as_str().to_owned(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_and_match() {
        let re = RegexValue::compile("[0-9]+").unwrap();
        assert!(re.is_match("abc123"));
        let m = re.find("abc123def456").unwrap();
        assert_eq!((m.start, m.end, m.text.as_str()), (3, 6, "123"));
        assert_eq!(re.find_all("a1b22c333", 2).len(), 2);
        assert_eq!(re.find_all("a1b22c333", 0).len(), 3);
    }

    #[test]
    fn test_bad_pattern() {
        assert!(RegexValue::compile("(").is_err());
    }
}
