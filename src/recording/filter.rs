// src/recording/filter.rs
//! Substring filters for audit entries
//!
//! Filter terms come as plain strings:
//!
//! - `+term` or `term`: positive, at least one must match when any exist
//! - `-term` or `!term`: negative, any match rejects
//!
//! Matching is case-insensitive substring containment.

/// Positive and negative terms for one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    positive: Vec<String>,
    negative: Vec<String>,
}

impl FilterSet {
    /// Parse prefixed filter terms; empty terms are ignored
    pub fn parse<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for term in terms {
            let term = term.as_ref().trim();
            let (negative, body) = match term.as_bytes().first() {
                Some(b'+') => (false, &term[1..]),
                Some(b'-') | Some(b'!') => (true, &term[1..]),
                _ => (false, term),
            };
            if body.is_empty() {
                continue;
            }
            let body = body.to_lowercase();
            if negative {
                set.negative.push(body);
            } else {
                set.positive.push(body);
            }
        }
        set
    }

    /// Build from already separated lists; `None` counts as empty
    pub fn from_lists(positive: Option<Vec<String>>, negative: Option<Vec<String>>) -> Self {
        let clean = |terms: Option<Vec<String>>| -> Vec<String> {
            terms
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        };
        Self {
            positive: clean(positive),
            negative: clean(negative),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    pub fn positive(&self) -> &[String] {
        &self.positive
    }

    pub fn negative(&self) -> &[String] {
        &self.negative
    }

    /// True when any negative term occurs in `candidate`
    pub fn rejects(&self, candidate: &str) -> bool {
        if self.negative.is_empty() {
            return false;
        }
        let candidate = candidate.to_lowercase();
        self.negative.iter().any(|term| candidate.contains(term.as_str()))
    }

    /// True when there are no positive terms or one of them occurs in `candidate`
    pub fn admits(&self, candidate: &str) -> bool {
        if self.positive.is_empty() {
            return true;
        }
        let candidate = candidate.to_lowercase();
        self.positive.iter().any(|term| candidate.contains(term.as_str()))
    }
}
