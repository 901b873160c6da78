// src/policies/dialog.rs
//! Suppress matching dialogs

use crate::interception::engine::{CallFrame, Decision, PolicyHandler};
use crate::recording::filter::FilterSet;
use tracing::debug;

/// Hides dialogs whose title (arg 0) or message (arg 1) matches
///
/// Terms use the audit filter syntax: `+term`/`term` select dialogs,
/// `-term`/`!term` protect them. With no selecting term nothing is hidden.
pub struct DialogSuppressor {
    terms: FilterSet,
}

impl DialogSuppressor {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: FilterSet::parse(terms),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        !self.terms.positive().is_empty() && !self.terms.rejects(text) && self.terms.admits(text)
    }
}

impl PolicyHandler for DialogSuppressor {
    fn name(&self) -> &str {
        "dialog-suppressor"
    }

    fn before(&self, frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        let text = [frame.arg_text(0), frame.arg_text(1)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n");

        if self.matches(&text) {
            debug!("Suppressing dialog {:?}", frame.arg_text(0));
            return Ok(Some(Decision::Suppress));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_suppresses_matching_dialog() {
        let suppressor = DialogSuppressor::new(["root detected", "-debug build"]);

        let frame = CallFrame::new("show", vec![json!("Warning"), json!("Root Detected on device")]);
        assert_eq!(suppressor.before(&frame).unwrap(), Some(Decision::Suppress));

        let frame = CallFrame::new("show", vec![json!("Debug build"), json!("root detected")]);
        assert_eq!(suppressor.before(&frame).unwrap(), None);

        let frame = CallFrame::new("show", vec![json!("Update available")]);
        assert_eq!(suppressor.before(&frame).unwrap(), None);
    }

    #[test]
    fn test_no_terms_hides_nothing() {
        let suppressor = DialogSuppressor::new(Vec::<String>::new());
        assert!(!suppressor.matches("anything"));

        let protect_only = DialogSuppressor::new(["!keep"]);
        assert!(!protect_only.matches("something else"));
    }
}
