// src/policies/network.rs
//! Decisive network policies: host blocking and URL rewriting

use crate::interception::engine::{CallFrame, Decision, PolicyHandler};
use crate::interception::routing_table::{Route, RoutingTable};
use crate::utils::config::RewriteRule;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Fails resolution of blocked hosts
///
/// Patterns are exact host names or `*.domain` wildcards; arg 0 is the host.
pub struct HostBlocklist {
    patterns: RoutingTable,
}

impl HostBlocklist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table = RoutingTable::from_routes(
            patterns
                .into_iter()
                .map(|pattern| pattern.as_ref().trim().to_string())
                .filter(|pattern| !pattern.is_empty())
                .map(|pattern| Route::new(pattern, "")),
        );
        info!("Host blocklist loaded with {} patterns", table.len());
        Self { patterns: table }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_blocked(&self, host: &str) -> bool {
        self.patterns.contains_host(host.trim_end_matches('.'))
    }
}

impl PolicyHandler for HostBlocklist {
    fn name(&self) -> &str {
        "host-blocklist"
    }

    fn before(&self, frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        let Some(host) = frame.arg_text(0) else {
            return Ok(None);
        };

        if self.is_blocked(&host) {
            debug!("Blocking resolution of {}", host);
            return Ok(Some(Decision::Throw(format!(
                "Unable to resolve host \"{}\": blocked by policy",
                host
            ))));
        }
        Ok(None)
    }
}

/// Rewrites the URL passed as arg 0 through a routing table
pub struct UrlRewriter {
    table: Arc<RoutingTable>,
}

impl UrlRewriter {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self { table }
    }

    pub fn from_rules(rules: &[RewriteRule]) -> Self {
        let table = RoutingTable::from_routes(
            rules
                .iter()
                .map(|rule| Route::new(&rule.domain, &rule.target).with_priority(rule.priority)),
        );
        Self::new(Arc::new(table))
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }
}

impl PolicyHandler for UrlRewriter {
    fn name(&self) -> &str {
        "url-rewriter"
    }

    fn before(&self, frame: &CallFrame) -> anyhow::Result<Option<Decision>> {
        let Some(url) = frame.arg_text(0) else {
            return Ok(None);
        };

        Ok(self.table.rewrite_url(&url).map(|rewritten| {
            debug!("Rewriting {} -> {}", url, rewritten);
            Decision::ReplaceArg {
                index: 0,
                value: Value::String(rewritten),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blocklist() {
        let blocklist = HostBlocklist::new(["ads.example.com", "*.tracker.io", " "]);
        assert_eq!(blocklist.len(), 2);

        let frame = CallFrame::new("getAllByName", vec![json!("cdn.tracker.io")]);
        match blocklist.before(&frame).unwrap() {
            Some(Decision::Throw(message)) => assert!(message.contains("cdn.tracker.io")),
            other => panic!("expected throw, got {:?}", other),
        }

        assert!(blocklist.is_blocked("ADS.example.com."));
        assert!(!blocklist.is_blocked("tracker.io"));
        assert!(!blocklist.is_blocked("example.com"));
        assert_eq!(
            blocklist
                .before(&CallFrame::new("getAllByName", vec![json!(null)]))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_rewriter() {
        let rewriter = UrlRewriter::from_rules(&[
            RewriteRule {
                domain: "api.example.com".to_string(),
                target: "http://localhost:8080".to_string(),
                priority: 0,
            },
            RewriteRule {
                domain: "*.example.com".to_string(),
                target: "http://localhost:9090/".to_string(),
                priority: 0,
            },
        ]);

        let mut frame = CallFrame::new("<init>", vec![json!("https://api.example.com/v1/users?id=7")]);
        let decision = rewriter.before(&frame).unwrap().unwrap();
        assert!(decision.apply(&mut frame));
        assert_eq!(frame.arg_text(0).unwrap(), "http://localhost:8080/v1/users?id=7");

        let frame = CallFrame::new("<init>", vec![json!("https://img.example.com/a.png")]);
        assert_eq!(
            rewriter.before(&frame).unwrap(),
            Some(Decision::ReplaceArg {
                index: 0,
                value: json!("http://localhost:9090/a.png"),
            })
        );

        let frame = CallFrame::new("<init>", vec![json!("https://other.org/")]);
        assert_eq!(rewriter.before(&frame).unwrap(), None);
    }
}
