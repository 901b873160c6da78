// src/interception/routing_table.rs
//! Routing table for rewriting URL hosts
//!
//! Maps a domain (exact or `*.suffix` wildcard) to a replacement origin.
//! Used by the URL rewrite policy and, with empty targets, as a host pattern
//! set for the blocklist.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// Route definition
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Source domain (e.g., "api.example.com" or "*.example.com")
    pub domain: String,

    /// Replacement origin (e.g., "http://localhost:8080")
    pub target: String,

    /// Route priority (higher = checked first among wildcards)
    pub priority: u32,
}

impl Route {
    pub fn new(domain: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            domain: domain.into().to_ascii_lowercase(),
            target: target.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    fn matches(&self, host: &str) -> bool {
        match self.domain.strip_prefix("*.") {
            Some(suffix) => {
                host.len() > suffix.len()
                    && host.ends_with(suffix)
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
            }
            None => self.domain == host,
        }
    }
}

/// Routing table
///
/// Reads happen on interception threads, so the table uses a synchronous
/// lock rather than an async one.
#[derive(Default)]
pub struct RoutingTable {
    routes: RwLock<HashMap<String, Route>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a list of routes
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let table = Self::new();
        for route in routes {
            table.add_route(route);
        }
        table
    }

    pub fn add_route(&self, route: Route) {
        info!("Adding route: {} -> {}", route.domain, route.target);
        self.routes.write().insert(route.domain.clone(), route);
    }

    /// Lookup a route by host; exact routes win over wildcards
    pub fn lookup(&self, host: &str) -> Option<Route> {
        let host = host.to_ascii_lowercase();
        let routes = self.routes.read();

        if let Some(route) = routes.get(&host) {
            debug!("Found exact route for {}", host);
            return Some(route.clone());
        }

        let route = routes
            .values()
            .filter(|route| route.domain.starts_with("*.") && route.matches(&host))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.domain.len().cmp(&b.domain.len()))
            })
            .cloned();

        match &route {
            Some(route) => debug!("Found wildcard route for {} using {}", host, route.domain),
            None => debug!("No route found for {}", host),
        }
        route
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.lookup(host).is_some()
    }

    /// Rewrite a URL's origin according to the matching route
    ///
    /// Returns `None` when the URL has no host or no route matches.
    pub fn rewrite_url(&self, url: &str) -> Option<String> {
        let parts = UrlParts::parse(url)?;
        let route = self.lookup(parts.host)?;

        let mut rewritten = route.target.trim_end_matches('/').to_string();
        rewritten.push_str(parts.rest);
        Some(rewritten)
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

/// Host and the remainder of a URL after its authority
struct UrlParts<'a> {
    host: &'a str,
    rest: &'a str,
}

impl<'a> UrlParts<'a> {
    fn parse(url: &'a str) -> Option<Self> {
        let (_, after_scheme) = url.split_once("://")?;
        let authority_end = after_scheme
            .find(|c: char| c == '/' || c == '?' || c == '#')
            .unwrap_or(after_scheme.len());
        let authority = &after_scheme[..authority_end];
        let rest = &after_scheme[authority_end..];

        let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
        let host = if let Some(bracketed) = host_port.strip_prefix('[') {
            bracketed.split(']').next()?
        } else {
            host_port.split(':').next()?
        };

        if host.is_empty() {
            return None;
        }
        Some(Self { host, rest })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_route() {
        let table = RoutingTable::new();
        table.add_route(Route::new("api.example.com", "http://localhost:8080"));

        let found = table.lookup("API.example.com");
        assert_eq!(found.unwrap().target, "http://localhost:8080");
    }

    #[test]
    fn test_wildcard_match() {
        let table = RoutingTable::new();
        table.add_route(Route::new("*.example.com", "http://localhost:8080"));

        assert!(table.contains_host("api.example.com"));
        assert!(table.contains_host("deep.cdn.example.com"));
        assert!(!table.contains_host("example.com"));
        assert!(!table.contains_host("badexample.com"));
    }

    #[test]
    fn test_wildcard_priority() {
        let table = RoutingTable::new();
        table.add_route(Route::new("*.example.com", "http://low").with_priority(1));
        table.add_route(Route::new("*.cdn.example.com", "http://high").with_priority(5));

        assert_eq!(table.lookup("a.cdn.example.com").unwrap().target, "http://high");
        assert_eq!(table.lookup("a.example.com").unwrap().target, "http://low");
    }

    #[test]
    fn test_rewrite_url() {
        let table = RoutingTable::from_routes([
            Route::new("api.example.com", "http://localhost:8080/"),
            Route::new("*.cdn.net", "https://mirror.local"),
        ]);

        assert_eq!(
            table.rewrite_url("https://api.example.com:443/v1/items?q=1").as_deref(),
            Some("http://localhost:8080/v1/items?q=1")
        );
        assert_eq!(
            table.rewrite_url("http://user@img.cdn.net/a.png").as_deref(),
            Some("https://mirror.local/a.png")
        );
        assert_eq!(table.rewrite_url("https://other.org/"), None);
        assert_eq!(table.rewrite_url("not a url"), None);
    }
}
