//! Host to destination lookup.

use std::collections::HashMap;

/// Immutable mapping from request host to destination base URL.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl RouteTable {
    /// Build from a host → base URL map. Hosts are matched case-insensitively.
    pub fn new(routes: HashMap<String, String>) -> Self {
        let routes = routes
            .into_iter()
            .map(|(host, base)| (host.to_ascii_lowercase(), base))
            .collect();
        Self { routes }
    }

    /// Base URL configured for `host` (including any port it was sent with).
    pub fn resolve(&self, host: &str) -> Option<&str> {
        if let Some(base) = self.routes.get(host) {
            return Some(base.as_str());
        }
        self.routes
            .get(&host.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<(String, String)> for RouteTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        [
            ("a.example".to_string(), "http://10.0.0.5".to_string()),
            ("B.example:8080".to_string(), "http://10.0.0.6:81".to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_resolve() {
        let table = table();
        assert_eq!(table.resolve("a.example"), Some("http://10.0.0.5"));
        assert_eq!(table.resolve("A.Example"), Some("http://10.0.0.5"));
        assert_eq!(table.resolve("b.example:8080"), Some("http://10.0.0.6:81"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_miss() {
        let table = table();
        assert_eq!(table.resolve("unknown.example"), None);
        // The port is part of the host key.
        assert_eq!(table.resolve("a.example:80"), None);
        assert!(RouteTable::default().is_empty());
    }
}
