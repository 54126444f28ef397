// ============================
// crates/backend-lib/src/auth/routes.rs
// ============================
//! Static registry mapping request paths to their access class.
use super::rate_limit::EndpointClass;
use std::collections::HashMap;

/// How the gate treats a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// No token, no rate limit
    Public,
    /// Requires a valid token
    Protected,
    /// Credential endpoint, throttled by its own class before any work happens
    Sensitive(EndpointClass),
}

/// Path patterns resolved exact-first, then by longest `/*` prefix.
/// Anything unmatched is [`RouteClass::Protected`].
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    exact: HashMap<String, RouteClass>,
    /// Sorted longest prefix first
    prefixes: Vec<(String, RouteClass)>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    pub fn resolve(&self, path: &str) -> RouteClass {
        if let Some(class) = self.exact.get(path) {
            return *class;
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map_or(RouteClass::Protected, |(_, class)| *class)
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    entries: Vec<(String, RouteClass)>,
}

impl RouteTableBuilder {
    pub fn public(self, pattern: &str) -> Self {
        self.route(pattern, RouteClass::Public)
    }

    pub fn protected(self, pattern: &str) -> Self {
        self.route(pattern, RouteClass::Protected)
    }

    pub fn sensitive(self, pattern: &str, class: EndpointClass) -> Self {
        self.route(pattern, RouteClass::Sensitive(class))
    }

    /// Register a pattern. A later registration of the same pattern wins.
    pub fn route(mut self, pattern: &str, class: RouteClass) -> Self {
        self.entries.push((pattern.to_string(), class));
        self
    }

    pub fn build(self) -> RouteTable {
        let mut exact = HashMap::new();
        let mut prefixes: HashMap<String, RouteClass> = HashMap::new();

        for (pattern, class) in self.entries {
            // "/api/*" matches "/api/" and everything below it
            match pattern.strip_suffix('*') {
                Some(prefix) if prefix.ends_with('/') => {
                    prefixes.insert(prefix.to_string(), class);
                },
                _ => {
                    exact.insert(pattern, class);
                },
            }
        }

        let mut prefixes: Vec<_> = prefixes.into_iter().collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        RouteTable { exact, prefixes }
    }
}
