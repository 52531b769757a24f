use std::collections::HashMap;

use super::host::Host;

/// Per-request properties consulted by veto rules.
///
/// A plain string-keyed bag; the empty context applies no constraints.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    properties: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// A per-request predicate that excludes specific hosts from selection.
///
/// Rules are pure: they must not mutate host state. Each rule may be
/// evaluated once per host per selection.
pub trait HostVetoRule: Send + Sync {
    fn should_veto(&self, host: &Host, context: &RequestContext) -> bool;
}
