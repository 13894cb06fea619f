use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::adapter::{Adapter, ToolKind};

/// Thread-safe index of checker adapters. Populated at startup, read by
/// the planner and executor thereafter.
#[derive(Default)]
pub(crate) struct Registry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("adapters", &self.names())
            .finish()
    }
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Idempotent: registering under an existing name overwrites.
    pub(crate) fn register(&self, adapter: Arc<dyn Adapter>) {
        #[allow(clippy::unwrap_used)] // poisoning only follows a panic
        self.adapters
            .write()
            .unwrap()
            .insert(adapter.name().to_string(), adapter);
    }

    pub(crate) fn find(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        #[allow(clippy::unwrap_used)]
        self.adapters.read().unwrap().get(name).cloned()
    }

    /// All adapters, name-sorted for deterministic iteration.
    pub(crate) fn all(&self) -> Vec<Arc<dyn Adapter>> {
        #[allow(clippy::unwrap_used)]
        let mut adapters: Vec<_> = self.adapters.read().unwrap().values().cloned().collect();
        adapters.sort_by(|a, b| a.name().cmp(b.name()));
        adapters
    }

    pub(crate) fn by_language(&self, language: &str) -> Vec<Arc<dyn Adapter>> {
        self.all()
            .into_iter()
            .filter(|a| a.language() == language)
            .collect()
    }

    /// Adapters whose kind is `kind` or `Both`.
    pub(crate) fn by_kind(&self, kind: ToolKind) -> Vec<Arc<dyn Adapter>> {
        self.all()
            .into_iter()
            .filter(|a| a.kind().matches(kind))
            .collect()
    }

    fn names(&self) -> Vec<String> {
        self.all().iter().map(|a| a.name().to_string()).collect()
    }
}
