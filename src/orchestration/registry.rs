//! # Task Helper Registry
//!
//! Maps extension names to the helpers that execute them. Tasks carry their
//! helper's name, so a task loaded from storage on any node finds its helper
//! again.
//!
//! ## Usage
//!
//! ```rust
//! use chaos_core::orchestration::registry::HelperRegistry;
//!
//! let registry = HelperRegistry::new();
//! assert!(registry.get("command-fault").is_err());
//! assert!(registry.names().is_empty());
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::task_helper::TaskHelper;
use crate::error::{ChaosError, Result};

#[derive(Default)]
pub struct HelperRegistry {
    helpers: RwLock<HashMap<String, Arc<dyn TaskHelper>>>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a helper under its own name, replacing any previous one
    pub fn register(&self, helper: Arc<dyn TaskHelper>) {
        let name = helper.name().to_string();
        info!(helper = %name, fan_out = helper.is_fan_out(), "Registering task helper");

        let mut helpers = self.helpers.write();
        if helpers.insert(name.clone(), helper).is_some() {
            warn!(helper = %name, "Helper already registered, replacing");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TaskHelper>> {
        self.helpers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ChaosError::HelperNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.helpers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
