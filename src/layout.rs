//! Layout providers: translation of raw request paths into canonical
//! artifact paths
//!
//! Layout-specific coordinate parsing (Maven, npm, ...) lives outside the
//! core; this module only defines the seam and the built-in raw layout.

use crate::error::{RelayError, Result};
use crate::models::ArtifactPath;
use std::collections::HashMap;
use std::sync::Arc;

/// Translates a raw path string into a canonical artifact path for one
/// repository layout
///
/// Implementations must be pure: no filesystem or network access.
pub trait LayoutProvider: Send + Sync {
    /// Layout tag this provider is registered under
    fn layout(&self) -> &str;

    /// Translate a raw path, rejecting invalid or unsafe input
    fn resolve(&self, raw_path: &str) -> Result<ArtifactPath>;
}

/// Default layout: the raw path is the artifact path, after
/// normalization and safety validation
#[derive(Debug, Default)]
pub struct RawLayoutProvider;

impl LayoutProvider for RawLayoutProvider {
    fn layout(&self) -> &str {
        "raw"
    }

    fn resolve(&self, raw_path: &str) -> Result<ArtifactPath> {
        ArtifactPath::new(raw_path)
    }
}

/// Registry of layout providers keyed by layout tag
pub struct LayoutRegistry {
    providers: HashMap<String, Arc<dyn LayoutProvider>>,
}

impl LayoutRegistry {
    /// Create a registry holding only the built-in raw layout
    pub fn new() -> Self {
        let mut registry = LayoutRegistry {
            providers: HashMap::new(),
        };
        registry.register(Arc::new(RawLayoutProvider));
        registry
    }

    /// Register a provider under its layout tag, replacing any previous
    /// provider for that tag
    pub fn register(&mut self, provider: Arc<dyn LayoutProvider>) {
        self.providers
            .insert(provider.layout().to_string(), provider);
    }

    /// Look up the provider bound to a layout tag
    pub fn get(&self, layout: &str) -> Result<Arc<dyn LayoutProvider>> {
        self.providers.get(layout).cloned().ok_or_else(|| {
            RelayError::ConfigError(format!("No layout provider registered for '{}'", layout))
        })
    }
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}
