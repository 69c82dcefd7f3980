//! Caption template stores.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::domain::TemplateError;
use crate::ports::TemplateStore;

/// Templates held in memory, usually loaded from a JSON file at startup
#[derive(Debug, Clone, Default)]
pub struct MapTemplateStore {
    templates: HashMap<String, String>,
}

impl MapTemplateStore {
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    /// Load a JSON object mapping template names to text
    pub async fn from_json_file(path: &Path) -> Result<Self, TemplateError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            TemplateError::Unavailable(format!("{}: {}", path.display(), e))
        })?;
        let store = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            templates = store.len(),
            "Loaded caption templates"
        );
        Ok(store)
    }

    pub fn from_json(raw: &str) -> Result<Self, TemplateError> {
        serde_json::from_str(raw)
            .map(Self::new)
            .map_err(|e| TemplateError::Unavailable(format!("invalid template file: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateStore for MapTemplateStore {
    async fn lookup(&self, name: &str) -> Result<Option<String>, TemplateError> {
        Ok(self.templates.get(name).cloned())
    }
}
