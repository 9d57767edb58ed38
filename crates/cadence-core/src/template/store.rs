//! Template lookup.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use super::{default_templates, SessionTemplate};
use crate::error::{EngineError, Result};

/// Read-only template lookup consumed by the engine.
pub trait TemplateStore: Send + Sync {
    /// Look up a template by id.
    fn get(&self, id: &str) -> Option<SessionTemplate>;

    /// All templates, ordered by id.
    fn list(&self) -> Vec<SessionTemplate>;
}

/// Template store held in memory.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<BTreeMap<String, SessionTemplate>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-filled with the built-in templates.
    pub fn with_defaults() -> Self {
        let store = Self::new();
        {
            let mut templates = store.write();
            for template in default_templates() {
                templates.insert(template.id.clone(), template);
            }
        }
        store
    }

    /// Load templates from a JSON file.
    ///
    /// Handles two formats:
    /// - Keyed object: `{ "template_id": { template... }, ... }`
    /// - Raw array: `[{ "id": "...", ... }, ...]`
    pub fn load_json(path: &Path) -> Result<Self> {
        let store = Self::new();
        store.extend_from_json(path)?;
        Ok(store)
    }

    /// Add every template from a JSON file, replacing ones with the same id.
    ///
    /// Nothing is added unless every template in the file is valid.
    /// Returns how many templates were loaded.
    pub fn extend_from_json(&self, path: &Path) -> Result<usize> {
        let contents = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&contents)?;

        let templates: Vec<SessionTemplate> = if value.is_object() {
            serde_json::from_value::<HashMap<String, SessionTemplate>>(value)?
                .into_iter()
                .map(|(key, mut template)| {
                    if template.id.is_empty() {
                        template.id = key;
                    }
                    template
                })
                .collect()
        } else {
            serde_json::from_value(value)?
        };

        for template in &templates {
            check(template)?;
        }

        let count = templates.len();
        {
            let mut stored = self.write();
            for template in templates {
                stored.insert(template.id.clone(), template);
            }
        }
        log::info!("Loaded {} session templates from {}", count, path.display());
        Ok(count)
    }

    /// Add or replace a template after validating it.
    pub fn insert(&self, template: SessionTemplate) -> Result<()> {
        check(&template)?;
        self.write().insert(template.id.clone(), template);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Option<SessionTemplate> {
        self.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, SessionTemplate>> {
        self.templates.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, SessionTemplate>> {
        self.templates.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check(template: &SessionTemplate) -> Result<()> {
    if template.id.trim().is_empty() {
        return Err(EngineError::InvalidTemplate(format!(
            "template '{}' has no id",
            template.name
        )));
    }
    template.validate()
}

impl TemplateStore for InMemoryTemplateStore {
    fn get(&self, id: &str) -> Option<SessionTemplate> {
        self.read().get(id).cloned()
    }

    fn list(&self) -> Vec<SessionTemplate> {
        self.read().values().cloned().collect()
    }
}
