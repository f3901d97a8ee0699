//! Inventory - cached resource snapshots
//!
//! An inventory file holds previously collected resource records per type.
//! Each type becomes a provider that answers identifier lookups on its
//! `id_field` and filter lookups by attribute equality.
//!
//! ```yaml
//! resources:
//!   ec2_instance:
//!     display_name: EC2 Instance
//!     id_field: instance_id
//!     items:
//!       - instance_id: i-01a2349e94458a507
//!         name: web-1
//! ```

use super::handle::{loosely_equal, lookup_path, Filter};
use super::registry::{Fetched, Query, RegistryBuilder, ResourceProvider, ResourceType};
use crate::error::{BackendError, RegistryError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// One resource type's snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryType {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub items: Vec<Value>,
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Root structure of an inventory file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub resources: BTreeMap<String, InventoryType>,
}

impl Inventory {
    /// Load from disk; `.json` files are parsed as JSON, everything else as YAML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory {}", path.display()))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let inventory = if is_json {
            serde_json::from_str(&content).context("Failed to parse inventory JSON")?
        } else {
            Self::from_yaml_str(&content)?
        };

        Ok(inventory)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse inventory YAML")
    }

    /// Register one provider per inventory type
    pub fn register_into(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        for (name, snapshot) in &self.resources {
            let display = snapshot
                .display_name
                .clone()
                .unwrap_or_else(|| name.clone());
            tracing::debug!(
                "Inventory type {} with {} items",
                name,
                snapshot.items.len()
            );
            builder.register(ResourceType::new(
                name.clone(),
                display,
                Arc::new(InventoryProvider::new(
                    snapshot.id_field.clone(),
                    snapshot.items.clone(),
                )),
            ))?;
        }
        Ok(())
    }
}

/// Provider serving a fixed set of records
#[derive(Debug, Clone)]
pub struct InventoryProvider {
    id_field: String,
    items: Vec<Value>,
}

impl InventoryProvider {
    pub fn new(id_field: impl Into<String>, items: Vec<Value>) -> Self {
        Self {
            id_field: id_field.into(),
            items,
        }
    }

    fn filtered<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Value> + 'a {
        self.items
            .iter()
            .filter(move |item| matches_filter(item, filter))
    }
}

#[async_trait]
impl ResourceProvider for InventoryProvider {
    async fn fetch(&self, query: &Query) -> Result<Fetched, BackendError> {
        match query {
            Query::Identifier(id) => {
                let expected = Value::String(id.clone());
                let matches: Vec<Value> = self
                    .items
                    .iter()
                    .filter(|item| {
                        lookup_path(item, &self.id_field)
                            .map(|v| loosely_equal(v, &expected))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                Ok(match matches.len() {
                    0 => Fetched::NotFound,
                    1 => Fetched::Found(matches.into_iter().next().unwrap_or_default()),
                    _ => Fetched::Many(matches),
                })
            }
            Query::Filter(filter) => Ok(Fetched::Many(self.filtered(filter).cloned().collect())),
        }
    }
}

/// Every filter key must match; an array filter value matches any of its elements
pub fn matches_filter(item: &Value, filter: &Filter) -> bool {
    filter.iter().all(|(key, wanted)| {
        let Some(actual) = lookup_path(item, key) else {
            return false;
        };
        match wanted {
            Value::Array(options) => options.iter().any(|o| loosely_equal(actual, o)),
            other => loosely_equal(actual, other),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
resources:
  ec2_instance:
    display_name: EC2 Instance
    id_field: instance_id
    items:
      - instance_id: i-01a2349e94458a507
        name: web-1
        state: running
      - instance_id: i-0b
        name: web-2
        state: stopped
  s3_bucket:
    items: []
"#;

    fn provider() -> InventoryProvider {
        let inventory = Inventory::from_yaml_str(SAMPLE).unwrap();
        let snapshot = &inventory.resources["ec2_instance"];
        InventoryProvider::new(snapshot.id_field.clone(), snapshot.items.clone())
    }

    #[test]
    fn test_parse_defaults() {
        let inventory = Inventory::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(inventory.resources.len(), 2);
        assert_eq!(inventory.resources["s3_bucket"].id_field, "id");
        assert!(inventory.resources["s3_bucket"].display_name.is_none());
    }

    #[tokio::test]
    async fn test_identifier_lookup() {
        let fetched = provider()
            .fetch(&Query::Identifier("i-01a2349e94458a507".into()))
            .await
            .unwrap();
        match fetched {
            Fetched::Found(record) => assert_eq!(record["name"], "web-1"),
            other => panic!("expected Found, got {:?}", other),
        }

        let missing = provider()
            .fetch(&Query::Identifier("i-ffff".into()))
            .await
            .unwrap();
        assert_eq!(missing, Fetched::NotFound);
    }

    #[tokio::test]
    async fn test_filter_lookup() {
        let mut filter = Filter::new();
        filter.insert("name".into(), json!("my-instance"));
        let fetched = provider().fetch(&Query::Filter(filter)).await.unwrap();
        assert_eq!(fetched, Fetched::Many(Vec::new()));

        let mut filter = Filter::new();
        filter.insert("state".into(), json!(["running", "stopped"]));
        match provider().fetch(&Query::Filter(filter)).await.unwrap() {
            Fetched::Many(items) => assert_eq!(items.len(), 2),
            other => panic!("expected Many, got {:?}", other),
        }
    }

    #[test]
    fn test_register_into_uses_display_name() {
        let inventory = Inventory::from_yaml_str(SAMPLE).unwrap();
        let mut builder = RegistryBuilder::new();
        inventory.register_into(&mut builder).unwrap();
        let registry = builder.build();
        assert_eq!(registry.display_name("ec2_instance"), "EC2 Instance");
        assert_eq!(registry.display_name("s3_bucket"), "s3_bucket");
    }

    #[test]
    fn test_register_into_rejects_duplicates() {
        let inventory = Inventory::from_yaml_str(SAMPLE).unwrap();
        let mut builder = RegistryBuilder::new();
        inventory.register_into(&mut builder).unwrap();
        assert!(matches!(
            inventory.register_into(&mut builder),
            Err(RegistryError::DuplicateType(_))
        ));
    }
}
