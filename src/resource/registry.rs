//! Resource Registry - resource type name to provider
//!
//! Types are registered once at start-up through [`RegistryBuilder`], then the
//! registry is frozen and shared read-only (usually behind an `Arc`).

use crate::error::{BackendError, RegistryError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::handle::Filter;

/// What a provider is asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Singular mode: at most one entity
    Identifier(String),
    /// Plural mode: any number of entities
    Filter(Filter),
}

/// What a provider answers with
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Found(Value),
    Many(Vec<Value>),
    NotFound,
}

/// Backend access for one resource type (EC2 instances, GCE instances, ...)
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn fetch(&self, query: &Query) -> Result<Fetched, BackendError>;
}

/// Adapter turning an async closure into a [`ResourceProvider`]
pub struct FnProvider<F>(F);

impl<F> FnProvider<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ResourceProvider for FnProvider<F>
where
    F: Fn(Query) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Fetched, BackendError>> + Send,
{
    async fn fetch(&self, query: &Query) -> Result<Fetched, BackendError> {
        (self.0)(query.clone()).await
    }
}

/// A registered resource type
#[derive(Clone)]
pub struct ResourceType {
    name: String,
    display_name: String,
    provider: Arc<dyn ResourceProvider>,
}

impl ResourceType {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        provider: Arc<dyn ResourceProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human name used in verdict descriptions ("EC2 Instance")
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn provider(&self) -> &Arc<dyn ResourceProvider> {
        &self.provider
    }
}

impl std::fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Mutable registration phase
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    types: HashMap<String, ResourceType>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type; names are unique
    pub fn register(&mut self, resource_type: ResourceType) -> Result<&mut Self, RegistryError> {
        if self.types.contains_key(resource_type.name()) {
            return Err(RegistryError::DuplicateType(resource_type.name));
        }
        tracing::debug!("Registered resource type: {}", resource_type.name());
        self.types.insert(resource_type.name.clone(), resource_type);
        Ok(self)
    }

    /// Freeze the registry
    pub fn build(self) -> Registry {
        Registry { types: self.types }
    }
}

/// Frozen registry, safe to share across concurrent resolutions
#[derive(Debug, Default)]
pub struct Registry {
    types: HashMap<String, ResourceType>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Get a resource type by name
    pub fn lookup(&self, name: &str) -> Result<&ResourceType, RegistryError> {
        self.types
            .get(name)
            .ok_or_else(|| RegistryError::UnknownResourceType(name.to_string()))
    }

    /// Display name for descriptions; falls back to the raw type name
    pub fn display_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.types
            .get(name)
            .map(|t| t.display_name())
            .unwrap_or(name)
    }

    /// All registered type names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_provider() -> Arc<dyn ResourceProvider> {
        Arc::new(FnProvider::new(|_query: Query| async { Ok::<_, BackendError>(Fetched::NotFound) }))
    }

    #[test]
    fn test_lookup_returns_registered_provider() {
        let provider = empty_provider();
        let mut builder = Registry::builder();
        builder
            .register(ResourceType::new("ec2_instance", "EC2 Instance", provider.clone()))
            .unwrap();
        let registry = builder.build();

        let found = registry.lookup("ec2_instance").unwrap();
        assert!(Arc::ptr_eq(found.provider(), &provider));
        assert_eq!(found.display_name(), "EC2 Instance");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut builder = Registry::builder();
        builder
            .register(ResourceType::new("ec2_instance", "EC2 Instance", empty_provider()))
            .unwrap();
        let err = builder
            .register(ResourceType::new("ec2_instance", "Other", empty_provider()))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateType("ec2_instance".into()));

        // First registration survives
        let registry = builder.build();
        assert_eq!(registry.lookup("ec2_instance").unwrap().display_name(), "EC2 Instance");
    }

    #[test]
    fn test_unknown_type() {
        let registry = Registry::builder().build();
        assert!(registry.is_empty());
        assert_eq!(
            registry.lookup("s3_bucket").unwrap_err(),
            RegistryError::UnknownResourceType("s3_bucket".into())
        );
        assert_eq!(registry.display_name("s3_bucket"), "s3_bucket");
    }

    #[test]
    fn test_names_sorted() {
        let mut builder = Registry::builder();
        for name in ["vpc", "ec2_instance", "s3_bucket"] {
            builder
                .register(ResourceType::new(name, name, empty_provider()))
                .unwrap();
        }
        assert_eq!(builder.build().names(), vec!["ec2_instance", "s3_bucket", "vpc"]);
    }

    #[test]
    fn test_fn_provider_receives_query() {
        let provider = FnProvider::new(|query: Query| async move {
            match query {
                Query::Identifier(id) => {
                    Ok::<_, BackendError>(Fetched::Found(serde_json::json!({ "id": id })))
                }
                Query::Filter(_) => Ok(Fetched::Many(Vec::new())),
            }
        });
        let fetched =
            tokio_test::block_on(provider.fetch(&Query::Identifier("i-1".into()))).unwrap();
        assert_eq!(fetched, Fetched::Found(serde_json::json!({ "id": "i-1" })));
    }
}
