//! Resource Resolver
//!
//! Turns a `(type, reference)` pair into a [`Resolved`] value by calling the
//! registered provider and normalizing what comes back.

use super::handle::{ResourceHandle, ResourceHandleCollection, ResourceReference, Resolved};
use super::registry::{Fetched, Query, Registry};
use crate::error::{BackendError, ResolveError};
use std::sync::Arc;

/// Resolves references against the registry's providers
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<Registry>,
}

impl Resolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Human-readable subject, e.g. "EC2 Instance i-01a2349e94458a507"
    pub fn subject(&self, type_name: &str, reference: &ResourceReference) -> String {
        let display = self.registry.display_name(type_name);
        let addressed = reference.to_string();
        if addressed.is_empty() {
            display.to_string()
        } else {
            format!("{} {}", display, addressed)
        }
    }

    /// Resolve a reference.
    ///
    /// Identifier references produce [`Resolved::Single`], filter references
    /// [`Resolved::Collection`]. A reference with neither resolves to a missing
    /// single handle without calling the provider.
    pub async fn resolve(
        &self,
        type_name: &str,
        reference: &ResourceReference,
    ) -> Result<Resolved, ResolveError> {
        let resource_type = self.registry.lookup(type_name)?;
        let provider = resource_type.provider();

        if let Some(identifier) = reference.addressed_id() {
            tracing::debug!("resolve: type={}, id={}", type_name, identifier);
            let fetched = provider
                .fetch(&Query::Identifier(identifier.to_string()))
                .await?;
            return Ok(Resolved::Single(single(identifier, fetched)?));
        }

        if reference.filter.is_empty() {
            tracing::debug!("resolve: type={} with empty reference", type_name);
            return Ok(Resolved::Single(ResourceHandle::not_found()));
        }

        tracing::debug!("resolve: type={}, filter={:?}", type_name, reference.filter);
        let fetched = provider
            .fetch(&Query::Filter(reference.filter.clone()))
            .await?;
        let collection = match fetched {
            Fetched::Found(record) => ResourceHandleCollection::from_iter([record]),
            Fetched::Many(records) => records.into_iter().collect(),
            Fetched::NotFound => ResourceHandleCollection::default(),
        };
        tracing::debug!("resolve: type={} matched {}", type_name, collection.len());

        Ok(Resolved::Collection(collection))
    }
}

/// Singular mode must yield at most one entity
fn single(identifier: &str, fetched: Fetched) -> Result<ResourceHandle, BackendError> {
    match fetched {
        Fetched::Found(record) => Ok(ResourceHandle::found(record)),
        Fetched::NotFound => Ok(ResourceHandle::not_found()),
        Fetched::Many(mut records) => match records.len() {
            0 => Ok(ResourceHandle::not_found()),
            1 => Ok(ResourceHandle::found(records.remove(0))),
            count => Err(BackendError::Ambiguous {
                identifier: identifier.to_string(),
                count,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::resource::{FnProvider, ResourceType};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolver_with(fetched: Fetched, calls: Arc<AtomicUsize>) -> Resolver {
        let provider = FnProvider::new(move |_query: Query| {
            calls.fetch_add(1, Ordering::SeqCst);
            let fetched = fetched.clone();
            async move { Ok::<_, BackendError>(fetched) }
        });
        let mut builder = Registry::builder();
        builder
            .register(ResourceType::new("ec2_instance", "EC2 Instance", Arc::new(provider)))
            .unwrap();
        Resolver::new(Arc::new(builder.build()))
    }

    #[tokio::test]
    async fn test_identifier_found() {
        let resolver = resolver_with(Fetched::Found(json!({"id": "i-1"})), Arc::default());
        let resolved = resolver
            .resolve("ec2_instance", &ResourceReference::id("i-1"))
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Single(ResourceHandle::found(json!({"id": "i-1"}))));
    }

    #[tokio::test]
    async fn test_identifier_not_found_is_not_an_error() {
        let resolver = resolver_with(Fetched::NotFound, Arc::default());
        let resolved = resolver
            .resolve("ec2_instance", &ResourceReference::id("i-missing"))
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Single(ResourceHandle::not_found()));
    }

    #[tokio::test]
    async fn test_identifier_matching_many_is_ambiguous() {
        let resolver = resolver_with(
            Fetched::Many(vec![json!({"id": "a"}), json!({"id": "b"})]),
            Arc::default(),
        );
        let err = resolver
            .resolve("ec2_instance", &ResourceReference::id("dup"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Backend(BackendError::Ambiguous {
                identifier: "dup".into(),
                count: 2
            })
        );
    }

    #[tokio::test]
    async fn test_filter_keeps_every_match() {
        let resolver = resolver_with(
            Fetched::Many(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]),
            Arc::default(),
        );
        let resolved = resolver
            .resolve("ec2_instance", &ResourceReference::filter([("name", "web")]))
            .await
            .unwrap();
        match resolved {
            Resolved::Collection(c) => assert_eq!(c.len(), 3),
            other => panic!("expected collection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_reference_skips_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with(Fetched::Found(json!({})), calls.clone());
        let resolved = resolver
            .resolve("ec2_instance", &ResourceReference::empty())
            .await
            .unwrap();
        assert_eq!(resolved, Resolved::Single(ResourceHandle::not_found()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_identifier_skips_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = resolver_with(Fetched::Found(json!({"id": "x"})), calls.clone());
        for blank in ["", "   "] {
            let resolved = resolver
                .resolve("ec2_instance", &ResourceReference::id(blank))
                .await
                .unwrap();
            assert_eq!(resolved, Resolved::Single(ResourceHandle::not_found()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_propagates() {
        let resolver = resolver_with(Fetched::NotFound, Arc::default());
        let err = resolver
            .resolve("s3_bucket", &ResourceReference::id("b"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Registry(RegistryError::UnknownResourceType("s3_bucket".into()))
        );
    }

    #[test]
    fn test_subject_rendering() {
        let resolver = resolver_with(Fetched::NotFound, Arc::default());
        assert_eq!(
            resolver.subject("ec2_instance", &ResourceReference::id("i-01a2349e94458a507")),
            "EC2 Instance i-01a2349e94458a507"
        );
        assert_eq!(
            resolver.subject("ec2_instance", &ResourceReference::filter([("name", "my-instance")])),
            "EC2 Instance with name=my-instance"
        );
        assert_eq!(
            resolver.subject("ec2_instance", &ResourceReference::empty()),
            "EC2 Instance"
        );
    }
}
