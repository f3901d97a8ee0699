//! Resource abstraction layer
//!
//! Resource types are registered against providers; references are resolved
//! through them into handles that matchers can inspect.
//!
//! # Architecture
//!
//! - [`registry`] - Resource type name to provider, frozen after start-up
//! - [`resolver`] - Calls providers and normalizes singular/plural results
//! - [`handle`] - Resolved handles, collections and the `Inspect` capability set
//! - [`inventory`] - Cached snapshot provider loaded from YAML/JSON
//!
//! # Example
//!
//! ```ignore
//! use cloudcheck::resource::{Registry, Resolver, ResourceReference};
//!
//! async fn probe(registry: std::sync::Arc<Registry>) -> anyhow::Result<bool> {
//!     let resolver = Resolver::new(registry);
//!     let reference = ResourceReference::id("i-01a2349e94458a507");
//!     let resolved = resolver.resolve("ec2_instance", &reference).await?;
//!     Ok(cloudcheck::resource::Inspect::exists(&resolved))
//! }
//! ```

pub mod handle;
pub mod inventory;
pub mod registry;
pub mod resolver;

pub use handle::{
    Filter, Inspect, ResourceHandle, ResourceHandleCollection, ResourceReference, Resolved,
};
pub use inventory::{Inventory, InventoryProvider};
pub use registry::{
    Fetched, FnProvider, Query, Registry, RegistryBuilder, ResourceProvider, ResourceType,
};
pub use resolver::Resolver;
