//! GCP API interaction module
//!
//! Live backend for resource types that live in Google Cloud.
//!
//! # Module Structure
//!
//! - [`auth`] - Application Default Credentials and gcloud defaults
//! - [`client`] - Project/zone aware client and Compute Engine URLs
//! - [`http`] - GET requests and status classification
//! - [`instances`] - `gcp_compute_instance` provider
//!
//! # Example
//!
//! ```ignore
//! use cloudcheck::gcp::{client::GcpSettings, instances};
//!
//! let provider = instances::ComputeInstanceProvider::lazy(GcpSettings::new("my-project", "us-central1-a"));
//! builder.register(ResourceType::new(instances::RESOURCE_TYPE, instances::DISPLAY_NAME, Arc::new(provider)))?;
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod instances;

use crate::error::RegistryError;
use crate::resource::{RegistryBuilder, ResourceType};
use client::GcpSettings;
use instances::ComputeInstanceProvider;
use std::sync::Arc;

/// Register every GCP-backed resource type; credentials are resolved on first fetch
pub fn register_into(
    builder: &mut RegistryBuilder,
    settings: GcpSettings,
) -> Result<(), RegistryError> {
    builder.register(ResourceType::new(
        instances::RESOURCE_TYPE,
        instances::DISPLAY_NAME,
        Arc::new(ComputeInstanceProvider::lazy(settings)),
    ))?;
    Ok(())
}
