//! cloudcheck
//!
//! Declarative checks against cloud resources. A profile is a list of
//! controls; each control holds assertions of the form "resource of type T
//! identified by R should satisfy matcher M". The runner resolves every
//! reference through the [`resource::Registry`], evaluates the matchers and
//! aggregates one verdict per assertion into a [`report::Report`].

pub mod config;
pub mod control;
pub mod error;
pub mod gcp;
pub mod matcher;
pub mod profile;
pub mod report;
pub mod resource;
pub mod runner;

pub use control::{Assertion, Control};
pub use matcher::{MatcherSpec, MatcherVerdict, Outcome};
pub use profile::Profile;
pub use report::Report;
pub use resource::{Registry, ResourceReference, ResourceType};
pub use runner::{RunOptions, Runner};
