//! Control Runner
//!
//! Executes controls in loader order and assertions in declaration order.
//! Every declared assertion ends up with exactly one verdict:
//!
//! - backend failures and provider panics become `error` verdicts
//! - an unknown resource type errors that assertion and every later assertion
//!   of the same control using the same type
//! - assertions still running when the run deadline passes are `cancelled`
//!
//! With `concurrency > 1` up to that many assertions of a control resolve at
//! once; the aggregator restores declaration order.

use crate::control::Control;
use crate::error::{BackendError, RegistryError, ResolveError};
use crate::matcher::{Expectation, MatcherVerdict, Outcome};
use crate::profile::Profile;
use crate::report::{Aggregator, ControlReport, Report};
use crate::resource::{Registry, ResourceReference, Resolver};
use futures::{stream, FutureExt, StreamExt};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Execution knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Assertions resolved at once within a control (1 = sequential)
    pub concurrency: usize,
    /// Deadline for the whole run
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout: None,
        }
    }
}

/// Interprets controls against a frozen registry
#[derive(Debug, Clone)]
pub struct Runner {
    resolver: Resolver,
    options: RunOptions,
}

impl Runner {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            resolver: Resolver::new(registry),
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Run every control of a loaded profile
    pub async fn run(&self, profile: &Profile) -> Report {
        self.run_controls(&profile.name, profile.title.clone(), &profile.controls)
            .await
    }

    /// Run a single control on its own
    pub async fn run_control(&self, control: &Control) -> ControlReport {
        let mut report = self
            .run_controls(&control.title, None, std::slice::from_ref(control))
            .await;
        // One control in, one control report out
        report.controls.remove(0)
    }

    pub async fn run_controls(
        &self,
        profile: &str,
        title: Option<String>,
        controls: &[Control],
    ) -> Report {
        tracing::info!(
            "Running profile {} ({} controls, concurrency {})",
            profile,
            controls.len(),
            self.options.concurrency
        );

        let deadline = self.options.timeout.map(|t| Instant::now() + t);
        let mut aggregator = Aggregator::with_subjects(profile, title, controls, |a| {
            self.resolver.subject(&a.resource_type, &a.reference)
        });

        for (index, control) in controls.iter().enumerate() {
            self.execute_control(index, control, deadline, &mut aggregator)
                .await;
        }

        let report = aggregator.finalize();
        tracing::info!(
            "Profile {} finished: {} passed, {} failed, {} errored",
            profile,
            report.summary.passed,
            report.summary.failed,
            report.summary.errored
        );
        report
    }

    async fn execute_control(
        &self,
        index: usize,
        control: &Control,
        deadline: Option<Instant>,
        aggregator: &mut Aggregator,
    ) {
        if let Err(err) = aggregator.begin(index) {
            tracing::error!("Cannot start control {}: {}", index, err);
            return;
        }
        tracing::info!("Control {}: {}", index, control.title);

        let expectations = match control.prepare() {
            Ok(expectations) => expectations,
            Err(err) => {
                tracing::warn!("Control '{}' failed to construct: {}", control.title, err);
                self.reject_control(index, control, &err.to_string(), aggregator);
                return;
            }
        };

        let poisoned: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let jobs = control.assertions.iter().zip(expectations.iter()).enumerate();

        let mut verdicts = stream::iter(jobs)
            .map(|(position, (assertion, expectation))| {
                let poisoned = &poisoned;
                async move {
                    let started = Instant::now();
                    let verdict = self
                        .execute_assertion(
                            &assertion.resource_type,
                            &assertion.reference,
                            expectation,
                            deadline,
                            poisoned,
                        )
                        .await;
                    (position, verdict, started.elapsed())
                }
            })
            .buffer_unordered(self.options.concurrency.max(1));

        while let Some((position, verdict, elapsed)) = verdicts.next().await {
            if verdict.outcome == Outcome::Error {
                tracing::warn!(
                    "{}: error ({})",
                    verdict.description,
                    verdict.reason.as_deref().unwrap_or("-")
                );
            } else {
                tracing::debug!("{}: {}", verdict.description, verdict.outcome);
            }
            if let Err(err) = aggregator.record(index, position, verdict, elapsed) {
                tracing::error!("Dropping verdict: {}", err);
            }
        }
    }

    /// A control whose body failed to construct: every assertion gets the error
    fn reject_control(
        &self,
        index: usize,
        control: &Control,
        message: &str,
        aggregator: &mut Aggregator,
    ) {
        if let Err(err) = aggregator.mark_error(index, message) {
            tracing::error!("{}", err);
        }
        for position in 0..control.assertions.len() {
            let description = aggregator
                .fallback_description(index, position)
                .unwrap_or_default()
                .to_string();
            let verdict = MatcherVerdict::error(description, message);
            if let Err(err) = aggregator.record(index, position, verdict, Duration::ZERO) {
                tracing::error!("Dropping verdict: {}", err);
            }
        }
    }

    async fn execute_assertion(
        &self,
        resource_type: &str,
        reference: &ResourceReference,
        expectation: &Expectation,
        deadline: Option<Instant>,
        poisoned: &Mutex<HashSet<String>>,
    ) -> MatcherVerdict {
        let subject = self.resolver.subject(resource_type, reference);
        let description = expectation.describe(&subject);

        let is_poisoned = poisoned
            .lock()
            .map(|set| set.contains(resource_type))
            .unwrap_or(false);
        if is_poisoned {
            let err = RegistryError::UnknownResourceType(resource_type.to_string());
            return MatcherVerdict::error(description, err.to_string());
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return MatcherVerdict::error(description, BackendError::Cancelled.to_string());
        }

        let resolve = AssertUnwindSafe(self.resolver.resolve(resource_type, reference)).catch_unwind();
        let outcome = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, resolve).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return MatcherVerdict::error(description, BackendError::Cancelled.to_string())
                }
            },
            None => resolve.await,
        };

        let resolution = match outcome {
            Ok(Ok(resolved)) => Ok(resolved),
            Ok(Err(ResolveError::Backend(err))) => Err(err),
            Ok(Err(ResolveError::Registry(err))) => {
                if let Ok(mut set) = poisoned.lock() {
                    set.insert(resource_type.to_string());
                }
                return MatcherVerdict::error(description, err.to_string());
            }
            Err(panic) => Err(BackendError::Panicked(panic_message(panic.as_ref()))),
        };

        std::panic::catch_unwind(AssertUnwindSafe(|| expectation.evaluate(&subject, &resolution)))
            .unwrap_or_else(|panic| {
                MatcherVerdict::error(
                    description,
                    format!("matcher panicked: {}", panic_message(panic.as_ref())),
                )
            })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatcherSpec;
    use crate::resource::{Fetched, FnProvider, Query, ResourceReference, ResourceType};
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        let provider = FnProvider::new(|query: Query| async move {
            match query {
                Query::Identifier(id) if id == "i-boom" => panic!("provider exploded"),
                Query::Identifier(id) if id == "i-slow" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Fetched::NotFound)
                }
                Query::Identifier(id) if id.starts_with("i-0") => {
                    Ok(Fetched::Found(json!({ "instance_id": id })))
                }
                Query::Identifier(_) => Ok::<_, BackendError>(Fetched::NotFound),
                Query::Filter(_) => Ok(Fetched::Many(Vec::new())),
            }
        });
        let mut builder = Registry::builder();
        builder
            .register(ResourceType::new("ec2_instance", "EC2 Instance", Arc::new(provider)))
            .unwrap();
        Arc::new(builder.build())
    }

    #[tokio::test]
    async fn test_panicking_provider_is_isolated() {
        let control = Control::builder("isolation")
            .assertion("ec2_instance", ResourceReference::id("i-boom"), MatcherSpec::exist())
            .assertion("ec2_instance", ResourceReference::id("i-01"), MatcherSpec::exist())
            .build();

        let report = Runner::new(registry()).run_control(&control).await;
        assert_eq!(report.assertions[0].verdict.outcome, Outcome::Error);
        assert_eq!(
            report.assertions[0].verdict.reason.as_deref(),
            Some("provider panicked: provider exploded")
        );
        assert_eq!(report.assertions[1].verdict.outcome, Outcome::Pass);
        assert_eq!(report.status, Outcome::Error);
    }

    #[tokio::test]
    async fn test_unknown_type_poisons_same_type_only() {
        let control = Control::builder("mixed")
            .assertion("s3_bucket", ResourceReference::id("logs"), MatcherSpec::exist())
            .assertion("ec2_instance", ResourceReference::id("i-01"), MatcherSpec::exist())
            .assertion("s3_bucket", ResourceReference::id("other"), MatcherSpec::exist())
            .build();

        let report = Runner::new(registry()).run_control(&control).await;
        let outcomes: Vec<Outcome> = report.assertions.iter().map(|a| a.verdict.outcome).collect();
        assert_eq!(outcomes, vec![Outcome::Error, Outcome::Pass, Outcome::Error]);
        assert_eq!(
            report.assertions[2].verdict.reason.as_deref(),
            Some("unknown resource type 's3_bucket'")
        );
        assert_eq!(
            report.assertions[0].verdict.description,
            "expected s3_bucket logs to exist"
        );
    }

    #[tokio::test]
    async fn test_construction_failure_is_fatal_to_that_control_only() {
        let broken = Control::builder("broken")
            .assertion("ec2_instance", ResourceReference::id("i-01"), MatcherSpec::exist().negate())
            .assertion("ec2_instance", ResourceReference::id("i-01"), MatcherSpec::new("be_shiny"))
            .build();
        let healthy = Control::builder("healthy")
            .assertion("ec2_instance", ResourceReference::id("i-01"), MatcherSpec::exist())
            .build();

        let report = Runner::new(registry())
            .run_controls("p", None, &[broken, healthy])
            .await;
        assert_eq!(report.controls[0].status, Outcome::Error);
        assert_eq!(
            report.controls[0].error.as_deref(),
            Some("assertion #1: unknown matcher 'be_shiny'")
        );
        assert_eq!(report.controls[0].assertions.len(), 2);
        assert!(report.controls[0]
            .assertions
            .iter()
            .all(|a| a.verdict.outcome == Outcome::Error));
        let descriptions: Vec<&str> = report.controls[0]
            .assertions
            .iter()
            .map(|a| a.verdict.description.as_str())
            .collect();
        assert_eq!(
            descriptions,
            vec![
                "expected EC2 Instance i-01 not to exist",
                "expected EC2 Instance i-01 to be_shiny"
            ]
        );
        assert_eq!(report.controls[1].status, Outcome::Pass);
        assert_eq!(report.summary.total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_in_flight_resolution() {
        let control = Control::builder("slow")
            .assertion("ec2_instance", ResourceReference::id("i-01"), MatcherSpec::exist())
            .assertion("ec2_instance", ResourceReference::id("i-slow"), MatcherSpec::exist())
            .assertion("ec2_instance", ResourceReference::id("i-02"), MatcherSpec::exist())
            .build();

        let runner = Runner::new(registry()).with_options(RunOptions {
            concurrency: 1,
            timeout: Some(Duration::from_secs(5)),
        });
        let report = runner.run_control(&control).await;

        assert_eq!(report.assertions[0].verdict.outcome, Outcome::Pass);
        assert_eq!(report.assertions[1].verdict.outcome, Outcome::Error);
        assert_eq!(report.assertions[1].verdict.reason.as_deref(), Some("cancelled"));
        // Deadline already passed for everything after it
        assert_eq!(report.assertions[2].verdict.reason.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_concurrent_run_keeps_declaration_order() {
        let mut builder = Control::builder("many");
        for i in 0..20 {
            let id = if i % 3 == 0 { format!("x-{}", i) } else { format!("i-0{}", i) };
            builder = builder.assertion("ec2_instance", ResourceReference::id(id), MatcherSpec::exist());
        }
        let control = builder.build();

        let sequential = Runner::new(registry()).run_control(&control).await;
        let concurrent = Runner::new(registry())
            .with_options(RunOptions {
                concurrency: 8,
                timeout: None,
            })
            .run_control(&control)
            .await;

        let strip = |r: &ControlReport| -> Vec<MatcherVerdict> {
            r.assertions.iter().map(|a| a.verdict.clone()).collect()
        };
        assert_eq!(strip(&sequential), strip(&concurrent));
        assert_eq!(concurrent.assertions[0].verdict.outcome, Outcome::Fail);
        assert_eq!(concurrent.assertions[1].verdict.outcome, Outcome::Pass);
    }
}
