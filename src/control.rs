//! Controls
//!
//! A control is a titled list of assertion records. Records are plain data
//! built by the loader; the runner interprets them.

use crate::error::{ControlError, StateError};
use crate::matcher::{Expectation, MatcherSpec};
use crate::resource::ResourceReference;
use serde::{Deserialize, Serialize};

/// One `describe ... it { should ... }` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub resource_type: String,
    pub reference: ResourceReference,
    pub matcher: MatcherSpec,
}

impl Assertion {
    pub fn new(
        resource_type: impl Into<String>,
        reference: ResourceReference,
        matcher: MatcherSpec,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            reference,
            matcher,
        }
    }
}

/// A named compliance rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub assertions: Vec<Assertion>,
}

impl Control {
    pub fn builder(title: impl Into<String>) -> ControlBuilder {
        ControlBuilder {
            control: Control {
                id: None,
                title: title.into(),
                impact: None,
                description: None,
                assertions: Vec::new(),
            },
        }
    }

    /// Compile every matcher; any failure makes the whole control unrunnable
    pub fn prepare(&self) -> Result<Vec<Expectation>, ControlError> {
        self.assertions
            .iter()
            .enumerate()
            .map(|(index, assertion)| {
                Expectation::compile(&assertion.matcher)
                    .map_err(|source| ControlError::InvalidMatcher { index, source })
            })
            .collect()
    }
}

/// Builder returned by [`Control::builder`]
#[derive(Debug, Clone)]
pub struct ControlBuilder {
    control: Control,
}

impl ControlBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.control.id = Some(id.into());
        self
    }

    pub fn impact(mut self, impact: f64) -> Self {
        self.control.impact = Some(impact);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.control.description = Some(description.into());
        self
    }

    /// Append an assertion; declaration order is execution order
    pub fn assertion(
        mut self,
        resource_type: impl Into<String>,
        reference: ResourceReference,
        matcher: MatcherSpec,
    ) -> Self {
        self.control
            .assertions
            .push(Assertion::new(resource_type, reference, matcher));
        self
    }

    pub fn build(self) -> Control {
        self.control
    }
}

/// Control lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Pending,
    Running,
    Completed,
}

impl ControlState {
    pub(crate) fn label(self) -> &'static str {
        match self {
            ControlState::Pending => "pending",
            ControlState::Running => "running",
            ControlState::Completed => "completed",
        }
    }
}

/// Tracks one control through Pending -> Running -> Completed, exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRun {
    index: usize,
    state: ControlState,
}

impl ControlRun {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: ControlState::Pending,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn start(&mut self) -> Result<(), StateError> {
        self.transition(ControlState::Pending, ControlState::Running)
    }

    pub fn complete(&mut self) -> Result<(), StateError> {
        self.transition(ControlState::Running, ControlState::Completed)
    }

    fn transition(&mut self, from: ControlState, to: ControlState) -> Result<(), StateError> {
        if self.state != from {
            return Err(StateError::InvalidTransition {
                control: self.index,
                from: self.state.label(),
                to: to.label(),
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MatcherError;

    #[test]
    fn test_builder_keeps_declaration_order() {
        let control = Control::builder("Sample Section")
            .id("ec2-1")
            .impact(0.7)
            .assertion(
                "ec2_instance",
                ResourceReference::id("i-01a2349e94458a507"),
                MatcherSpec::exist(),
            )
            .assertion(
                "ec2_instance",
                ResourceReference::filter([("name", "my-instance")]),
                MatcherSpec::exist(),
            )
            .build();

        assert_eq!(control.title, "Sample Section");
        assert_eq!(control.id.as_deref(), Some("ec2-1"));
        assert_eq!(control.assertions.len(), 2);
        assert!(control.assertions[0].reference.identifier.is_some());
        assert!(control.assertions[1].reference.identifier.is_none());
        assert_eq!(control.prepare().unwrap().len(), 2);
    }

    #[test]
    fn test_prepare_reports_failing_index() {
        let control = Control::builder("broken")
            .assertion("ec2_instance", ResourceReference::id("i-1"), MatcherSpec::exist())
            .assertion("ec2_instance", ResourceReference::id("i-1"), MatcherSpec::new("be_shiny"))
            .build();

        assert_eq!(
            control.prepare().unwrap_err(),
            ControlError::InvalidMatcher {
                index: 1,
                source: MatcherError::UnknownMatcher("be_shiny".into())
            }
        );
    }

    #[test]
    fn test_state_machine() {
        let mut run = ControlRun::new(3);
        assert_eq!(run.state(), ControlState::Pending);
        assert!(run.complete().is_err());

        run.start().unwrap();
        assert_eq!(run.state(), ControlState::Running);
        assert!(run.start().is_err());

        run.complete().unwrap();
        assert_eq!(run.state(), ControlState::Completed);
        assert_eq!(
            run.start().unwrap_err(),
            StateError::InvalidTransition {
                control: 3,
                from: "completed",
                to: "running"
            }
        );
    }
}
