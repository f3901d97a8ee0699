//! Result Aggregator / Report Model
//!
//! Verdicts are recorded into per-control slots keyed by declaration index, so
//! completion order never leaks into the finalized report.

use crate::control::{Assertion, Control, ControlRun, ControlState};
use crate::error::{ReportError, StateError};
use crate::matcher::{describe_spec, MatcherVerdict, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;
use uuid::Uuid;

/// Exit code when at least one assertion failed and none errored
pub const EXIT_FAILED: u8 = 100;
/// Exit code when at least one assertion errored
pub const EXIT_ERRORED: u8 = 101;

/// Pass/fail/error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl Summary {
    fn add(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail => self.failed += 1,
            Outcome::Error => self.errored += 1,
        }
    }
}

/// Leaf of the report tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionReport {
    pub index: usize,
    pub resource_type: String,
    #[serde(flatten)]
    pub verdict: MatcherVerdict,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReport {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<f64>,
    pub status: Outcome,
    /// Set when the control could not be built or run as a whole
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub assertions: Vec<AssertionReport>,
}

/// Finalized, read-only run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub controls: Vec<ControlReport>,
    /// Counts over assertions
    pub summary: Summary,
    /// Counts over controls
    pub control_summary: Summary,
}

impl Report {
    /// 0 when everything passed, [`EXIT_FAILED`] / [`EXIT_ERRORED`] otherwise
    pub fn exit_code(&self) -> u8 {
        if self.summary.errored > 0 || self.control_summary.errored > 0 {
            EXIT_ERRORED
        } else if self.summary.failed > 0 || self.control_summary.failed > 0 {
            EXIT_FAILED
        } else {
            0
        }
    }

    /// `(control, assertion, verdict)` in declaration order, without timing data
    pub fn verdicts(&self) -> Vec<(usize, usize, &MatcherVerdict)> {
        self.controls
            .iter()
            .flat_map(|c| c.assertions.iter().map(move |a| (c.index, a.index, &a.verdict)))
            .collect()
    }

    /// Human-readable rendering: one line per control and per assertion, then totals
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let heading = match &self.title {
            Some(title) => format!("Profile: {} ({})", title, self.profile),
            None => format!("Profile: {}", self.profile),
        };
        let _ = writeln!(out, "{}\n", heading);

        for control in &self.controls {
            let name = match &control.id {
                Some(id) => format!("{}: {}", id, control.title),
                None => control.title.clone(),
            };
            let _ = writeln!(out, "{} {}", marker(control.status), name);
            if let Some(error) = &control.error {
                let _ = writeln!(out, "       {}", error);
            }
            for assertion in &control.assertions {
                let verdict = &assertion.verdict;
                match &verdict.reason {
                    Some(reason) => {
                        let _ = writeln!(
                            out,
                            "    {} {} ({})",
                            marker(verdict.outcome),
                            verdict.description,
                            reason
                        );
                    }
                    None => {
                        let _ = writeln!(out, "    {} {}", marker(verdict.outcome), verdict.description);
                    }
                }
            }
        }

        let _ = writeln!(
            out,
            "\nControls: {} passed, {} failed, {} errored",
            self.control_summary.passed, self.control_summary.failed, self.control_summary.errored
        );
        let _ = writeln!(
            out,
            "Assertions: {} total, {} passed, {} failed, {} errored",
            self.summary.total, self.summary.passed, self.summary.failed, self.summary.errored
        );
        out
    }
}

fn marker(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Pass => "[PASS] ",
        Outcome::Fail => "[FAIL] ",
        Outcome::Error => "[ERROR]",
    }
}

struct ControlSlot {
    id: Option<String>,
    title: String,
    impact: Option<f64>,
    run: ControlRun,
    error: Option<String>,
    /// Used when a slot has to be filled without a real verdict
    fallback: Vec<(String, String)>,
    assertions: Vec<Option<AssertionReport>>,
    remaining: usize,
}

/// Collects verdicts during a run
pub struct Aggregator {
    run_id: Uuid,
    profile: String,
    title: Option<String>,
    started_at: DateTime<Utc>,
    slots: Vec<ControlSlot>,
}

impl Aggregator {
    /// Fallback subjects use the raw type name
    pub fn new(profile: impl Into<String>, title: Option<String>, controls: &[Control]) -> Self {
        Self::with_subjects(profile, title, controls, |a| {
            format!("{} {}", a.resource_type, a.reference)
                .trim_end()
                .to_string()
        })
    }

    /// `subject` renders the assertion's resource for fallback descriptions
    pub fn with_subjects(
        profile: impl Into<String>,
        title: Option<String>,
        controls: &[Control],
        subject: impl Fn(&Assertion) -> String,
    ) -> Self {
        let slots = controls
            .iter()
            .enumerate()
            .map(|(index, control)| ControlSlot {
                id: control.id.clone(),
                title: control.title.clone(),
                impact: control.impact,
                run: ControlRun::new(index),
                error: None,
                fallback: control
                    .assertions
                    .iter()
                    .map(|a| {
                        let description = describe_spec(&a.matcher, &subject(a));
                        (a.resource_type.clone(), description)
                    })
                    .collect(),
                assertions: vec![None; control.assertions.len()],
                remaining: control.assertions.len(),
            })
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            profile: profile.into(),
            title,
            started_at: Utc::now(),
            slots,
        }
    }

    pub fn state(&self, control: usize) -> Option<ControlState> {
        self.slots.get(control).map(|s| s.run.state())
    }

    /// Fallback description for an assertion that has no verdict of its own
    pub fn fallback_description(&self, control: usize, assertion: usize) -> Option<&str> {
        self.slots
            .get(control)?
            .fallback
            .get(assertion)
            .map(|(_, d)| d.as_str())
    }

    /// Pending -> Running. Controls without assertions complete immediately.
    pub fn begin(&mut self, control: usize) -> Result<(), ReportError> {
        let slot = self.slot_mut(control, 0)?;
        slot.run.start()?;
        if slot.remaining == 0 {
            slot.run.complete()?;
        }
        Ok(())
    }

    /// Attach a control-level failure (e.g. the body failed to construct)
    pub fn mark_error(&mut self, control: usize, message: impl Into<String>) -> Result<(), ReportError> {
        self.slot_mut(control, 0)?.error = Some(message.into());
        Ok(())
    }

    /// Write one verdict; each slot accepts exactly one write
    pub fn record(
        &mut self,
        control: usize,
        assertion: usize,
        verdict: MatcherVerdict,
        duration: Duration,
    ) -> Result<(), ReportError> {
        let slot = self.slot_mut(control, assertion)?;
        if slot.run.state() != ControlState::Running {
            return Err(ReportError::State(StateError::InvalidTransition {
                control,
                from: slot.run.state().label(),
                to: "recording",
            }));
        }

        let entry = slot
            .assertions
            .get_mut(assertion)
            .ok_or(ReportError::OutOfRange { control, assertion })?;
        if entry.is_some() {
            return Err(ReportError::AlreadyRecorded { control, assertion });
        }

        let resource_type = slot.fallback[assertion].0.clone();
        *entry = Some(AssertionReport {
            index: assertion,
            resource_type,
            verdict,
            duration_ms: duration.as_millis() as u64,
        });

        slot.remaining -= 1;
        if slot.remaining == 0 {
            slot.run.complete()?;
        }
        Ok(())
    }

    /// Freeze into a [`Report`]; slots never written become `error: cancelled`
    pub fn finalize(self) -> Report {
        let mut summary = Summary::default();
        let mut control_summary = Summary::default();

        let controls: Vec<ControlReport> = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let assertions: Vec<AssertionReport> = slot
                    .assertions
                    .into_iter()
                    .enumerate()
                    .map(|(i, entry)| {
                        entry.unwrap_or_else(|| {
                            let (resource_type, description) = slot.fallback[i].clone();
                            tracing::warn!("Assertion {}.{} never ran", index, i);
                            AssertionReport {
                                index: i,
                                resource_type,
                                verdict: MatcherVerdict::error(description, "cancelled"),
                                duration_ms: 0,
                            }
                        })
                    })
                    .collect();

                for a in &assertions {
                    summary.add(a.verdict.outcome);
                }

                let status = control_status(slot.error.is_some(), &assertions);
                control_summary.add(status);

                ControlReport {
                    index,
                    id: slot.id,
                    title: slot.title,
                    impact: slot.impact,
                    status,
                    error: slot.error,
                    assertions,
                }
            })
            .collect();

        Report {
            run_id: self.run_id,
            profile: self.profile,
            title: self.title,
            started_at: self.started_at,
            finished_at: Utc::now(),
            controls,
            summary,
            control_summary,
        }
    }

    fn slot_mut(&mut self, control: usize, assertion: usize) -> Result<&mut ControlSlot, ReportError> {
        self.slots
            .get_mut(control)
            .ok_or(ReportError::OutOfRange { control, assertion })
    }
}

/// pass iff all pass; error iff any error; fail otherwise
pub fn control_status(control_error: bool, assertions: &[AssertionReport]) -> Outcome {
    if control_error || assertions.iter().any(|a| a.verdict.outcome == Outcome::Error) {
        Outcome::Error
    } else if assertions.iter().all(|a| a.verdict.outcome == Outcome::Pass) {
        Outcome::Pass
    } else {
        Outcome::Fail
    }
}
