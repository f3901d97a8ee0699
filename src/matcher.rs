//! Matcher Evaluation Engine
//!
//! A [`MatcherSpec`] is the declarative form coming from the profile loader.
//! It compiles into an [`Expectation`], which evaluates a resolution into a
//! three-valued [`MatcherVerdict`]:
//!
//! - `pass` / `fail` when the check ran (resource absent is a `fail`)
//! - `error` when the check could not run (backend failure, bad data)

use crate::error::{BackendError, MatcherError};
use crate::resource::handle::{loosely_equal, render_value};
use crate::resource::{Inspect, Resolved};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Three-valued assertion outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Error => "error",
        };
        f.write_str(label)
    }
}

/// Result of one assertion; immutable once produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherVerdict {
    pub outcome: Outcome,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MatcherVerdict {
    pub fn pass(description: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Pass,
            description: description.into(),
            reason: None,
        }
    }

    pub fn fail(description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Fail,
            description: description.into(),
            reason: Some(reason.into()),
        }
    }

    pub fn error(description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Error,
            description: description.into(),
            reason: Some(reason.into()),
        }
    }
}

/// Declarative matcher as written in a profile (`should: exist`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default)]
    pub negated: bool,
}

impl MatcherSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute: None,
            expected: None,
            negated: false,
        }
    }

    pub fn exist() -> Self {
        Self::new("exist")
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn expected(mut self, expected: impl Into<Value>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// `should_not`
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

/// Numeric comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        }
    }

    fn holds(self, actual: f64, expected: f64) -> bool {
        match self {
            Comparison::Gt => actual > expected,
            Comparison::Ge => actual >= expected,
            Comparison::Lt => actual < expected,
            Comparison::Le => actual <= expected,
        }
    }
}

/// Supported predicates
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Exist,
    Eq { attribute: String, expected: Value },
    Compare { attribute: String, op: Comparison, expected: f64 },
    BeIn { attribute: String, allowed: Vec<Value> },
    HaveCount(usize),
}

/// A compiled matcher plus its polarity
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    matcher: Matcher,
    negated: bool,
}

/// Outcome of the predicate itself, before polarity is applied
enum Check {
    Holds { holds: bool, observed: String },
    /// Attribute matchers need something to look at
    Missing(String),
}

impl Expectation {
    pub fn new(matcher: Matcher, negated: bool) -> Self {
        Self { matcher, negated }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Build an expectation from its declarative form
    pub fn compile(spec: &MatcherSpec) -> Result<Self, MatcherError> {
        let name = spec.name.as_str();
        let matcher = match name {
            "exist" | "exists" => Matcher::Exist,
            "eq" | "cmp" => Matcher::Eq {
                attribute: required_attribute(spec)?,
                expected: required_expected(spec)?.clone(),
            },
            "gt" | "be_greater_than" => compare(spec, Comparison::Gt)?,
            "ge" | "be_greater_than_or_equal_to" => compare(spec, Comparison::Ge)?,
            "lt" | "be_less_than" => compare(spec, Comparison::Lt)?,
            "le" | "be_less_than_or_equal_to" => compare(spec, Comparison::Le)?,
            "be_in" => {
                let attribute = required_attribute(spec)?;
                let Value::Array(allowed) = required_expected(spec)? else {
                    return Err(invalid(spec, "a list"));
                };
                Matcher::BeIn {
                    attribute,
                    allowed: allowed.clone(),
                }
            }
            "have_count" => {
                let count = required_expected(spec)?
                    .as_u64()
                    .ok_or_else(|| invalid(spec, "a non-negative integer"))?;
                Matcher::HaveCount(count as usize)
            }
            other => return Err(MatcherError::UnknownMatcher(other.to_string())),
        };

        Ok(Self::new(matcher, spec.negated))
    }

    /// Render "expected <subject> ... to <matcher>"
    pub fn describe(&self, subject: &str) -> String {
        let to = if self.negated { "not to" } else { "to" };
        match &self.matcher {
            Matcher::Exist => format!("expected {} {} exist", subject, to),
            Matcher::Eq {
                attribute,
                expected,
            } => format!("expected {} {} {} eq {}", subject, attribute, to, expected),
            Matcher::Compare {
                attribute,
                op,
                expected,
            } => format!(
                "expected {} {} {} be {} {}",
                subject,
                attribute,
                to,
                op.symbol(),
                expected
            ),
            Matcher::BeIn { attribute, allowed } => format!(
                "expected {} {} {} be in {}",
                subject,
                attribute,
                to,
                Value::Array(allowed.clone())
            ),
            Matcher::HaveCount(count) => {
                format!("expected {} {} have count {}", subject, to, count)
            }
        }
    }

    /// Evaluate against a resolution. Backend failures short-circuit to `error`.
    pub fn evaluate(
        &self,
        subject: &str,
        resolution: &Result<Resolved, BackendError>,
    ) -> MatcherVerdict {
        let description = self.describe(subject);

        let resolved = match resolution {
            Ok(resolved) => resolved,
            Err(err) => return MatcherVerdict::error(description, err.to_string()),
        };

        match self.check(resolved) {
            Check::Missing(reason) => MatcherVerdict::fail(description, reason),
            Check::Holds { holds, observed } => {
                if holds != self.negated {
                    MatcherVerdict::pass(description)
                } else {
                    MatcherVerdict::fail(description, observed)
                }
            }
        }
    }

    fn check(&self, resolved: &Resolved) -> Check {
        match &self.matcher {
            Matcher::Exist => Check::Holds {
                holds: resolved.exists(),
                observed: presence(resolved),
            },
            Matcher::HaveCount(count) => Check::Holds {
                holds: resolved.size() == *count,
                observed: format!("got count {}", resolved.size()),
            },
            Matcher::Eq {
                attribute,
                expected,
            } => check_values(resolved, attribute, |v| loosely_equal(v, expected)),
            Matcher::Compare {
                attribute,
                op,
                expected,
            } => check_values(resolved, attribute, |v| {
                as_number(v)
                    .map(|n| op.holds(n, *expected))
                    .unwrap_or(false)
            }),
            Matcher::BeIn { attribute, allowed } => check_values(resolved, attribute, |v| {
                allowed.iter().any(|a| loosely_equal(v, a))
            }),
        }
    }
}

/// Every entity must carry the attribute and satisfy the predicate
fn check_values(resolved: &Resolved, attribute: &str, predicate: impl Fn(&Value) -> bool) -> Check {
    let values = resolved.attribute_values(attribute);
    if values.is_empty() {
        return Check::Missing(presence(resolved));
    }

    let holds = values.iter().all(|v| v.map(&predicate).unwrap_or(false));
    let observed: Vec<String> = values
        .iter()
        .map(|v| v.map(render_value).unwrap_or_else(|| "(absent)".to_string()))
        .collect();

    Check::Holds {
        holds,
        observed: format!("got {}", observed.join(", ")),
    }
}

fn presence(resolved: &Resolved) -> String {
    match resolved {
        Resolved::Single(handle) if handle.exists() => "resource exists".to_string(),
        Resolved::Single(_) => "resource not found".to_string(),
        Resolved::Collection(c) if c.len() == 1 => "1 match".to_string(),
        Resolved::Collection(c) => format!("{} matches", c.len()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required_attribute(spec: &MatcherSpec) -> Result<String, MatcherError> {
    spec.attribute
        .clone()
        .ok_or_else(|| MatcherError::MissingAttribute(spec.name.clone()))
}

fn required_expected(spec: &MatcherSpec) -> Result<&Value, MatcherError> {
    spec.expected
        .as_ref()
        .ok_or_else(|| MatcherError::MissingExpected(spec.name.clone()))
}

fn compare(spec: &MatcherSpec, op: Comparison) -> Result<Matcher, MatcherError> {
    let attribute = required_attribute(spec)?;
    let expected = as_number(required_expected(spec)?).ok_or_else(|| invalid(spec, "a number"))?;
    Ok(Matcher::Compare {
        attribute,
        op,
        expected,
    })
}

/// Description for a matcher that may not compile, in the same shape as
/// [`Expectation::describe`]
pub fn describe_spec(spec: &MatcherSpec, subject: &str) -> String {
    if let Ok(expectation) = Expectation::compile(spec) {
        return expectation.describe(subject);
    }

    let mut parts = vec![format!("expected {}", subject)];
    if let Some(attribute) = &spec.attribute {
        parts.push(attribute.clone());
    }
    parts.push(if spec.negated { "not to" } else { "to" }.to_string());
    parts.push(spec.name.clone());
    if let Some(expected) = &spec.expected {
        parts.push(expected.to_string());
    }
    parts.join(" ")
}

fn invalid(spec: &MatcherSpec, wanted: &'static str) -> MatcherError {
    MatcherError::InvalidExpected {
        matcher: spec.name.clone(),
        wanted,
        got: spec
            .expected
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "nothing".to_string()),
    }
}
