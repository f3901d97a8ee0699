//! Profile Loader
//!
//! Reads a YAML profile into the normalized control list the runner consumes.
//! Named controls come first; top-level `describe` entries follow, one
//! generated control each, in file order.
//!
//! ```yaml
//! name: sample
//! title: Sample Section
//! controls:
//!   - id: ec2-1
//!     title: Instance exists
//!     describe:
//!       - resource: ec2_instance
//!         id: i-01a2349e94458a507
//!         should: exist
//! describe:
//!   - resource: ec2_instance
//!     filter: { name: my-instance }
//!     should: exist
//! ```

use crate::control::{Assertion, Control};
use crate::matcher::MatcherSpec;
use crate::resource::{Filter, ResourceReference};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// A loaded profile: metadata plus controls in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub title: Option<String>,
    pub controls: Vec<Control>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    controls: Vec<ControlDef>,
    #[serde(default)]
    describe: Vec<DescribeDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlDef {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    impact: Option<f64>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    describe: Vec<DescribeDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescribeDef {
    resource: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    filter: Filter,
    #[serde(default)]
    should: Option<String>,
    #[serde(default)]
    should_not: Option<String>,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default)]
    expected: Option<Value>,
}

impl DescribeDef {
    fn into_assertion(self) -> Result<Assertion> {
        let mut matcher = match (self.should, self.should_not) {
            (Some(name), None) => MatcherSpec::new(name),
            (None, Some(name)) => MatcherSpec::new(name).negate(),
            (Some(_), Some(_)) => bail!("'{}': use either should or should_not", self.resource),
            (None, None) => bail!("'{}': missing should/should_not", self.resource),
        };
        matcher.attribute = self.attribute;
        matcher.expected = self.expected;

        let reference = ResourceReference {
            identifier: self.id.filter(|id| !id.trim().is_empty()),
            filter: self.filter,
        };

        Ok(Assertion::new(self.resource, reference, matcher))
    }
}

impl Profile {
    /// Load a profile file; the file stem names the profile unless `name` is set
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        let default_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "profile".to_string());

        Self::from_yaml_str(&content, &default_name)
            .with_context(|| format!("Invalid profile {}", path.display()))
    }

    pub fn from_yaml_str(content: &str, default_name: &str) -> Result<Self> {
        let file: ProfileFile =
            serde_yaml::from_str(content).context("Failed to parse profile YAML")?;
        let name = file.name.unwrap_or_else(|| default_name.to_string());

        let mut controls = Vec::with_capacity(file.controls.len() + file.describe.len());

        for def in file.controls {
            if def.title.trim().is_empty() {
                bail!("control titles must not be empty");
            }
            if let Some(impact) = def.impact {
                if !(0.0..=1.0).contains(&impact) {
                    bail!("control '{}': impact must be within 0.0..=1.0", def.title);
                }
            }

            let mut builder = Control::builder(def.title.clone());
            if let Some(id) = def.id {
                builder = builder.id(id);
            }
            if let Some(impact) = def.impact {
                builder = builder.impact(impact);
            }
            if let Some(desc) = def.desc {
                builder = builder.description(desc);
            }

            let mut control = builder.build();
            for describe in def.describe {
                control.assertions.push(
                    describe
                        .into_assertion()
                        .with_context(|| format!("control '{}'", def.title))?,
                );
            }
            controls.push(control);
        }

        for (n, describe) in file.describe.into_iter().enumerate() {
            let title = format!("(generated from {} #{})", name, n + 1);
            let assertion = describe
                .into_assertion()
                .with_context(|| title.clone())?;
            let mut control = Control::builder(title).build();
            control.assertions.push(assertion);
            controls.push(control);
        }

        tracing::debug!("Loaded profile {} with {} controls", name, controls.len());

        Ok(Self {
            name,
            title: file.title,
            controls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
title: Sample Section
controls:
  - id: ec2-1
    title: Instance by id
    impact: 0.7
    describe:
      - resource: ec2_instance
        id: i-01a2349e94458a507
        should: exist
      - resource: ec2_instance
        id: i-01a2349e94458a507
        attribute: state
        should: eq
        expected: running
describe:
  - resource: ec2_instance
    filter: { name: my-instance }
    should: exist
  - resource: ec2_instance
    filter: { name: retired }
    should_not: exist
"#;

    #[test]
    fn test_load_sample() {
        let profile = Profile::from_yaml_str(SAMPLE, "sample").unwrap();
        assert_eq!(profile.name, "sample");
        assert_eq!(profile.title.as_deref(), Some("Sample Section"));
        assert_eq!(profile.controls.len(), 3);

        let first = &profile.controls[0];
        assert_eq!(first.id.as_deref(), Some("ec2-1"));
        assert_eq!(first.impact, Some(0.7));
        assert_eq!(first.assertions.len(), 2);
        assert_eq!(
            first.assertions[1].matcher,
            MatcherSpec::new("eq").attribute("state").expected("running")
        );

        let generated = &profile.controls[1];
        assert_eq!(generated.title, "(generated from sample #1)");
        assert_eq!(
            generated.assertions[0].reference,
            ResourceReference::filter([("name", json!("my-instance"))])
        );
        assert!(profile.controls[2].assertions[0].matcher.negated);
    }

    #[test]
    fn test_name_from_file_overrides_default() {
        let profile = Profile::from_yaml_str("name: aws-baseline\n", "fallback").unwrap();
        assert_eq!(profile.name, "aws-baseline");
        assert!(profile.controls.is_empty());
    }

    #[test]
    fn test_rejects_ambiguous_polarity() {
        let src = r#"
describe:
  - resource: ec2_instance
    id: i-1
    should: exist
    should_not: exist
"#;
        assert!(Profile::from_yaml_str(src, "p").is_err());
    }

    #[test]
    fn test_rejects_missing_matcher_and_bad_impact() {
        let src = "describe:\n  - resource: ec2_instance\n    id: i-1\n";
        assert!(Profile::from_yaml_str(src, "p").is_err());

        let src = "controls:\n  - title: t\n    impact: 3\n";
        assert!(Profile::from_yaml_str(src, "p").is_err());

        let src = "controls:\n  - title: '  '\n";
        assert!(Profile::from_yaml_str(src, "p").is_err());
    }

    #[test]
    fn test_blank_id_is_no_identifier() {
        let src = "describe:\n  - resource: ec2_instance\n    id: ''\n    should: exist\n";
        let profile = Profile::from_yaml_str(src, "p").unwrap();
        assert_eq!(
            profile.controls[0].assertions[0].reference,
            ResourceReference::empty()
        );
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let src = "controls:\n  - title: t\n    decsribe: []\n";
        assert!(Profile::from_yaml_str(src, "p").is_err());
    }
}
