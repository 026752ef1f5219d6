//! Shared fixtures for synthesis BDD scenarios.

use devstack::{StackConfig, StackTemplate};
use rstest::fixture;

use crate::test_constants::{REGION, STACK_NAME};

/// Flattened view of a synthesised template, extracted up front so the
/// scenario state stays plain strings and counters.
#[derive(Clone, Debug)]
pub struct TemplateSummary {
    /// Provider kind of every declared resource, in declaration order.
    pub kinds: Vec<String>,
    /// Names of the recorded outputs, in declaration order.
    pub output_names: Vec<String>,
    /// Number of declared resources.
    pub resource_count: usize,
    /// Rendered properties of the scheduled runtime role, when declared.
    pub task_role_properties: Option<String>,
}

impl TemplateSummary {
    pub fn from_template(template: &StackTemplate) -> Self {
        Self {
            kinds: template
                .resources()
                .iter()
                .map(|resource| resource.kind.clone())
                .collect(),
            output_names: template
                .outputs()
                .iter()
                .map(|output| output.name.clone())
                .collect(),
            resource_count: template.resources().len(),
            task_role_properties: template
                .resource("TaskRole")
                .map(|role| role.properties.to_string()),
        }
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.kinds.iter().any(|declared| declared == kind)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.output_names.iter().any(|declared| declared == name)
    }
}

/// Result of running the synthesis step.
#[derive(Clone, Debug)]
pub enum SynthOutcome {
    /// Synthesis produced a template.
    Synthesised(TemplateSummary),
    /// The configuration was rejected before any resource was declared.
    ConfigError(String),
    /// Synthesis started but failed.
    SynthError(String),
}

/// Mutable scenario state threaded through the steps.
#[derive(Clone, Debug)]
pub struct SynthContext {
    pub config: StackConfig,
    pub outcome: Option<SynthOutcome>,
}

impl SynthContext {
    /// The synthesised template summary, if the run got that far.
    pub fn summary(&self) -> Option<&TemplateSummary> {
        match self.outcome.as_ref() {
            Some(SynthOutcome::Synthesised(summary)) => Some(summary),
            _ => None,
        }
    }
}

#[fixture]
pub fn synth_context() -> SynthContext {
    SynthContext {
        config: StackConfig {
            stack_name: String::from(STACK_NAME),
            region: String::from(REGION),
            topology: String::from("standalone-host"),
            encrypt_root_volume: true,
            telemetry_agent: true,
            management_https: false,
        },
        outcome: None,
    }
}
