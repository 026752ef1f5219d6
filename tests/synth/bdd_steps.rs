//! BDD step definitions for stack synthesis.

use devstack::compute::{INSTANCE_KIND, LOAD_BALANCER_KIND};
use devstack::network::NAT_GATEWAY_KIND;
use devstack::synthesize;
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{SynthContext, SynthOutcome, TemplateSummary};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a provisioning run configured for \"{token}\"")]
fn configured_run(mut synth_context: SynthContext, token: String) -> SynthContext {
    synth_context.config.topology = token;
    synth_context
}

#[when("I synthesise the stack")]
fn synthesise(synth_context: SynthContext) -> SynthContext {
    let SynthContext { config, .. } = synth_context;
    let outcome = match config.context() {
        Ok(context) => match synthesize(&context) {
            Ok(template) => SynthOutcome::Synthesised(TemplateSummary::from_template(&template)),
            Err(err) => SynthOutcome::SynthError(err.to_string()),
        },
        Err(err) => SynthOutcome::ConfigError(err.to_string()),
    };
    SynthContext {
        config,
        outcome: Some(outcome),
    }
}

#[then("synthesis succeeds")]
fn synthesis_succeeds(synth_context: &SynthContext) -> Result<(), StepError> {
    match synth_context.outcome.as_ref() {
        Some(SynthOutcome::Synthesised(_)) => Ok(()),
        Some(SynthOutcome::ConfigError(message) | SynthOutcome::SynthError(message)) => Err(
            StepError::Assertion(format!("expected success, got failure: {message}")),
        ),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("synthesis fails before any resource is declared")]
fn synthesis_rejected(synth_context: &SynthContext) -> Result<(), StepError> {
    match synth_context.outcome.as_ref() {
        Some(SynthOutcome::ConfigError(_)) => Ok(()),
        Some(SynthOutcome::Synthesised(summary)) => Err(StepError::Assertion(format!(
            "expected a configuration error, got a template with {} resources",
            summary.resource_count
        ))),
        Some(SynthOutcome::SynthError(message)) => Err(StepError::Assertion(format!(
            "synthesis ran and failed late: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

fn assert_kind(
    synth_context: &SynthContext,
    kind: &str,
    expected: bool,
) -> Result<(), StepError> {
    let summary = synth_context
        .summary()
        .ok_or_else(|| StepError::Assertion(String::from("no template was synthesised")))?;
    if summary.has_kind(kind) == expected {
        Ok(())
    } else if expected {
        Err(StepError::Assertion(format!("expected a {kind} resource")))
    } else {
        Err(StepError::Assertion(format!("unexpected {kind} resource")))
    }
}

#[then("the template declares an instance")]
fn declares_instance(synth_context: &SynthContext) -> Result<(), StepError> {
    assert_kind(synth_context, INSTANCE_KIND, true)
}

#[then("the template declares no instance")]
fn declares_no_instance(synth_context: &SynthContext) -> Result<(), StepError> {
    assert_kind(synth_context, INSTANCE_KIND, false)
}

#[then("the template declares a NAT gateway")]
fn declares_nat(synth_context: &SynthContext) -> Result<(), StepError> {
    assert_kind(synth_context, NAT_GATEWAY_KIND, true)
}

#[then("the template declares no NAT gateway")]
fn declares_no_nat(synth_context: &SynthContext) -> Result<(), StepError> {
    assert_kind(synth_context, NAT_GATEWAY_KIND, false)
}

#[then("the template declares a load balancer")]
fn declares_load_balancer(synth_context: &SynthContext) -> Result<(), StepError> {
    assert_kind(synth_context, LOAD_BALANCER_KIND, true)
}

#[then("the template declares no load balancer")]
fn declares_no_load_balancer(synth_context: &SynthContext) -> Result<(), StepError> {
    assert_kind(synth_context, LOAD_BALANCER_KIND, false)
}

#[then("the outputs include \"{name}\"")]
fn outputs_include(synth_context: &SynthContext, name: String) -> Result<(), StepError> {
    let summary = synth_context
        .summary()
        .ok_or_else(|| StepError::Assertion(String::from("no template was synthesised")))?;
    if summary.has_output(&name) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("missing output {name}")))
    }
}

#[then("the outputs omit \"{name}\"")]
fn outputs_omit(synth_context: &SynthContext, name: String) -> Result<(), StepError> {
    let summary = synth_context
        .summary()
        .ok_or_else(|| StepError::Assertion(String::from("no template was synthesised")))?;
    if summary.has_output(&name) {
        Err(StepError::Assertion(format!("unexpected output {name}")))
    } else {
        Ok(())
    }
}

#[then("the runtime identity can pull container images")]
fn runtime_identity_pulls_images(synth_context: &SynthContext) -> Result<(), StepError> {
    let summary = synth_context
        .summary()
        .ok_or_else(|| StepError::Assertion(String::from("no template was synthesised")))?;
    let rendered = summary
        .task_role_properties
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing TaskRole")))?;
    if rendered.contains("ecr:GetAuthorizationToken") {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "TaskRole lacks ecr:GetAuthorizationToken",
        )))
    }
}
