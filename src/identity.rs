//! Identity and access composition.
//!
//! Permissions are topology-minimal. The standalone host gets one runtime
//! identity carrying the instance self-management permissions (describe,
//! start, stop, modify) plus encrypted-parameter reads; it never receives
//! container-registry permissions. The scheduled service splits identity in
//! two: an execution identity governing how the platform pulls and runs the
//! workload, and a runtime identity for what the running workload itself may
//! call. The runtime identity must include image-pull and key-pair-descriptor
//! permissions because the container resolves the externally issued
//! credential at boot.
//! Key-pair-descriptor permissions go only to identities that perform that
//! boot-time resolution.

use serde::Serialize;
use serde_json::json;

use crate::config::StackContext;
use crate::template::{Resource, ResourceRef, StackTemplate, TemplateError};
use crate::topology::DeploymentTopology;

/// Provider resource kind for identities.
pub const ROLE_KIND: &str = "AWS::IAM::Role";

/// Provider resource kind for the instance profile binding a role to a
/// virtual machine.
pub const INSTANCE_PROFILE_KIND: &str = "AWS::IAM::InstanceProfile";

/// Managed bundle for the platform's instance management agent.
pub const SSM_CORE_POLICY: &str = "AmazonSSMManagedInstanceCore";

/// Managed bundle for the telemetry agent.
pub const TELEMETRY_POLICY: &str = "CloudWatchAgentServerPolicy";

/// Managed bundle for pulling and running scheduled tasks.
pub const TASK_EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";

/// One inline permission statement. Only `Allow` statements exist in this
/// composition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PolicyStatement {
    /// Permitted actions.
    pub actions: Vec<String>,
    /// Resource scope of the statement.
    pub resources: Vec<String>,
}

impl PolicyStatement {
    /// Creates an allow statement over all resources.
    #[must_use]
    pub fn allow(actions: &[&str]) -> Self {
        Self {
            actions: actions.iter().map(|action| (*action).to_owned()).collect(),
            resources: vec![String::from("*")],
        }
    }
}

/// A least-privilege identity attached to a compute execution context.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct IdentityProfile {
    /// Platform service allowed to assume the identity.
    pub service_principal: String,
    /// Managed permission bundles.
    pub managed_policies: Vec<String>,
    /// Inline permission statements.
    pub statements: Vec<PolicyStatement>,
}

impl IdentityProfile {
    /// All inline actions of the profile, flattened in declaration order.
    #[must_use]
    pub fn inline_actions(&self) -> Vec<&str> {
        self.statements
            .iter()
            .flat_map(|statement| statement.actions.iter().map(String::as_str))
            .collect()
    }
}

/// The runtime identity: what the running workload itself may call.
#[must_use]
pub fn runtime_profile(context: &StackContext) -> IdentityProfile {
    let mut managed = Vec::new();
    match context.topology {
        DeploymentTopology::StandaloneHost => {
            managed.push(String::from(SSM_CORE_POLICY));
            if context.options.telemetry_agent {
                managed.push(String::from(TELEMETRY_POLICY));
            }
            IdentityProfile {
                service_principal: String::from("ec2.amazonaws.com"),
                managed_policies: managed,
                statements: vec![PolicyStatement::allow(&[
                    "ec2:DescribeInstances",
                    "ec2:StartInstances",
                    "ec2:StopInstances",
                    "ec2:ModifyInstanceAttribute",
                    "ssm:GetParameters",
                    "ssm:GetParameter",
                    "kms:Decrypt",
                ])],
            }
        }
        DeploymentTopology::ScheduledService => {
            if context.options.telemetry_agent {
                managed.push(String::from(TELEMETRY_POLICY));
            }
            IdentityProfile {
                service_principal: String::from("ecs-tasks.amazonaws.com"),
                managed_policies: managed,
                statements: vec![PolicyStatement::allow(&[
                    "ssm:GetParameters",
                    "ssm:GetParameter",
                    "kms:Decrypt",
                    "ecr:GetAuthorizationToken",
                    "ecr:BatchCheckLayerAvailability",
                    "ecr:GetDownloadUrlForLayer",
                    "ecr:BatchGetImage",
                    "ec2:DescribeKeyPairs",
                    "ec2:GetKeyPair",
                ])],
            }
        }
    }
}

/// The execution identity: how the platform pulls and runs the workload.
/// Only the scheduled service has one.
#[must_use]
pub fn execution_profile(context: &StackContext) -> Option<IdentityProfile> {
    context
        .topology
        .is_scheduled()
        .then(|| scheduled_execution_profile(context))
}

fn scheduled_execution_profile(context: &StackContext) -> IdentityProfile {
    let mut managed = vec![String::from(TASK_EXECUTION_POLICY)];
    if context.options.telemetry_agent {
        managed.push(String::from(TELEMETRY_POLICY));
    }
    IdentityProfile {
        service_principal: String::from("ecs-tasks.amazonaws.com"),
        managed_policies: managed,
        statements: vec![PolicyStatement::allow(&[
            "ssm:GetParameters",
            "ssm:GetParameter",
            "kms:Decrypt",
        ])],
    }
}

/// Declared identity resources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IdentityResources {
    /// Role the running workload assumes.
    pub runtime_role: ResourceRef,
    /// Role the platform assumes to launch the workload (scheduled service
    /// only).
    pub execution_role: Option<ResourceRef>,
    /// Instance profile binding the runtime role to a virtual machine
    /// (standalone host only).
    pub instance_profile: Option<ResourceRef>,
}

fn role_properties(profile: &IdentityProfile) -> serde_json::Value {
    let statements: Vec<serde_json::Value> = profile
        .statements
        .iter()
        .map(|statement| {
            json!({
                "Effect": "Allow",
                "Action": statement.actions,
                "Resource": statement.resources,
            })
        })
        .collect();
    json!({
        "AssumeRolePolicyDocument": {
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": profile.service_principal },
                "Action": "sts:AssumeRole",
            }],
        },
        "ManagedPolicyArns": profile.managed_policies,
        "Policies": [{
            "PolicyName": "task-permissions",
            "PolicyDocument": { "Statement": statements },
        }],
    })
}

/// Declares the identity resources for the context's topology.
///
/// # Errors
///
/// Returns [`TemplateError`] when a declaration conflicts with an existing
/// resource.
pub fn compose(
    context: &StackContext,
    template: &mut StackTemplate,
) -> Result<IdentityResources, TemplateError> {
    match context.topology {
        DeploymentTopology::StandaloneHost => {
            let runtime_role = template.declare(Resource::new(
                "DevInstanceRole",
                ROLE_KIND,
                role_properties(&runtime_profile(context)),
            ))?;
            let instance_profile = template.declare(
                Resource::new(
                    "DevInstanceProfile",
                    INSTANCE_PROFILE_KIND,
                    json!({ "Roles": [runtime_role.id_token()] }),
                )
                .depends_on(&runtime_role),
            )?;
            Ok(IdentityResources {
                runtime_role,
                execution_role: None,
                instance_profile: Some(instance_profile),
            })
        }
        DeploymentTopology::ScheduledService => {
            let execution_role = template.declare(Resource::new(
                "TaskExecutionRole",
                ROLE_KIND,
                role_properties(&scheduled_execution_profile(context)),
            ))?;
            let runtime_role = template.declare(Resource::new(
                "TaskRole",
                ROLE_KIND,
                role_properties(&runtime_profile(context)),
            ))?;
            Ok(IdentityResources {
                runtime_role,
                execution_role: Some(execution_role),
                instance_profile: None,
            })
        }
    }
}
