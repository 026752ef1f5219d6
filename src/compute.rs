//! Compute and exposure composition.
//!
//! The standalone host is one instance on a public subnet behind a security
//! group that admits SSH from anywhere, with the key pair attached by the
//! provider and the bootstrap payload delivered as first-boot user data.
//!
//! The scheduled service is a cluster task in a private subnet with no
//! public address; the bootstrap payload is its container entrypoint, and
//! the only ingress is the exposure layer: an internet-facing network load
//! balancer with an SSH listener and a TCP health-checked target group.
//! That mediation, not the compute resource kind, is the structural
//! difference between the topologies.

use serde_json::json;
use thiserror::Error;

use crate::bootstrap::BootstrapProcedure;
use crate::config::StackContext;
use crate::identity::IdentityResources;
use crate::keypair::KeyPairResources;
use crate::network::{LOG_GROUP_KIND, NetworkResources};
use crate::template::{Resource, ResourceRef, StackTemplate, TemplateError};
use crate::topology::DeploymentTopology;

/// TCP port the environment is reached on.
pub const SSH_PORT: u16 = 22;

/// Provider resource kind for virtual machines.
pub const INSTANCE_KIND: &str = "AWS::EC2::Instance";

/// Provider resource kind for security groups.
pub const SECURITY_GROUP_KIND: &str = "AWS::EC2::SecurityGroup";

/// Provider resource kind for the managed cluster.
pub const CLUSTER_KIND: &str = "AWS::ECS::Cluster";

/// Provider resource kind for task definitions.
pub const TASK_DEFINITION_KIND: &str = "AWS::ECS::TaskDefinition";

/// Provider resource kind for the scheduled service.
pub const SERVICE_KIND: &str = "AWS::ECS::Service";

/// Provider resource kind for load balancers.
pub const LOAD_BALANCER_KIND: &str = "AWS::ElasticLoadBalancingV2::LoadBalancer";

/// Provider resource kind for listeners.
pub const LISTENER_KIND: &str = "AWS::ElasticLoadBalancingV2::Listener";

/// Provider resource kind for target groups.
pub const TARGET_GROUP_KIND: &str = "AWS::ElasticLoadBalancingV2::TargetGroup";

/// Instance size for the standalone host.
const INSTANCE_TYPE: &str = "t3.medium";

/// Host image, resolved to the latest Amazon Linux 2023 AMI through the
/// public parameter alias.
const HOST_IMAGE: &str =
    "{{resolve:ssm:/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-x86_64}}";

/// Container base image; ships no sshd and no credential, both supplied by
/// the bootstrap procedure.
const CONTAINER_IMAGE: &str = "public.ecr.aws/amazonlinux/amazonlinux:2";

/// Task sizing.
const TASK_CPU: &str = "1024";
const TASK_MEMORY: &str = "2048";

/// Declared compute and exposure resources.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComputeResources {
    /// Security group guarding the workload.
    pub security_group: Option<ResourceRef>,
    /// The standalone instance.
    pub instance: Option<ResourceRef>,
    /// The managed cluster (scheduled service only).
    pub cluster: Option<ResourceRef>,
    /// The task definition (scheduled service only).
    pub task_definition: Option<ResourceRef>,
    /// The scheduled service (scheduled service only).
    pub service: Option<ResourceRef>,
    /// The internet-facing load balancer (scheduled service only).
    pub load_balancer: Option<ResourceRef>,
    /// The SSH listener (scheduled service only).
    pub listener: Option<ResourceRef>,
    /// The health-checked target group (scheduled service only).
    pub target_group: Option<ResourceRef>,
}

/// Errors raised while composing compute resources.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ComputeError {
    /// Raised when a resource declaration fails.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Raised when the identity composition lacks the instance profile the
    /// standalone host binds to.
    #[error("standalone host requires an instance profile")]
    MissingInstanceProfile,
    /// Raised when the identity composition lacks the execution role the
    /// scheduled service launches with.
    #[error("scheduled service requires an execution role")]
    MissingExecutionRole,
    /// Raised when the network composition lacks a public subnet.
    #[error("no public subnet available for placement")]
    MissingPublicSubnet,
    /// Raised when the network composition lacks the private tier the
    /// scheduled service is placed in.
    #[error("no private subnet available for placement")]
    MissingPrivateSubnet,
}

fn ssh_ingress(context: &StackContext) -> Vec<serde_json::Value> {
    let mut rules = vec![json!({
        "IpProtocol": "tcp",
        "FromPort": SSH_PORT,
        "ToPort": SSH_PORT,
        "CidrIp": "0.0.0.0/0",
        "Description": "Allow SSH traffic",
    })];
    if context.options.management_https && !context.topology.is_scheduled() {
        rules.push(json!({
            "IpProtocol": "tcp",
            "FromPort": 443,
            "ToPort": 443,
            "CidrIp": "0.0.0.0/0",
            "Description": "Allow management-plane HTTPS",
        }));
    }
    rules
}

/// Declares the compute resource and, for the scheduled service, the
/// exposure layer.
///
/// # Errors
///
/// Returns [`ComputeError`] when a collaborator resource is missing or a
/// declaration fails.
pub fn compose(
    context: &StackContext,
    template: &mut StackTemplate,
    network: &NetworkResources,
    identity: &IdentityResources,
    key_pair: &KeyPairResources,
    bootstrap: &BootstrapProcedure,
) -> Result<ComputeResources, ComputeError> {
    match context.topology {
        DeploymentTopology::StandaloneHost => {
            compose_standalone(context, template, network, identity, key_pair, bootstrap)
        }
        DeploymentTopology::ScheduledService => {
            compose_scheduled(context, template, network, identity, key_pair, bootstrap)
        }
    }
}

fn compose_standalone(
    context: &StackContext,
    template: &mut StackTemplate,
    network: &NetworkResources,
    identity: &IdentityResources,
    key_pair: &KeyPairResources,
    bootstrap: &BootstrapProcedure,
) -> Result<ComputeResources, ComputeError> {
    let instance_profile = identity
        .instance_profile
        .as_ref()
        .ok_or(ComputeError::MissingInstanceProfile)?;
    let subnet = network
        .public_subnets
        .first()
        .ok_or(ComputeError::MissingPublicSubnet)?;

    let security_group = template.declare(
        Resource::new(
            "DevInstanceSecurityGroup",
            SECURITY_GROUP_KIND,
            json!({
                "GroupDescription": "Security group for development instance",
                "VpcId": network.vpc.id_token(),
                "SecurityGroupIngress": ssh_ingress(context),
            }),
        )
        .depends_on(&network.vpc),
    )?;

    let mut properties = json!({
        "InstanceType": INSTANCE_TYPE,
        "ImageId": HOST_IMAGE,
        "KeyName": key_pair.key_name,
        "IamInstanceProfile": instance_profile.id_token(),
        "SubnetId": subnet.id_token(),
        "SecurityGroupIds": [security_group.id_token()],
        "UserData": bootstrap.render(),
    });
    if context.options.encrypt_root_volume
        && let Some(map) = properties.as_object_mut()
    {
        map.insert(
            String::from("BlockDeviceMappings"),
            json!([{
                "DeviceName": "/dev/xvda",
                "Ebs": { "Encrypted": true, "VolumeType": "gp3" },
            }]),
        );
    }

    let instance = template.declare(
        Resource::new("DevInstance", INSTANCE_KIND, properties)
            .depends_on(subnet)
            .depends_on(&security_group)
            .depends_on(instance_profile)
            .depends_on(&key_pair.key_pair)
            .depends_on(&network.gateway_attachment),
    )?;

    Ok(ComputeResources {
        security_group: Some(security_group),
        instance: Some(instance),
        ..ComputeResources::default()
    })
}

fn compose_scheduled(
    context: &StackContext,
    template: &mut StackTemplate,
    network: &NetworkResources,
    identity: &IdentityResources,
    key_pair: &KeyPairResources,
    bootstrap: &BootstrapProcedure,
) -> Result<ComputeResources, ComputeError> {
    let execution_role = identity
        .execution_role
        .as_ref()
        .ok_or(ComputeError::MissingExecutionRole)?;
    if network.private_subnets.is_empty() {
        return Err(ComputeError::MissingPrivateSubnet);
    }

    let security_group = template.declare(
        Resource::new(
            "TaskSecurityGroup",
            SECURITY_GROUP_KIND,
            json!({
                "GroupDescription": "Security group for scheduled development tasks",
                "VpcId": network.vpc.id_token(),
                "SecurityGroupIngress": ssh_ingress(context),
            }),
        )
        .depends_on(&network.vpc),
    )?;

    let cluster = template.declare(Resource::new(
        "DevContainerCluster",
        CLUSTER_KIND,
        json!({
            "ClusterSettings": [{ "Name": "containerInsights", "Value": "enabled" }],
        }),
    ))?;

    let log_group = template.declare(Resource::new(
        "ContainerLogGroup",
        LOG_GROUP_KIND,
        json!({ "RetentionInDays": 30 }),
    ))?;

    let task_definition = template.declare(
        Resource::new(
            "TaskDefinition",
            TASK_DEFINITION_KIND,
            json!({
                "RequiresCompatibilities": ["FARGATE"],
                "NetworkMode": "awsvpc",
                "Cpu": TASK_CPU,
                "Memory": TASK_MEMORY,
                "ExecutionRoleArn": execution_role.attr("Arn"),
                "TaskRoleArn": identity.runtime_role.attr("Arn"),
                "ContainerDefinitions": [{
                    "Name": "dev-container",
                    "Image": CONTAINER_IMAGE,
                    "Essential": true,
                    "PortMappings": [{ "ContainerPort": SSH_PORT }],
                    "Environment": [
                        { "Name": "AWS_DEFAULT_REGION", "Value": context.region },
                        { "Name": "KEY_NAME", "Value": key_pair.key_name },
                    ],
                    "Command": bootstrap.container_command(),
                    "LogConfiguration": {
                        "LogDriver": "awslogs",
                        "Options": {
                            "awslogs-group": log_group.id_token(),
                            "awslogs-region": context.region,
                            "awslogs-stream-prefix": "dev-container",
                        },
                    },
                }],
            }),
        )
        .depends_on(execution_role)
        .depends_on(&identity.runtime_role)
        .depends_on(&log_group)
        .depends_on(&key_pair.key_pair),
    )?;

    let subnet_tokens: Vec<String> = network
        .public_subnets
        .iter()
        .map(ResourceRef::id_token)
        .collect();
    let mut load_balancer_resource = Resource::new(
        "ServiceLoadBalancer",
        LOAD_BALANCER_KIND,
        json!({
            "Type": "network",
            "Scheme": "internet-facing",
            "Subnets": subnet_tokens,
            "LoadBalancerAttributes": [
                { "Key": "load_balancing.cross_zone.enabled", "Value": "true" },
            ],
        }),
    )
    .depends_on(&network.gateway_attachment);
    for subnet in &network.public_subnets {
        load_balancer_resource = load_balancer_resource.depends_on(subnet);
    }
    let load_balancer = template.declare(load_balancer_resource)?;

    let target_group = template.declare(
        Resource::new(
            "SshTargetGroup",
            TARGET_GROUP_KIND,
            json!({
                "Port": SSH_PORT,
                "Protocol": "TCP",
                "TargetType": "ip",
                "VpcId": network.vpc.id_token(),
                "HealthCheckEnabled": true,
                "HealthCheckPort": SSH_PORT.to_string(),
                "HealthCheckProtocol": "TCP",
            }),
        )
        .depends_on(&network.vpc),
    )?;

    let listener = template.declare(
        Resource::new(
            "SshListener",
            LISTENER_KIND,
            json!({
                "LoadBalancerArn": load_balancer.id_token(),
                "Port": SSH_PORT,
                "Protocol": "TCP",
                "DefaultActions": [{ "Type": "forward", "TargetGroupArn": target_group.id_token() }],
            }),
        )
        .depends_on(&load_balancer)
        .depends_on(&target_group),
    )?;

    let private_tokens: Vec<String> = network
        .private_subnets
        .iter()
        .map(ResourceRef::id_token)
        .collect();
    let mut service_resource = Resource::new(
        "DevContainerService",
        SERVICE_KIND,
        json!({
            "Cluster": cluster.id_token(),
            "TaskDefinition": task_definition.id_token(),
            "DesiredCount": 1,
            "LaunchType": "FARGATE",
            "NetworkConfiguration": {
                "AwsvpcConfiguration": {
                    // The workload never receives a public address; the
                    // exposure layer is the only ingress.
                    "AssignPublicIp": "DISABLED",
                    "Subnets": private_tokens,
                    "SecurityGroups": [security_group.id_token()],
                },
            },
            "LoadBalancers": [{
                "TargetGroupArn": target_group.id_token(),
                "ContainerName": "dev-container",
                "ContainerPort": SSH_PORT,
            }],
        }),
    )
    .depends_on(&cluster)
    .depends_on(&task_definition)
    .depends_on(&security_group)
    .depends_on(&listener);
    for subnet in &network.private_subnets {
        service_resource = service_resource.depends_on(subnet);
    }
    let service = template.declare(service_resource)?;

    Ok(ComputeResources {
        security_group: Some(security_group),
        instance: None,
        cluster: Some(cluster),
        task_definition: Some(task_definition),
        service: Some(service),
        load_balancer: Some(load_balancer),
        listener: Some(listener),
        target_group: Some(target_group),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackOptions;
    use crate::{identity, keypair, network as network_mod};

    fn context(topology: DeploymentTopology, options: StackOptions) -> StackContext {
        StackContext::new(
            String::from("sandbox"),
            String::from("us-east-1"),
            topology,
            options,
        )
    }

    fn composed(
        topology: DeploymentTopology,
        options: StackOptions,
    ) -> (StackTemplate, ComputeResources) {
        let ctx = context(topology, options);
        let mut template = StackTemplate::new();
        let network = network_mod::compose(&ctx, &mut template).expect("network");
        let ids = identity::compose(&ctx, &mut template).expect("identity");
        let key = keypair::provision(&ctx, &mut template).expect("key pair");
        let bootstrap = BootstrapProcedure::for_context(&ctx);
        let compute = compose(&ctx, &mut template, &network, &ids, &key, &bootstrap)
            .expect("compute composition should succeed");
        (template, compute)
    }

    #[test]
    fn standalone_declares_a_directly_reachable_instance() {
        let (template, compute) =
            composed(DeploymentTopology::StandaloneHost, StackOptions::default());

        assert!(compute.instance.is_some());
        assert!(compute.load_balancer.is_none());
        assert!(!template.has_kind(LOAD_BALANCER_KIND));
        assert!(!template.has_kind(CLUSTER_KIND));

        let instance = template.resource("DevInstance").expect("instance");
        let user_data = instance
            .properties
            .pointer("/UserData")
            .and_then(serde_json::Value::as_str)
            .expect("user data");
        assert!(user_data.starts_with("#!/bin/bash"));
        assert!(
            instance.properties.pointer("/BlockDeviceMappings").is_some(),
            "root volume encryption is on by default"
        );
    }

    #[test]
    fn standalone_https_ingress_is_opt_in() {
        let (template, _compute) =
            composed(DeploymentTopology::StandaloneHost, StackOptions::default());
        let group = template
            .resource("DevInstanceSecurityGroup")
            .expect("security group");
        let rules = group
            .properties
            .pointer("/SecurityGroupIngress")
            .and_then(serde_json::Value::as_array)
            .expect("ingress rules");
        assert_eq!(rules.len(), 1);

        let mut options = StackOptions::default();
        options.management_https = true;
        let (hardened, _compute) = composed(DeploymentTopology::StandaloneHost, options);
        let hardened_rules = hardened
            .resource("DevInstanceSecurityGroup")
            .and_then(|group_res| group_res.properties.pointer("/SecurityGroupIngress"))
            .and_then(serde_json::Value::as_array)
            .expect("ingress rules");
        assert_eq!(hardened_rules.len(), 2);
    }

    #[test]
    fn scheduled_workload_never_gets_a_public_address() {
        let (template, compute) =
            composed(DeploymentTopology::ScheduledService, StackOptions::default());

        assert!(compute.instance.is_none());
        assert!(compute.load_balancer.is_some());

        let service = template.resource("DevContainerService").expect("service");
        let assign = service
            .properties
            .pointer("/NetworkConfiguration/AwsvpcConfiguration/AssignPublicIp")
            .and_then(serde_json::Value::as_str)
            .expect("assign public ip");
        assert_eq!(assign, "DISABLED");
    }

    #[test]
    fn scheduled_container_runs_the_bootstrap_payload() {
        let (template, _compute) =
            composed(DeploymentTopology::ScheduledService, StackOptions::default());
        let task = template.resource("TaskDefinition").expect("task definition");
        let command = task
            .properties
            .pointer("/ContainerDefinitions/0/Command")
            .and_then(serde_json::Value::as_array)
            .expect("container command");
        let payload = command
            .last()
            .and_then(serde_json::Value::as_str)
            .expect("payload");
        assert!(payload.ends_with("/usr/sbin/sshd -D"));

        let environment = task
            .properties
            .pointer("/ContainerDefinitions/0/Environment")
            .and_then(serde_json::Value::as_array)
            .expect("environment");
        assert!(
            environment
                .iter()
                .any(|entry| entry.pointer("/Name").and_then(serde_json::Value::as_str)
                    == Some("KEY_NAME")),
            "credential resolution needs the key name"
        );
    }

    #[test]
    fn exposure_layer_health_checks_the_ssh_port() {
        let (template, _compute) =
            composed(DeploymentTopology::ScheduledService, StackOptions::default());
        let target_group = template.resource("SshTargetGroup").expect("target group");
        assert_eq!(
            target_group.properties.pointer("/HealthCheckProtocol"),
            Some(&serde_json::Value::String(String::from("TCP")))
        );
        let listener = template.resource("SshListener").expect("listener");
        assert_eq!(
            listener
                .properties
                .pointer("/Port")
                .and_then(serde_json::Value::as_u64),
            Some(u64::from(SSH_PORT))
        );
    }
}
