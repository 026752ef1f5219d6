//! Network provisioning.
//!
//! One virtual network spanning two availability zones. The public tier
//! always exists. The private-with-egress tier and its single NAT path exist
//! only for the scheduled service, whose workload must reach installer
//! endpoints without ever holding a public address. The standalone host
//! never pays for a NAT gateway it cannot use.
//!
//! Flow logging to a durable log group is enabled unconditionally;
//! auditability of network traffic is a baseline security requirement, not a
//! topology feature. Provider capacity and quota failures propagate
//! unmodified; this composer performs no retry.

use serde_json::json;

use crate::config::StackContext;
use crate::template::{Resource, ResourceRef, StackTemplate, TemplateError};

/// Number of availability zones the network spans.
pub const AVAILABILITY_ZONE_COUNT: usize = 2;

/// Provider resource kind for the virtual network.
pub const VPC_KIND: &str = "AWS::EC2::VPC";

/// Provider resource kind for subnets.
pub const SUBNET_KIND: &str = "AWS::EC2::Subnet";

/// Provider resource kind for the NAT egress resource.
pub const NAT_GATEWAY_KIND: &str = "AWS::EC2::NatGateway";

/// Provider resource kind for flow logs.
pub const FLOW_LOG_KIND: &str = "AWS::EC2::FlowLog";

/// Provider resource kind for log groups.
pub const LOG_GROUP_KIND: &str = "AWS::Logs::LogGroup";

/// Declared network resources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkResources {
    /// The virtual network.
    pub vpc: ResourceRef,
    /// Public subnets, one per availability zone.
    pub public_subnets: Vec<ResourceRef>,
    /// Private subnets (scheduled service only).
    pub private_subnets: Vec<ResourceRef>,
    /// The single NAT egress path (scheduled service only).
    pub nat_gateway: Option<ResourceRef>,
    /// Internet gateway attachment; public routing depends on it.
    pub gateway_attachment: ResourceRef,
    /// The unconditional VPC flow log.
    pub flow_log: ResourceRef,
}

/// Availability zone names for a region, in subnet declaration order.
#[must_use]
pub fn availability_zones(region: &str) -> Vec<String> {
    ["a", "b"]
        .iter()
        .take(AVAILABILITY_ZONE_COUNT)
        .map(|suffix| format!("{region}{suffix}"))
        .collect()
}

fn subnet_cidr(index: usize) -> String {
    format!("10.0.{index}.0/24")
}

/// Declares the virtual network for the context's topology.
///
/// # Errors
///
/// Returns [`TemplateError`] when a declaration conflicts with an existing
/// resource.
pub fn compose(
    context: &StackContext,
    template: &mut StackTemplate,
) -> Result<NetworkResources, TemplateError> {
    let vpc = template.declare(Resource::new(
        "DevVpc",
        VPC_KIND,
        json!({
            "CidrBlock": "10.0.0.0/16",
            "EnableDnsSupport": true,
            "EnableDnsHostnames": true,
        }),
    ))?;

    let gateway = template.declare(Resource::new(
        "InternetGateway",
        "AWS::EC2::InternetGateway",
        json!({}),
    ))?;
    let gateway_attachment = template.declare(
        Resource::new(
            "GatewayAttachment",
            "AWS::EC2::VPCGatewayAttachment",
            json!({
                "VpcId": vpc.id_token(),
                "InternetGatewayId": gateway.id_token(),
            }),
        )
        .depends_on(&vpc)
        .depends_on(&gateway),
    )?;

    let public_route_table = template.declare(
        Resource::new(
            "PublicRouteTable",
            "AWS::EC2::RouteTable",
            json!({ "VpcId": vpc.id_token() }),
        )
        .depends_on(&vpc),
    )?;
    template.declare(
        Resource::new(
            "PublicDefaultRoute",
            "AWS::EC2::Route",
            json!({
                "RouteTableId": public_route_table.id_token(),
                "DestinationCidrBlock": "0.0.0.0/0",
                "GatewayId": gateway.id_token(),
            }),
        )
        .depends_on(&public_route_table)
        .depends_on(&gateway_attachment),
    )?;

    let zones = availability_zones(&context.region);
    let public_subnets =
        declare_subnet_tier(template, &vpc, &public_route_table, &zones, "Public", 0, true)?;

    let mut private_subnets = Vec::new();
    let mut nat_gateway = None;
    if context.topology.is_scheduled() {
        let (nat, private) = compose_private_tier(
            template,
            &vpc,
            &gateway_attachment,
            &public_subnets,
            &zones,
        )?;
        nat_gateway = Some(nat);
        private_subnets = private;
    }

    let flow_log = compose_flow_log(template, &vpc)?;

    Ok(NetworkResources {
        vpc,
        public_subnets,
        private_subnets,
        nat_gateway,
        gateway_attachment,
        flow_log,
    })
}

fn declare_subnet_tier(
    template: &mut StackTemplate,
    vpc: &ResourceRef,
    route_table: &ResourceRef,
    zones: &[String],
    tier: &str,
    cidr_offset: usize,
    public: bool,
) -> Result<Vec<ResourceRef>, TemplateError> {
    let mut subnets = Vec::new();
    for (index, zone) in zones.iter().enumerate() {
        let ordinal = index + 1;
        let subnet = template.declare(
            Resource::new(
                format!("{tier}Subnet{ordinal}"),
                SUBNET_KIND,
                json!({
                    "VpcId": vpc.id_token(),
                    "AvailabilityZone": zone,
                    "CidrBlock": subnet_cidr(cidr_offset + index),
                    "MapPublicIpOnLaunch": public,
                }),
            )
            .depends_on(vpc),
        )?;
        template.declare(
            Resource::new(
                format!("{tier}Subnet{ordinal}RouteTableAssociation"),
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({
                    "SubnetId": subnet.id_token(),
                    "RouteTableId": route_table.id_token(),
                }),
            )
            .depends_on(&subnet)
            .depends_on(route_table),
        )?;
        subnets.push(subnet);
    }
    Ok(subnets)
}

fn compose_private_tier(
    template: &mut StackTemplate,
    vpc: &ResourceRef,
    gateway_attachment: &ResourceRef,
    public_subnets: &[ResourceRef],
    zones: &[String],
) -> Result<(ResourceRef, Vec<ResourceRef>), TemplateError> {
    // Exactly one NAT path serves both private subnets.
    let nat_subnet = public_subnets
        .first()
        .ok_or_else(|| TemplateError::UnknownDependency {
            logical_id: String::from("NatGateway"),
            dependency: String::from("PublicSubnet1"),
        })?;
    let nat_eip = template.declare(
        Resource::new(
            "NatEip",
            "AWS::EC2::EIP",
            json!({ "Domain": "vpc" }),
        )
        .depends_on(gateway_attachment),
    )?;
    let nat = template.declare(
        Resource::new(
            "NatGateway",
            NAT_GATEWAY_KIND,
            json!({
                "SubnetId": nat_subnet.id_token(),
                "AllocationId": nat_eip.attr("AllocationId"),
            }),
        )
        .depends_on(nat_subnet)
        .depends_on(&nat_eip),
    )?;

    let private_route_table = template.declare(
        Resource::new(
            "PrivateRouteTable",
            "AWS::EC2::RouteTable",
            json!({ "VpcId": vpc.id_token() }),
        )
        .depends_on(vpc),
    )?;
    template.declare(
        Resource::new(
            "PrivateDefaultRoute",
            "AWS::EC2::Route",
            json!({
                "RouteTableId": private_route_table.id_token(),
                "DestinationCidrBlock": "0.0.0.0/0",
                "NatGatewayId": nat.id_token(),
            }),
        )
        .depends_on(&private_route_table)
        .depends_on(&nat),
    )?;

    let private_subnets = declare_subnet_tier(
        template,
        vpc,
        &private_route_table,
        zones,
        "Private",
        AVAILABILITY_ZONE_COUNT,
        false,
    )?;
    Ok((nat, private_subnets))
}

fn compose_flow_log(
    template: &mut StackTemplate,
    vpc: &ResourceRef,
) -> Result<ResourceRef, TemplateError> {
    let log_group = template.declare(Resource::new(
        "FlowLogGroup",
        LOG_GROUP_KIND,
        json!({ "RetentionInDays": 30 }),
    ))?;
    let delivery_role = template.declare(Resource::new(
        "FlowLogDeliveryRole",
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": {
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "vpc-flow-logs.amazonaws.com" },
                    "Action": "sts:AssumeRole",
                }],
            },
            "Policies": [{
                "PolicyName": "flow-log-delivery",
                "PolicyDocument": {
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": [
                            "logs:CreateLogStream",
                            "logs:PutLogEvents",
                            "logs:DescribeLogGroups",
                            "logs:DescribeLogStreams",
                        ],
                        "Resource": ["*"],
                    }],
                },
            }],
        }),
    ))?;
    template.declare(
        Resource::new(
            "VpcFlowLog",
            FLOW_LOG_KIND,
            json!({
                "ResourceId": vpc.id_token(),
                "ResourceType": "VPC",
                "TrafficType": "ALL",
                "LogGroupName": log_group.id_token(),
                "DeliverLogsPermissionArn": delivery_role.attr("Arn"),
            }),
        )
        .depends_on(vpc)
        .depends_on(&log_group)
        .depends_on(&delivery_role),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackOptions;
    use crate::topology::DeploymentTopology;

    fn context(topology: DeploymentTopology) -> StackContext {
        StackContext::new(
            String::from("sandbox"),
            String::from("eu-west-1"),
            topology,
            StackOptions::default(),
        )
    }

    #[test]
    fn standalone_network_has_no_nat_and_no_private_tier() {
        let mut template = StackTemplate::new();
        let network = compose(&context(DeploymentTopology::StandaloneHost), &mut template)
            .expect("composition should succeed");

        assert!(network.nat_gateway.is_none());
        assert!(network.private_subnets.is_empty());
        assert_eq!(network.public_subnets.len(), AVAILABILITY_ZONE_COUNT);
        assert!(!template.has_kind(NAT_GATEWAY_KIND));
    }

    #[test]
    fn scheduled_network_has_exactly_one_nat_path() {
        let mut template = StackTemplate::new();
        let network = compose(&context(DeploymentTopology::ScheduledService), &mut template)
            .expect("composition should succeed");

        assert!(network.nat_gateway.is_some());
        assert_eq!(network.private_subnets.len(), AVAILABILITY_ZONE_COUNT);
        assert_eq!(template.resources_of_kind(NAT_GATEWAY_KIND).count(), 1);
    }

    #[test]
    fn flow_log_is_declared_for_both_topologies() {
        for topology in [
            DeploymentTopology::StandaloneHost,
            DeploymentTopology::ScheduledService,
        ] {
            let mut template = StackTemplate::new();
            compose(&context(topology), &mut template).expect("composition should succeed");
            assert!(
                template.has_kind(FLOW_LOG_KIND),
                "flow logging is unconditional"
            );
        }
    }

    #[test]
    fn availability_zones_are_region_scoped() {
        assert_eq!(
            availability_zones("eu-west-1"),
            vec![String::from("eu-west-1a"), String::from("eu-west-1b")]
        );
    }
}
