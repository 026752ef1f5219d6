//! Output composition.
//!
//! Derives the external contract of a provisioning run: a reachability
//! address, a ready-to-run SSH command, the credential's logical name, and
//! the credential-retrieval one-liner. No other component may construct the
//! retrieval command; keeping it here keeps all credential handling in one
//! auditable place.

use std::borrow::Cow;

use shell_escape::unix::escape;
use thiserror::Error;

use crate::compute::ComputeResources;
use crate::config::StackContext;
use crate::keypair::{KEY_PARAMETER_PREFIX, KeyPairResources};
use crate::template::{Output, StackTemplate, TemplateError};

/// Output name for the credential's logical name.
pub const OUTPUT_SSH_KEY_NAME: &str = "SSHKeyName";

/// Output name for the credential-retrieval command.
pub const OUTPUT_SSH_KEY_COMMAND: &str = "SSHKeyCommand";

/// Output name for the standalone host's public address.
pub const OUTPUT_INSTANCE_PUBLIC_IP: &str = "InstancePublicIP";

/// Output name for the ready-to-run SSH command (standalone host).
pub const OUTPUT_SSH_COMMAND: &str = "SSHCommand";

/// Output name for the load balancer address (scheduled service).
pub const OUTPUT_LOAD_BALANCER_DNS: &str = "LoadBalancerDNS";

/// Errors raised while composing outputs.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum OutputError {
    /// Raised when recording an output fails.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Raised when the standalone topology has no instance to address.
    #[error("standalone host outputs require a declared instance")]
    MissingInstance,
    /// Raised when the scheduled topology has no load balancer to address.
    #[error("scheduled service outputs require a declared load balancer")]
    MissingLoadBalancer,
}

/// Builds the shell one-liner that resolves the key pair's provider
/// identifier and fetches the decrypted private material into a single local
/// file with restrictive permissions.
///
/// The lookup-then-fetch shape mirrors what the scheduled service does at
/// boot: the encrypted parameter is keyed by the provider-assigned
/// identifier, not the logical name, so the name must be resolved first. The
/// private material is streamed straight into its destination file; no
/// intermediate plaintext file exists.
fn key_retrieval_command(key_name: &str) -> String {
    let key = escape(Cow::from(key_name));
    format!(
        "aws ec2 describe-key-pairs --key-names {key} --query 'KeyPairs[0].KeyPairId' \
         --output text | xargs -I {{}} aws ssm get-parameter --name {KEY_PARAMETER_PREFIX}{{}} \
         --with-decryption --query 'Parameter.Value' --output text > {key}.pem && \
         chmod 400 {key}.pem"
    )
}

/// Records the user-facing outputs for the run.
///
/// # Errors
///
/// Returns [`OutputError`] when a collaborator resource is missing or an
/// output name collides.
pub fn compose(
    context: &StackContext,
    template: &mut StackTemplate,
    key_pair: &KeyPairResources,
    compute: &ComputeResources,
) -> Result<(), OutputError> {
    if context.topology.is_scheduled() {
        let load_balancer = compute
            .load_balancer
            .as_ref()
            .ok_or(OutputError::MissingLoadBalancer)?;
        template.add_output(Output::new(
            OUTPUT_LOAD_BALANCER_DNS,
            load_balancer.attr("DNSName"),
            "Network Load Balancer DNS name for SSH connection",
        ))?;
    } else {
        let instance = compute
            .instance
            .as_ref()
            .ok_or(OutputError::MissingInstance)?;
        let public_ip = instance.attr("PublicIp");
        template.add_output(Output::new(
            OUTPUT_INSTANCE_PUBLIC_IP,
            public_ip.clone(),
            "Public IP address for SSH connection",
        ))?;
        template.add_output(Output::new(
            OUTPUT_SSH_COMMAND,
            format!("ssh -i {}.pem ec2-user@{public_ip}", key_pair.key_name),
            "SSH command to connect to the instance",
        ))?;
    }

    template.add_output(Output::new(
        OUTPUT_SSH_KEY_NAME,
        key_pair.key_name.clone(),
        "Name of SSH key pair",
    ))?;
    template.add_output(Output::new(
        OUTPUT_SSH_KEY_COMMAND,
        key_retrieval_command(&key_pair.key_name),
        "Command to retrieve private key",
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackOptions;
    use crate::topology::DeploymentTopology;
    use crate::{bootstrap::BootstrapProcedure, identity, keypair, network};

    fn context(topology: DeploymentTopology) -> StackContext {
        StackContext::new(
            String::from("sandbox"),
            String::from("us-east-1"),
            topology,
            StackOptions::default(),
        )
    }

    fn composed(topology: DeploymentTopology) -> StackTemplate {
        let ctx = context(topology);
        let mut template = StackTemplate::new();
        let net = network::compose(&ctx, &mut template).expect("network");
        let ids = identity::compose(&ctx, &mut template).expect("identity");
        let key = keypair::provision(&ctx, &mut template).expect("key pair");
        let procedure = BootstrapProcedure::for_context(&ctx);
        let compute = crate::compute::compose(&ctx, &mut template, &net, &ids, &key, &procedure)
            .expect("compute");
        compose(&ctx, &mut template, &key, &compute).expect("outputs");
        template
    }

    #[test]
    fn standalone_outputs_address_the_instance_directly() {
        let template = composed(DeploymentTopology::StandaloneHost);

        let ssh = template.output(OUTPUT_SSH_COMMAND).expect("ssh command");
        assert_eq!(
            ssh.value,
            "ssh -i sandbox-ec2-key.pem ec2-user@${DevInstance.PublicIp}"
        );
        assert!(template.output(OUTPUT_INSTANCE_PUBLIC_IP).is_some());
        assert!(template.output(OUTPUT_LOAD_BALANCER_DNS).is_none());
    }

    #[test]
    fn scheduled_outputs_address_the_load_balancer_only() {
        let template = composed(DeploymentTopology::ScheduledService);

        let dns = template
            .output(OUTPUT_LOAD_BALANCER_DNS)
            .expect("load balancer output");
        assert_eq!(dns.value, "${ServiceLoadBalancer.DNSName}");
        assert!(template.output(OUTPUT_INSTANCE_PUBLIC_IP).is_none());
        assert!(template.output(OUTPUT_SSH_COMMAND).is_none());
    }

    #[test]
    fn retrieval_command_resolves_id_then_fetches_one_file() {
        let command = key_retrieval_command("sandbox-ec2-key");

        assert!(command.contains("describe-key-pairs"));
        assert!(command.contains(KEY_PARAMETER_PREFIX));
        assert!(command.contains("--with-decryption"));
        assert_eq!(
            command.matches('>').count(),
            1,
            "exactly one file is written"
        );
        assert!(command.ends_with("chmod 400 sandbox-ec2-key.pem"));
    }

    #[test]
    fn both_common_outputs_are_always_present() {
        for topology in [
            DeploymentTopology::StandaloneHost,
            DeploymentTopology::ScheduledService,
        ] {
            let template = composed(topology);
            assert!(template.output(OUTPUT_SSH_KEY_NAME).is_some());
            assert!(template.output(OUTPUT_SSH_KEY_COMMAND).is_some());
        }
    }

    #[test]
    fn missing_collaborators_are_rejected() {
        let ctx = context(DeploymentTopology::ScheduledService);
        let mut template = StackTemplate::new();
        let key = keypair::provision(&ctx, &mut template).expect("key pair");
        let error = compose(&ctx, &mut template, &key, &ComputeResources::default())
            .expect_err("missing load balancer should fail");
        assert_eq!(error, OutputError::MissingLoadBalancer);
    }
}
