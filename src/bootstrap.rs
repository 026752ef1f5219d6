//! Bootstrap procedure generation.
//!
//! The first-boot procedure is modelled as an ordered sequence of typed
//! stages rather than a concatenated string. Secure-shell hardening must run
//! strictly after every toolchain stage and strictly before the final daemon
//! (re)start, and the structure makes that ordering checkable instead of
//! merely hoped for.
//!
//! The rendered payload is delivered exactly once: as user data at instance
//! creation for the standalone host, or as the container entrypoint command
//! for the scheduled service. It runs sequentially inside the target's boot
//! process with no feedback channel; stage failures surface only in the
//! target's own logs.

use std::borrow::Cow;
use std::fmt;

use shell_escape::unix::escape;
use thiserror::Error;

use crate::config::StackContext;
use crate::topology::DeploymentTopology;

/// Version-manager bootstrap fetched over the network to install Node.js.
const NVM_INSTALL_URL: &str =
    "https://raw.githubusercontent.com/nvm-sh/nvm/v0.39.7/install.sh";

/// AWS CLI bundle fetched over the network.
const AWS_CLI_URL: &str = "https://awscli.amazonaws.com/awscli-exe-linux-x86_64.zip";

/// Replacement sshd configuration written wholesale on the scheduled
/// service, whose base image ships none.
const SCHEDULED_SSHD_CONFIG: &str = "Port 22\n\
Protocol 2\n\
HostKey /etc/ssh/ssh_host_rsa_key\n\
HostKey /etc/ssh/ssh_host_ecdsa_key\n\
HostKey /etc/ssh/ssh_host_ed25519_key\n\
SyslogFacility AUTHPRIV\n\
PermitRootLogin prohibit-password\n\
PubkeyAuthentication yes\n\
PasswordAuthentication no\n\
ChallengeResponseAuthentication no\n\
GSSAPIAuthentication no\n\
UseDNS no\n\
X11Forwarding no\n\
PrintMotd no\n\
AcceptEnv LANG LC_*\n\
Subsystem sftp /usr/libexec/openssh/sftp-server";

/// The named stages a bootstrap procedure is assembled from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageKind {
    /// Base OS package refresh and development toolchain baseline.
    PackageBaseline,
    /// Python, Java, and Node.js toolchains.
    LanguageToolchains,
    /// AWS command-line tooling.
    CliTooling,
    /// Telemetry agent installation.
    TelemetryAgent,
    /// Secure-shell hardening (no passwords, no root password login,
    /// public-key auth only).
    SshHardening,
    /// In-container resolution of the externally issued key pair
    /// (scheduled service only).
    CredentialResolution,
    /// Final secure-shell daemon (re)start.
    DaemonStart,
}

impl StageKind {
    /// Stable stage name used in diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PackageBaseline => "package-baseline",
            Self::LanguageToolchains => "language-toolchains",
            Self::CliTooling => "cli-tooling",
            Self::TelemetryAgent => "telemetry-agent",
            Self::SshHardening => "ssh-hardening",
            Self::CredentialResolution => "credential-resolution",
            Self::DaemonStart => "daemon-start",
        }
    }

    /// Returns true for stages that install software before hardening.
    #[must_use]
    pub const fn is_toolchain(self) -> bool {
        matches!(
            self,
            Self::PackageBaseline | Self::LanguageToolchains | Self::CliTooling | Self::TelemetryAgent
        )
    }

    /// Position band used to check ordering; bands must be non-decreasing
    /// across the procedure.
    const fn band(self) -> u8 {
        match self {
            Self::PackageBaseline | Self::LanguageToolchains | Self::CliTooling
            | Self::TelemetryAgent => 0,
            Self::SshHardening => 1,
            Self::CredentialResolution => 2,
            Self::DaemonStart => 3,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Builds the single-line command writing the replacement sshd
/// configuration. The scheduled render chains commands with `&&`, so every
/// command must stay on one line; a heredoc terminator would be corrupted by
/// the join and swallow the rest of the payload. Each configuration line is
/// passed to `printf` as a quoted argument instead.
fn sshd_config_write_command() -> String {
    let lines: Vec<String> = SCHEDULED_SSHD_CONFIG
        .lines()
        .map(|line| escape(Cow::from(line)).into_owned())
        .collect();
    format!(
        "printf '%s\\n' {} > /etc/ssh/sshd_config",
        lines.join(" ")
    )
}

/// One named stage: a sequence of shell invocations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stage {
    /// Which stage this is.
    pub kind: StageKind,
    /// Shell invocations, executed in order.
    pub commands: Vec<String>,
}

impl Stage {
    fn new(kind: StageKind, commands: &[&str]) -> Self {
        Self {
            kind,
            commands: commands.iter().map(|cmd| (*cmd).to_owned()).collect(),
        }
    }
}

/// An ordered, single-delivery bootstrap procedure for one topology.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapProcedure {
    topology: DeploymentTopology,
    stages: Vec<Stage>,
}

impl BootstrapProcedure {
    /// Assembles the procedure for the context's topology.
    ///
    /// The standalone host runs on the provider's current host image and
    /// appends hardening to the image's existing daemon configuration; the
    /// scheduled service runs in a bare container image, installs the daemon
    /// itself, writes its configuration wholesale, and resolves the
    /// externally issued key pair before handing the shell over to the
    /// foreground daemon.
    #[must_use]
    pub fn for_context(context: &StackContext) -> Self {
        match context.topology {
            DeploymentTopology::StandaloneHost => Self::standalone_host(context),
            DeploymentTopology::ScheduledService => Self::scheduled_service(context),
        }
    }

    fn standalone_host(context: &StackContext) -> Self {
        let mut stages = vec![
            Stage::new(
                StageKind::PackageBaseline,
                &[
                    "dnf update -y",
                    "dnf groupinstall -y \"Development Tools\"",
                    "dnf install -y git curl wget gcc gcc-c++ make openssl-devel unzip tar",
                ],
            ),
            Stage::new(
                StageKind::LanguageToolchains,
                &[
                    "dnf install -y python3 python3-pip python3-devel",
                    "pip3 install --upgrade pip setuptools wheel virtualenv",
                    "dnf install -y java-17-amazon-corretto java-17-amazon-corretto-devel maven",
                    &format!("curl -o- {NVM_INSTALL_URL} | bash"),
                    "echo \"source /root/.nvm/nvm.sh\" >> /etc/profile",
                    "export NVM_DIR=\"$HOME/.nvm\"",
                    "[ -s \"$NVM_DIR/nvm.sh\" ] && . \"$NVM_DIR/nvm.sh\"",
                    "nvm install --lts",
                    "nvm use --lts",
                ],
            ),
            Stage::new(
                StageKind::CliTooling,
                &[
                    &format!("curl \"{AWS_CLI_URL}\" -o \"awscliv2.zip\" -s"),
                    "unzip -q awscliv2.zip",
                    "./aws/install",
                    "rm -rf aws awscliv2.zip",
                ],
            ),
        ];
        if context.options.telemetry_agent {
            stages.push(Stage::new(
                StageKind::TelemetryAgent,
                &["dnf install -y amazon-cloudwatch-agent"],
            ));
        }
        stages.push(Stage::new(
            StageKind::SshHardening,
            &[
                "echo \"PermitRootLogin no\" >> /etc/ssh/sshd_config",
                "echo \"PasswordAuthentication no\" >> /etc/ssh/sshd_config",
                "echo \"PubkeyAuthentication yes\" >> /etc/ssh/sshd_config",
            ],
        ));
        stages.push(Stage::new(
            StageKind::DaemonStart,
            &["systemctl restart sshd"],
        ));
        Self {
            topology: DeploymentTopology::StandaloneHost,
            stages,
        }
    }

    fn scheduled_service(context: &StackContext) -> Self {
        let mut stages = vec![
            Stage::new(
                StageKind::PackageBaseline,
                &[
                    "yum update -y",
                    "yum install -y openssh-server git curl wget gcc gcc-c++ make openssl-devel \
                     unzip tar procps",
                ],
            ),
            Stage::new(
                StageKind::LanguageToolchains,
                &[
                    "yum install -y python3 python3-pip python3-devel",
                    "pip3 install --upgrade pip setuptools wheel virtualenv",
                    "yum install -y java-17-amazon-corretto java-17-amazon-corretto-devel maven",
                    &format!("curl -o- {NVM_INSTALL_URL} | bash"),
                    "export NVM_DIR=\"$HOME/.nvm\" && [ -s \"$NVM_DIR/nvm.sh\" ] && \
                     . \"$NVM_DIR/nvm.sh\" && nvm install --lts && nvm use --lts",
                ],
            ),
            Stage::new(
                StageKind::CliTooling,
                &[
                    &format!("curl \"{AWS_CLI_URL}\" -o \"awscliv2.zip\" -s"),
                    "unzip -q awscliv2.zip",
                    "./aws/install",
                    "rm -rf aws awscliv2.zip",
                ],
            ),
        ];
        if context.options.telemetry_agent {
            stages.push(Stage::new(
                StageKind::TelemetryAgent,
                &["yum install -y amazon-cloudwatch-agent"],
            ));
        }
        stages.push(Stage::new(
            StageKind::SshHardening,
            &[
                "mkdir -p /run/sshd /root/.ssh",
                "chmod 700 /root/.ssh",
                "ssh-keygen -A",
                "cp /etc/ssh/sshd_config /etc/ssh/sshd_config.original",
                &sshd_config_write_command(),
                "test -f /etc/ssh/sshd_config && chmod 600 /etc/ssh/sshd_config",
            ],
        ));
        // The container image carries no credential. Resolve the key pair's
        // provider identifier from its name, fetch the decrypted private
        // half, derive the public half, install it as the sole authorized
        // key, and discard the private material before the daemon starts.
        stages.push(Stage::new(
            StageKind::CredentialResolution,
            &[
                "aws ec2 describe-key-pairs --region $AWS_DEFAULT_REGION --key-names $KEY_NAME \
                 --query \"KeyPairs[0].KeyPairId\" --output text --no-cli-pager | xargs -I {} \
                 aws ssm get-parameter --region $AWS_DEFAULT_REGION --name /ec2/keypair/{} \
                 --with-decryption --query \"Parameter.Value\" --output text --no-cli-pager \
                 > /root/.ssh/key.pem",
                "chmod 600 /root/.ssh/key.pem",
                "ssh-keygen -y -f /root/.ssh/key.pem > /root/.ssh/authorized_keys",
                "rm -f /root/.ssh/key.pem",
            ],
        ));
        stages.push(Stage::new(StageKind::DaemonStart, &["/usr/sbin/sshd -D"]));
        Self {
            topology: DeploymentTopology::ScheduledService,
            stages,
        }
    }

    /// Topology the procedure was generated for.
    #[must_use]
    pub const fn topology(&self) -> DeploymentTopology {
        self.topology
    }

    /// The ordered stages.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Looks up a stage by kind.
    #[must_use]
    pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.kind == kind)
    }

    /// All shell invocations in execution order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .flat_map(|stage| stage.commands.iter().map(String::as_str))
    }

    /// Checks the structural invariants of the procedure.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when hardening or the daemon start is
    /// missing or out of order, or when the credential resolution stage does
    /// not match the topology.
    pub fn validate(&self) -> Result<(), BootstrapError> {
        for pair in self.stages.windows(2) {
            if let [earlier, later] = pair
                && earlier.kind.band() > later.kind.band()
            {
                return Err(BootstrapError::OrderViolation {
                    earlier: earlier.kind,
                    later: later.kind,
                });
            }
        }
        if self.stage(StageKind::SshHardening).is_none() {
            return Err(BootstrapError::MissingStage(StageKind::SshHardening));
        }
        match self.stages.last() {
            Some(stage) if stage.kind == StageKind::DaemonStart => {}
            _ => return Err(BootstrapError::MissingStage(StageKind::DaemonStart)),
        }
        let resolves_credential = self.stage(StageKind::CredentialResolution).is_some();
        if self.topology.is_scheduled() && !resolves_credential {
            return Err(BootstrapError::MissingStage(StageKind::CredentialResolution));
        }
        if !self.topology.is_scheduled() && resolves_credential {
            return Err(BootstrapError::UnexpectedStage(StageKind::CredentialResolution));
        }
        Ok(())
    }

    /// Renders the procedure as a single opaque payload.
    ///
    /// The standalone host receives it as a newline-separated user-data
    /// script; the scheduled service receives an `&&`-chained command line so
    /// a failed stage stops the chain before the daemon starts.
    #[must_use]
    pub fn render(&self) -> String {
        let commands: Vec<&str> = self.commands().collect();
        match self.topology {
            DeploymentTopology::StandaloneHost => {
                let mut script = String::from("#!/bin/bash\n");
                script.push_str(&commands.join("\n"));
                script
            }
            DeploymentTopology::ScheduledService => commands.join(" && "),
        }
    }

    /// Renders the procedure as a container entrypoint command.
    #[must_use]
    pub fn container_command(&self) -> Vec<String> {
        vec![
            String::from("/bin/bash"),
            String::from("-c"),
            self.render(),
        ]
    }
}

/// Errors raised while validating a bootstrap procedure.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum BootstrapError {
    /// Raised when a required stage is absent.
    #[error("bootstrap procedure is missing the {0} stage")]
    MissingStage(StageKind),
    /// Raised when a stage is present for the wrong topology.
    #[error("bootstrap procedure must not contain the {0} stage for this topology")]
    UnexpectedStage(StageKind),
    /// Raised when stages appear out of order.
    #[error("bootstrap stage {later} must not run after {earlier}")]
    OrderViolation {
        /// The stage that ran first.
        earlier: StageKind,
        /// The stage that should have run earlier.
        later: StageKind,
    },
}
