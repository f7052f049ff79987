//! EC2 backing for runner instances.

use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{
    IamInstanceProfileSpecification, InstanceStateName, InstanceType, ResourceType, Tag,
    TagSpecification,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tracing::{debug, info};

use crate::bootstrap::{self, BootstrapParams};
use crate::error::{Error, Result};
use crate::github::generate_label;
use crate::mapping::InstanceMapping;
use crate::provider::{
    CloudProvider, LaunchSpec, PollConfig, READY_POLL, REMOVED_POLL, poll_attempts,
};

use async_trait::async_trait;

/// A tag applied to every launched instance.
///
/// Serialized with EC2 field casing so tag lists can be pasted from
/// CloudFormation or console exports.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AwsTag {
    pub key: String,
    pub value: String,
}

/// EC2 launch settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// AMI to launch, e.g. "ami-0abcdef1234567890".
    pub image_id: String,

    /// Instance type, e.g. "t3.medium".
    pub instance_type: String,

    /// Region override. When empty, the ambient AWS environment decides.
    pub region: String,

    /// Subnet to launch into. Empty means the account default.
    pub subnet_id: String,

    /// Security group to attach. Empty means the account default.
    pub security_group_id: String,

    /// IAM instance profile name. Empty means none.
    pub iam_role: String,

    /// Tags applied to every launched instance.
    pub tags: Vec<AwsTag>,
}

/// Check that a launch has everything EC2 requires, naming the first
/// missing field.
fn validate(config: &AwsConfig, spec: &LaunchSpec) -> Result<()> {
    let missing = if config.image_id.is_empty() {
        Some("image_id")
    } else if config.instance_type.is_empty() {
        Some("instance_type")
    } else if spec.tokens.is_empty() {
        Some("registration tokens")
    } else if spec.runner_release.is_empty() {
        Some("runner_release")
    } else if spec.home_dir.is_empty() {
        Some("home_dir")
    } else {
        None
    };
    match missing {
        Some(field) => Err(Error::Validation(format!("missing required field: {field}"))),
        None => Ok(()),
    }
}

/// Comma-joined label set for one instance: user labels first, then the
/// generated unique label.
fn join_labels(extra_labels: &[String], unique: &str) -> String {
    let mut labels = extra_labels.to_vec();
    labels.push(unique.to_string());
    labels.join(",")
}

fn to_ec2_tags(tags: &[AwsTag]) -> Vec<Tag> {
    tags.iter()
        .map(|t| Tag::builder().key(&t.key).value(&t.value).build())
        .collect()
}

/// Launches and terminates EC2 instances for runner batches.
pub struct Ec2Provisioner {
    config: AwsConfig,
    client: aws_sdk_ec2::Client,
}

impl Ec2Provisioner {
    /// Build a provisioner from the ambient AWS environment, with the
    /// configured region taking precedence.
    pub async fn new(config: AwsConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if !config.region.is_empty() {
            loader = loader.region(Region::new(config.region.clone()));
        }
        let shared = loader.load().await;
        if shared.region().is_none() {
            return Err(Error::Validation(
                "no AWS region configured (set aws.region or the ambient AWS environment)"
                    .to_string(),
            ));
        }
        let client = aws_sdk_ec2::Client::new(&shared);
        Ok(Self { config, client })
    }

    /// Launch a single instance whose user data registers a runner with
    /// `labels`, returning its instance id.
    async fn launch_one(&self, spec: &LaunchSpec, token: &str, labels: &str) -> Result<String> {
        let user_data = bootstrap::render(&BootstrapParams {
            home_dir: spec.home_dir.clone(),
            repo: spec.repo.clone(),
            token: token.to_string(),
            runner_release: spec.runner_release.clone(),
            labels: labels.to_string(),
            script: spec.script.clone(),
        })?;
        let encoded = BASE64.encode(user_data);

        let mut request = self
            .client
            .run_instances()
            .image_id(&self.config.image_id)
            .instance_type(InstanceType::from(self.config.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .user_data(encoded);
        if !self.config.subnet_id.is_empty() {
            request = request.subnet_id(&self.config.subnet_id);
        }
        if !self.config.security_group_id.is_empty() {
            request = request.security_group_ids(&self.config.security_group_id);
        }
        if !self.config.iam_role.is_empty() {
            request = request.iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .name(&self.config.iam_role)
                    .build(),
            );
        }
        if !self.config.tags.is_empty() {
            request = request.tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .set_tags(Some(to_ec2_tags(&self.config.tags)))
                    .build(),
            );
        }

        let output = request
            .send()
            .await
            .map_err(|e| Error::Ec2(DisplayErrorContext(&e).to_string()))?;

        output
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .map(str::to_string)
            .ok_or_else(|| Error::Ec2("EC2 returned no instance for launch request".to_string()))
    }

    /// Current state names for the given instances.
    async fn instance_states(&self, ids: &[String]) -> Result<Vec<InstanceStateName>> {
        let output = self
            .client
            .describe_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| Error::Ec2(DisplayErrorContext(&e).to_string()))?;

        let states = output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .filter_map(|i| i.state().and_then(|s| s.name()).cloned())
            .collect();
        Ok(states)
    }

    /// Poll until every instance reports `target`, within the given budget.
    async fn wait_for_state(
        &self,
        ids: &[String],
        target: InstanceStateName,
        poll: PollConfig,
    ) -> Result<()> {
        let target = &target;
        poll_attempts(
            &format!("instances to reach state {target}"),
            poll,
            || async move {
                let states = self.instance_states(ids).await?;
                if states.len() == ids.len() && states.iter().all(|s| s == target) {
                    info!("All {} instance(s) are {}", ids.len(), target);
                    Ok(true)
                } else {
                    debug!("Instances not yet {}", target);
                    Ok(false)
                }
            },
        )
        .await
    }
}

#[async_trait]
impl CloudProvider for Ec2Provisioner {
    async fn create_instances(&self, spec: &LaunchSpec) -> Result<InstanceMapping> {
        validate(&self.config, spec)?;

        let mut mapping = InstanceMapping::new();
        for token in &spec.tokens {
            let label = generate_label();
            let labels = join_labels(&spec.extra_labels, &label);
            let instance_id = self.launch_one(spec, token, &labels).await?;
            info!("Launched instance {} for runner {}", instance_id, label);
            mapping.insert(instance_id, label);
        }
        Ok(mapping)
    }

    async fn remove_instances(&self, ids: &[String]) -> Result<()> {
        info!("Terminating {} instance(s)", ids.len());
        self.client
            .terminate_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| Error::Ec2(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn wait_until_ready(&self, ids: &[String], poll: Option<PollConfig>) -> Result<()> {
        self.wait_for_state(ids, InstanceStateName::Running, poll.unwrap_or(READY_POLL))
            .await
    }

    async fn wait_until_removed(&self, ids: &[String], poll: Option<PollConfig>) -> Result<()> {
        self.wait_for_state(
            ids,
            InstanceStateName::Terminated,
            poll.unwrap_or(REMOVED_POLL),
        )
        .await
    }

    async fn instance_running(&self, id: &str) -> Result<bool> {
        let states = self.instance_states(&[id.to_string()]).await?;
        Ok(states
            .first()
            .is_some_and(|s| *s == InstanceStateName::Running))
    }
}
