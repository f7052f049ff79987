//! Cloud provider abstraction.
//!
//! Exactly one instance backs each runner label. Providers are selected by
//! a short key through [`for_key`]; an unrecognized key is a configuration
//! error, not a fallback.

pub mod aws;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::mapping::InstanceMapping;
use crate::provider::aws::{AwsConfig, Ec2Provisioner};

/// Bounded polling budget for an instance state wait.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Default budget for waiting on instances to report running (10 minutes).
pub const READY_POLL: PollConfig = PollConfig {
    max_attempts: 40,
    delay: Duration::from_secs(15),
};

/// Default budget for waiting on instances to terminate (20 minutes).
pub const REMOVED_POLL: PollConfig = PollConfig {
    max_attempts: 80,
    delay: Duration::from_secs(15),
};

/// Everything a provider needs to launch one batch of runner instances.
///
/// `tokens` carries one registration token per requested instance; the
/// batch size is `tokens.len()`.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub tokens: Vec<String>,
    pub runner_release: String,
    pub home_dir: String,
    pub repo: String,
    pub extra_labels: Vec<String>,
    pub script: String,
}

/// Operations every cloud backend provides.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Launch one instance per token and return the instance-id to
    /// runner-label mapping for the batch.
    async fn create_instances(&self, spec: &LaunchSpec) -> Result<InstanceMapping>;

    /// Terminate the given instances.
    async fn remove_instances(&self, ids: &[String]) -> Result<()>;

    /// Block until every instance reports running.
    async fn wait_until_ready(&self, ids: &[String], poll: Option<PollConfig>) -> Result<()>;

    /// Block until every instance reports terminated.
    async fn wait_until_removed(&self, ids: &[String], poll: Option<PollConfig>) -> Result<()>;

    /// Whether a single instance is currently running.
    async fn instance_running(&self, id: &str) -> Result<bool>;
}

/// Bounded attempts-times-delay poll.
///
/// Probes up to `poll.max_attempts` times, sleeping `poll.delay` between
/// attempts but never after the last one. A probe error aborts immediately;
/// exhausting the budget yields [`Error::WaitTimeout`] carrying the attempt
/// count.
pub(crate) async fn poll_attempts<F, Fut>(what: &str, poll: PollConfig, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=poll.max_attempts {
        if probe().await? {
            return Ok(());
        }
        if attempt < poll.max_attempts {
            sleep(poll.delay).await;
        }
    }
    Err(Error::WaitTimeout {
        what: what.to_string(),
        attempts: poll.max_attempts,
    })
}

/// Build the provider selected by `key`.
pub async fn for_key(key: &str, aws: AwsConfig) -> Result<Box<dyn CloudProvider>> {
    match key {
        "aws" => Ok(Box::new(Ec2Provisioner::new(aws).await?)),
        other => Err(Error::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST_POLL: PollConfig = PollConfig {
        max_attempts: 5,
        delay: Duration::ZERO,
    };

    #[tokio::test]
    async fn test_poll_attempts_succeeds_mid_budget() {
        let mut probes = 0u32;
        poll_attempts("test condition", FAST_POLL, || {
            probes += 1;
            let done = probes >= 3;
            async move { Ok(done) }
        })
        .await
        .unwrap();
        assert_eq!(probes, 3);
    }

    #[tokio::test]
    async fn test_poll_attempts_exhausts_budget() {
        let mut probes = 0u32;
        let err = poll_attempts("test condition", FAST_POLL, || {
            probes += 1;
            async { Ok(false) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::WaitTimeout { attempts: 5, .. }));
        assert_eq!(probes, 5);
    }

    #[tokio::test]
    async fn test_poll_attempts_aborts_on_probe_error() {
        let mut probes = 0u32;
        let err = poll_attempts("test condition", FAST_POLL, || {
            probes += 1;
            async { Err(Error::Ec2("describe failed".to_string())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Ec2(_)));
        assert_eq!(probes, 1);
    }

    #[tokio::test]
    async fn test_poll_attempts_no_sleep_after_final_attempt() {
        // A single-attempt budget with an hour-long delay must still return
        // immediately once the attempt fails.
        let slow = PollConfig {
            max_attempts: 1,
            delay: Duration::from_secs(3600),
        };
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            poll_attempts("test condition", slow, || async { Ok(false) }),
        )
        .await
        .expect("poll must not sleep after its last attempt");
        assert!(matches!(
            result.unwrap_err(),
            Error::WaitTimeout { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_for_key_rejects_unknown_provider() {
        let err = for_key("gcp", AwsConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownProvider(ref k) if k == "gcp"));
        assert_eq!(err.to_string(), "Unknown cloud provider: 'gcp'");
    }
}
