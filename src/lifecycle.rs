//! Start/stop orchestration.
//!
//! `start` and `stop` are two separate process invocations. The instance
//! mapping written by `start` is the only state carried between them, so
//! it is persisted before any readiness wait can fail.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::github::RunnerRegistry;
use crate::mapping::InstanceMapping;
use crate::provider::{CloudProvider, LaunchSpec, PollConfig};
use crate::report::Reporter;

/// Everything a start invocation needs.
#[derive(Debug, Clone)]
pub struct StartArgs {
    pub count: usize,
    pub runner_timeout: Duration,
    pub platform: String,
    pub architecture: String,
    pub home_dir: String,
    pub repo: String,
    pub extra_labels: Vec<String>,
    pub script: String,
    pub output_path: PathBuf,
    pub ready_poll: Option<PollConfig>,
}

/// Everything a stop invocation needs.
#[derive(Debug, Clone)]
pub struct StopArgs {
    pub mapping_path: PathBuf,
    pub removed_poll: Option<PollConfig>,
}

/// Provision a batch of runner instances.
///
/// Order matters: tokens and the release URL are resolved first (both
/// fatal on failure), instances launch next, and the mapping is persisted
/// before any wait so a later timeout still leaves `stop` enough state to
/// clean up.
pub async fn start(
    registry: &dyn RunnerRegistry,
    provider: &dyn CloudProvider,
    reporter: &dyn Reporter,
    args: &StartArgs,
) -> Result<InstanceMapping> {
    reporter.progress(&format!("Creating {} runner token(s)...", args.count));
    let tokens = registry.create_runner_tokens(args.count).await?;

    let runner_release = registry
        .latest_runner_release(&args.platform, &args.architecture)
        .await?;
    debug!("Using runner release {}", runner_release);

    let spec = LaunchSpec {
        tokens,
        runner_release,
        home_dir: args.home_dir.clone(),
        repo: args.repo.clone(),
        extra_labels: args.extra_labels.clone(),
        script: args.script.clone(),
    };
    reporter.progress("Creating instances...");
    let mapping = provider.create_instances(&spec).await?;
    mapping.append_output(&args.output_path)?;

    reporter.progress("Waiting for instance to be ready...");
    provider
        .wait_until_ready(&mapping.instance_ids(), args.ready_poll)
        .await?;
    reporter.progress("Instance is ready!");

    for label in mapping.labels() {
        reporter.progress(&format!("Waiting for {label} to be registered..."));
        registry.wait_for_runner(&label, args.runner_timeout).await?;
        reporter.progress(&format!("{label} registered!"));
    }

    Ok(mapping)
}

/// Tear down a batch of runner instances.
///
/// Runner deregistration is best-effort per label: a runner that never
/// registered (or already deregistered itself) is skipped silently, and
/// other removal failures become warnings so termination still runs for
/// every instance. Termination failures are fatal.
pub async fn stop(
    registry: &dyn RunnerRegistry,
    provider: &dyn CloudProvider,
    reporter: &dyn Reporter,
    args: &StopArgs,
) -> Result<()> {
    let mapping = match InstanceMapping::read_output(&args.mapping_path) {
        Ok(mapping) => mapping,
        Err(e) => {
            reporter.error("Malformed instance mapping", &e.to_string());
            return Err(e);
        }
    };

    // An empty mapping is valid (a start that launched nothing): there are
    // no ids to hand the provider, so teardown is a no-op.
    if mapping.is_empty() {
        reporter.progress("No instances to remove.");
        return Ok(());
    }

    for label in mapping.labels() {
        reporter.progress(&format!("Removing runner {label}..."));
        match registry.remove_runner(&label).await {
            Ok(()) => reporter.progress(&format!("Runner {label} removed.")),
            Err(Error::MissingRunnerLabel(_)) => {
                debug!("Runner {} already gone, skipping", label);
            }
            Err(e) => {
                reporter.warning(
                    &format!("Failed to remove runner {label}"),
                    &e.to_string(),
                );
            }
        }
    }

    reporter.progress("Removing instances...");
    if let Err(e) = provider.remove_instances(&mapping.instance_ids()).await {
        reporter.error("Failed to terminate instances", &e.to_string());
        return Err(e);
    }

    reporter.progress("Waiting for instance removal...");
    if let Err(e) = provider
        .wait_until_removed(&mapping.instance_ids(), args.removed_poll)
        .await
    {
        reporter.error("Instance removal not confirmed", &e.to_string());
        return Err(e);
    }
    reporter.progress("Instances removed!");
    Ok(())
}
