//! GitHub API client for runner management.
//!
//! Handles:
//! - Runner registration token minting (one short-lived token per instance)
//! - Listing, finding and removing self-hosted runners by label
//! - Resolving the latest runner agent release for a platform/architecture
//! - Waiting for a labeled runner to come online

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// GitHub API base URL.
const GITHUB_API_URL: &str = "https://api.github.com";

/// Fixed API version header sent with every request.
const API_VERSION: &str = "2022-11-28";

/// Upstream repository that publishes runner agent releases.
const RUNNER_RELEASES_REPO: &str = "actions/runner";

/// Default delay between runner-registration polls.
const DEFAULT_RUNNER_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Platform/architecture pairs the runner agent is published for.
const SUPPORTED_TARGETS: &[(&str, &[&str])] = &[
    ("linux", &["x64", "arm", "arm64"]),
    ("win", &["x64", "arm64"]),
    ("osx", &["x64", "arm64"]),
];

/// Characters a generated runner label suffix is drawn from.
const LABEL_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a unique runner label: `runner-` plus 8 random characters
/// from `[a-z0-9]`.
pub fn generate_label() -> String {
    generate_label_with(&mut rand::thread_rng())
}

/// Label generation with a caller-supplied RNG, so tests can pin a seed.
pub fn generate_label_with<R: Rng>(rng: &mut R) -> String {
    let suffix: String = (0..8)
        .map(|_| LABEL_CHARSET[rng.gen_range(0..LABEL_CHARSET.len())] as char)
        .collect();
    format!("runner-{suffix}")
}

/// A self-hosted runner as reported by the hosting platform.
#[derive(Debug, Clone)]
pub struct SelfHostedRunner {
    pub id: u64,
    pub name: String,
    pub os: String,
    pub labels: Vec<String>,
}

/// Trait seam over the hosting platform, so the lifecycle orchestrator can
/// run against a stub registry in tests.
#[async_trait]
pub trait RunnerRegistry: Send + Sync {
    /// Mint `count` registration tokens, one per instance, in call order.
    /// Any failure aborts the whole batch.
    async fn create_runner_tokens(&self, count: usize) -> Result<Vec<String>>;

    /// Resolve the download URL of the latest runner agent release.
    async fn latest_runner_release(&self, platform: &str, architecture: &str) -> Result<String>;

    /// Block until a runner with `label` registers, or the timeout elapses.
    async fn wait_for_runner(&self, label: &str, timeout: Duration) -> Result<()>;

    /// Deregister the runner with `label`. Fails with
    /// [`Error::MissingRunnerLabel`] when no such runner is registered.
    async fn remove_runner(&self, label: &str) -> Result<()>;
}

/// Response from the registration token endpoint.
#[derive(Debug, Deserialize)]
struct RegistrationTokenResponse {
    token: String,
}

/// Response from the runners list endpoint.
#[derive(Debug, Deserialize)]
struct RunnersListResponse {
    runners: Vec<RunnerInfo>,
}

/// Individual runner info from the GitHub API.
#[derive(Debug, Deserialize)]
struct RunnerInfo {
    id: u64,
    name: String,
    os: String,
    labels: Vec<RunnerLabelInfo>,
}

/// Label object nested in the runners list response.
#[derive(Debug, Deserialize)]
struct RunnerLabelInfo {
    name: String,
}

/// Response from the latest release endpoint.
#[derive(Debug, Deserialize)]
struct LatestReleaseResponse {
    assets: Vec<ReleaseAsset>,
}

/// Release asset from the latest release response.
#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// GitHub API client scoped to one repository.
pub struct GitHubClient {
    /// Bearer credential for API calls.
    token: String,

    /// Repository full name, "owner/repo".
    repo: String,

    /// API base URL, overridable for tests.
    base_url: String,

    /// Delay between runner-registration polls.
    poll_interval: Duration,

    /// HTTP client.
    http_client: Client,
}

impl GitHubClient {
    /// Create a client against the public GitHub API.
    pub fn new(token: impl Into<String>, repo: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, repo, GITHUB_API_URL)
    }

    /// Create a client against an alternate base URL (test servers).
    pub fn with_base_url(
        token: impl Into<String>,
        repo: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http_client = Client::builder().user_agent("runner-forge").build()?;
        Ok(Self {
            token: token.into(),
            repo: repo.into(),
            base_url: base_url.into(),
            poll_interval: DEFAULT_RUNNER_POLL_INTERVAL,
            http_client,
        })
    }

    /// Override the registration poll interval (tests run with zero delay).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Issue a request with the fixed auth and version headers.
    async fn request(&self, method: Method, endpoint: &str) -> Result<Response> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .http_client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        Ok(response)
    }

    /// Status and body of a failed response, surfaced verbatim for diagnosis.
    async fn failure_detail(response: Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        format!("{status}: {body}")
    }

    /// Mint a single registration token.
    pub async fn create_runner_token(&self) -> Result<String> {
        let endpoint = format!("repos/{}/actions/runners/registration-token", self.repo);
        let response = self.request(Method::POST, &endpoint).await?;

        if !response.status().is_success() {
            return Err(Error::TokenRetrieval(Self::failure_detail(response).await));
        }

        let token_response: RegistrationTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::TokenRetrieval(format!("failed to parse response: {e}")))?;

        Ok(token_response.token)
    }

    /// Mint `count` tokens sequentially. The first failure aborts the batch:
    /// earlier tokens must not be assumed valid by the caller.
    pub async fn create_runner_tokens(&self, count: usize) -> Result<Vec<String>> {
        let mut tokens = Vec::with_capacity(count);
        for _ in 0..count {
            tokens.push(self.create_runner_token().await?);
        }
        Ok(tokens)
    }

    /// List self-hosted runners for the repository.
    ///
    /// An empty result set maps to `None`, distinguished from transport or
    /// decode failures which raise [`Error::RunnerList`].
    pub async fn get_runners(&self) -> Result<Option<Vec<SelfHostedRunner>>> {
        let endpoint = format!("repos/{}/actions/runners", self.repo);
        let response = self
            .request(Method::GET, &endpoint)
            .await
            .map_err(|e| Error::RunnerList(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::RunnerList(Self::failure_detail(response).await));
        }

        let list: RunnersListResponse = response
            .json()
            .await
            .map_err(|e| Error::RunnerList(e.to_string()))?;

        if list.runners.is_empty() {
            return Ok(None);
        }

        let runners = list
            .runners
            .into_iter()
            .map(|r| SelfHostedRunner {
                id: r.id,
                name: r.name,
                os: r.os,
                labels: r.labels.into_iter().map(|l| l.name).collect(),
            })
            .collect();
        Ok(Some(runners))
    }

    /// Look up a runner by exact label match.
    ///
    /// When duplicate labels exist the first match wins; removal therefore
    /// deregisters one runner per call.
    pub async fn get_runner(&self, label: &str) -> Result<SelfHostedRunner> {
        let runners = self.get_runners().await?.unwrap_or_default();
        runners
            .into_iter()
            .find(|r| r.labels.iter().any(|l| l == label))
            .ok_or_else(|| Error::MissingRunnerLabel(label.to_string()))
    }

    /// Remove a runner by label (looks up the runner id first).
    ///
    /// A runner found but refusing to delete is distinguished from a runner
    /// never found: the former is [`Error::RunnerRemoval`], the latter
    /// [`Error::MissingRunnerLabel`].
    pub async fn remove_runner(&self, label: &str) -> Result<()> {
        let runner = self.get_runner(label).await?;
        debug!("Found runner '{}' with ID {}, deleting...", label, runner.id);

        let endpoint = format!("repos/{}/actions/runners/{}", self.repo, runner.id);
        let response = self.request(Method::DELETE, &endpoint).await?;

        if !response.status().is_success() {
            return Err(Error::RunnerRemoval {
                label: label.to_string(),
                reason: Self::failure_detail(response).await,
            });
        }

        info!("Removed runner '{}' (ID {})", label, runner.id);
        Ok(())
    }

    /// Resolve the download URL of the latest runner agent release for the
    /// given platform and architecture.
    pub async fn latest_runner_release(
        &self,
        platform: &str,
        architecture: &str,
    ) -> Result<String> {
        let supported = SUPPORTED_TARGETS
            .iter()
            .find(|(p, _)| *p == platform)
            .is_some_and(|(_, archs)| archs.contains(&architecture));
        if !supported {
            return Err(Error::UnsupportedTarget {
                platform: platform.to_string(),
                architecture: architecture.to_string(),
            });
        }

        let endpoint = format!("repos/{RUNNER_RELEASES_REPO}/releases/latest");
        let response = self.request(Method::GET, &endpoint).await?;

        if !response.status().is_success() {
            return Err(Error::ReleaseLookup(Self::failure_detail(response).await));
        }

        let release: LatestReleaseResponse = response
            .json()
            .await
            .map_err(|e| Error::ReleaseLookup(e.to_string()))?;

        release
            .assets
            .into_iter()
            .find(|asset| asset.name.contains(platform) && asset.name.contains(architecture))
            .map(|asset| asset.browser_download_url)
            .ok_or_else(|| Error::ReleaseNotFound {
                platform: platform.to_string(),
                architecture: architecture.to_string(),
            })
    }

    /// Poll until the runner with `label` appears, or `timeout` elapses.
    pub async fn wait_for_runner(&self, label: &str, timeout: Duration) -> Result<()> {
        poll_until(
            &format!("runner {label} to register"),
            timeout,
            self.poll_interval,
            || async move {
                match self.get_runner(label).await {
                    Ok(runner) => {
                        info!("Runner {} found (ID {})", label, runner.id);
                        Ok(Some(()))
                    }
                    Err(Error::MissingRunnerLabel(_)) => {
                        info!("Runner {} not found. Waiting...", label);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            },
        )
        .await
    }
}

#[async_trait]
impl RunnerRegistry for GitHubClient {
    async fn create_runner_tokens(&self, count: usize) -> Result<Vec<String>> {
        GitHubClient::create_runner_tokens(self, count).await
    }

    async fn latest_runner_release(&self, platform: &str, architecture: &str) -> Result<String> {
        GitHubClient::latest_runner_release(self, platform, architecture).await
    }

    async fn wait_for_runner(&self, label: &str, timeout: Duration) -> Result<()> {
        GitHubClient::wait_for_runner(self, label, timeout).await
    }

    async fn remove_runner(&self, label: &str) -> Result<()> {
        GitHubClient::remove_runner(self, label).await
    }
}

/// Bounded deadline poll.
///
/// Probes at a fixed interval until the probe yields a value or the next
/// probe would land past the deadline. The interval is injectable so tests
/// can run the loop with zero real delay.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if let Some(found) = probe().await? {
            return Ok(found);
        }
        if Instant::now() + interval >= deadline {
            return Err(Error::WaitTimeout {
                what: what.to_string(),
                attempts,
            });
        }
        sleep(interval).await;
    }
}
