//! Configuration loading and validation.
//!
//! Settings merge from two layers, later layers winning:
//!
//! 1. A TOML file, when one is supplied
//! 2. Environment variables prefixed `FORGE_`, with `__` separating
//!    nesting levels (e.g. `FORGE_GITHUB__TOKEN`, `FORGE_AWS__IMAGE_ID`)
//!
//! `GH_PAT` is honored as a fallback for the GitHub token when no value
//! arrives through the layers above.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable prefix for all settings.
const ENV_PREFIX: &str = "FORGE_";

/// Conventional token variable honored as a fallback.
const TOKEN_FALLBACK_VAR: &str = "GH_PAT";

fn default_provider() -> String {
    "aws".to_string()
}

fn default_count() -> usize {
    1
}

fn default_timeout() -> u64 {
    1200
}

fn default_platform() -> String {
    "linux".to_string()
}

fn default_architecture() -> String {
    "x64".to_string()
}

fn default_home_dir() -> String {
    "/home/ec2-user".to_string()
}

/// GitHub access settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// Personal access token with repo administration scope.
    pub token: String,

    /// Repository full name, "owner/repo".
    pub repo: String,
}

/// Runner batch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// How many runner instances to launch.
    pub count: usize,

    /// Seconds to wait for each runner to register.
    pub timeout: u64,

    /// Runner agent platform ("linux", "win", "osx").
    pub platform: String,

    /// Runner agent architecture ("x64", "arm", "arm64").
    pub architecture: String,

    /// Home directory of the instance user the runner installs under.
    pub home_dir: String,

    /// Labels applied to every runner, in addition to the generated
    /// per-instance label.
    pub extra_labels: Vec<String>,

    /// Shell script sourced on the instance before the runner starts.
    pub pre_runner_script: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            timeout: default_timeout(),
            platform: default_platform(),
            architecture: default_architecture(),
            home_dir: default_home_dir(),
            extra_labels: Vec::new(),
            pre_runner_script: String::new(),
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GithubConfig,

    /// Cloud provider key. Only "aws" is currently registered.
    pub provider: String,

    pub runner: RunnerConfig,

    pub aws: crate::provider::aws::AwsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github: GithubConfig::default(),
            provider: default_provider(),
            runner: RunnerConfig::default(),
            aws: crate::provider::aws::AwsConfig::default(),
        }
    }
}

impl Config {
    /// Load settings from an optional TOML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment
            .extract()
            .map_err(|e| Error::Validation(e.to_string()))?;
        apply_token_fallback(&mut config, std::env::var(TOKEN_FALLBACK_VAR).ok());
        Ok(config)
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.github.token.is_empty() {
            return Err(Error::Validation(
                "no GitHub token (set github.token, FORGE_GITHUB__TOKEN or GH_PAT)".to_string(),
            ));
        }
        if self.github.repo.is_empty() {
            return Err(Error::Validation(
                "no repository (set github.repo, e.g. \"owner/repo\")".to_string(),
            ));
        }
        if !self.github.repo.contains('/') {
            return Err(Error::Validation(format!(
                "repository '{}' is not of the form owner/repo",
                self.github.repo
            )));
        }
        if self.runner.count == 0 {
            return Err(Error::Validation(
                "runner.count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Annotated configuration template emitted by `init-config`.
pub fn default_config_template() -> &'static str {
    r#"# runner-forge configuration

# Cloud provider key. Only "aws" is currently registered.
provider = "aws"

[github]
# Personal access token with repo administration scope.
# Can also come from FORGE_GITHUB__TOKEN or GH_PAT.
token = ""
# Repository the runners attach to, "owner/repo".
repo = ""

[runner]
# How many runner instances to launch.
count = 1
# Seconds to wait for each runner to register.
timeout = 1200
# Runner agent target: linux/x64, linux/arm, linux/arm64,
# win/x64, win/arm64, osx/x64, osx/arm64.
platform = "linux"
architecture = "x64"
# Home directory of the instance user the runner installs under.
home_dir = "/home/ec2-user"
# Labels applied to every runner, in addition to the generated
# per-instance label.
extra_labels = []
# Shell script sourced on the instance before the runner starts.
pre_runner_script = ""

[aws]
image_id = ""
instance_type = ""
# Optional. When empty, the ambient AWS environment decides.
region = ""
subnet_id = ""
security_group_id = ""
iam_role = ""
# Tags applied to every launched instance.
# tags = [{ Key = "Team", Value = "ci" }]
tags = []
"#
}

/// Fill in the GitHub token from the fallback variable when the layered
/// sources left it empty.
fn apply_token_fallback(config: &mut Config, fallback: Option<String>) {
    if config.github.token.is_empty()
        && let Some(token) = fallback
        && !token.is_empty()
    {
        config.github.token = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Toml;

    fn from_toml(toml: &str) -> Config {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("");
        assert_eq!(config.provider, "aws");
        assert_eq!(config.runner.count, 1);
        assert_eq!(config.runner.timeout, 1200);
        assert_eq!(config.runner.platform, "linux");
        assert_eq!(config.runner.architecture, "x64");
        assert_eq!(config.runner.home_dir, "/home/ec2-user");
        assert!(config.runner.extra_labels.is_empty());
    }

    #[test]
    fn test_full_toml() {
        let config = from_toml(
            r#"
            provider = "aws"

            [github]
            token = "ghp_test"
            repo = "owner/repo"

            [runner]
            count = 3
            timeout = 600
            extra_labels = ["gpu"]

            [aws]
            image_id = "ami-0123456789abcdef0"
            instance_type = "t3.medium"
            region = "us-east-1"
            tags = [{ Key = "Team", Value = "ci" }]
            "#,
        );
        assert_eq!(config.github.repo, "owner/repo");
        assert_eq!(config.runner.count, 3);
        assert_eq!(config.runner.extra_labels, vec!["gpu".to_string()]);
        assert_eq!(config.aws.region, "us-east-1");
        assert_eq!(config.aws.tags[0].key, "Team");
        config.validate().unwrap();
    }

    #[test]
    fn test_token_fallback_applies_only_when_unset() {
        let mut config = Config::default();
        apply_token_fallback(&mut config, Some("fallback".to_string()));
        assert_eq!(config.github.token, "fallback");

        let mut config = Config::default();
        config.github.token = "explicit".to_string();
        apply_token_fallback(&mut config, Some("fallback".to_string()));
        assert_eq!(config.github.token, "explicit");

        let mut config = Config::default();
        apply_token_fallback(&mut config, None);
        assert!(config.github.token.is_empty());
    }

    #[test]
    fn test_default_config_template_parses() {
        let config = from_toml(default_config_template());
        assert_eq!(config.provider, "aws");
        assert_eq!(config.runner.count, 1);
        assert!(config.aws.tags.is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        config.github.token = "ghp_test".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("repository"));

        config.github.repo = "not-a-full-name".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("owner/repo"));

        config.github.repo = "owner/repo".to_string();
        config.runner.count = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("count"));
    }
}
