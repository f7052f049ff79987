//! Bootstrap payload rendering.
//!
//! Fills the embedded user-data shell template with per-instance runtime
//! parameters. The boot environment executes these lines literally, so the
//! output must stay byte-exact modulo the substituted values, and rendering
//! fails closed: a partially filled script is never handed to an instance.

use crate::error::{Error, Result};

/// Shell script template executed by an instance at boot.
const USER_DATA_TEMPLATE: &str = include_str!("templates/user-data.sh");

/// Per-instance parameters for the bootstrap script.
///
/// Every field except `script` is mandatory; `script` may be empty, which
/// makes the sourced pre-runner step a no-op.
#[derive(Debug, Clone, Default)]
pub struct BootstrapParams {
    /// Working directory the runner agent is installed into.
    pub home_dir: String,
    /// Repository the runner registers against, as "owner/repo".
    pub repo: String,
    /// One-time registration token minted for this instance.
    pub token: String,
    /// Download URL of the runner agent archive.
    pub runner_release: String,
    /// Comma-joined label list, including the generated per-instance label.
    pub labels: String,
    /// Optional script body sourced before the agent is configured.
    pub script: String,
}

impl BootstrapParams {
    /// Value for a template placeholder; `None` marks a mandatory value
    /// that was left empty.
    fn value_of(&self, placeholder: &str) -> Option<&str> {
        let (value, mandatory) = match placeholder {
            "homedir" => (self.home_dir.as_str(), true),
            "repo" => (self.repo.as_str(), true),
            "token" => (self.token.as_str(), true),
            "runner_release" => (self.runner_release.as_str(), true),
            "labels" => (self.labels.as_str(), true),
            "script" => (self.script.as_str(), false),
            _ => return None,
        };
        if mandatory && value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// Render the bootstrap script for one instance.
///
/// Pure and deterministic. Fails with [`Error::Template`] if any placeholder
/// in the template has no supplied value.
pub fn render(params: &BootstrapParams) -> Result<String> {
    render_template(USER_DATA_TEMPLATE, params)
}

/// Single-pass substitution of `$name` placeholders.
///
/// Substituted values are emitted verbatim and never re-scanned, so a
/// pre-runner script containing `$token`-like text cannot be rewritten.
fn render_template(template: &str, params: &BootstrapParams) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let name_len = after
            .bytes()
            .take_while(|b| b.is_ascii_lowercase() || *b == b'_')
            .count();
        if name_len == 0 {
            out.push('$');
            rest = after;
            continue;
        }
        let name = &after[..name_len];
        let value = params.value_of(name).ok_or_else(|| {
            Error::Template(format!("no value supplied for placeholder '${name}'"))
        })?;
        out.push_str(value);
        rest = &after[name_len..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> BootstrapParams {
        BootstrapParams {
            home_dir: "/home/ec2-user".to_string(),
            repo: "omsf-eco-infra/awsinfratesting".to_string(),
            token: "test".to_string(),
            runner_release: "test.tar.gz".to_string(),
            labels: "label".to_string(),
            script: "echo 'Hello, World!'".to_string(),
        }
    }

    #[test]
    fn test_render_full_script() {
        let expected = "\
#!/bin/bash
cd \"/home/ec2-user\"
echo \"echo 'Hello, World!'\" > pre-runner-script.sh
source pre-runner-script.sh
export RUNNER_ALLOW_RUNASROOT=1
curl -L test.tar.gz -o runner.tar.gz
tar xzf runner.tar.gz
./config.sh --url https://github.com/omsf-eco-infra/awsinfratesting --token test --labels label --ephemeral
./run.sh
";
        assert_eq!(render(&params()).unwrap(), expected);
    }

    #[test]
    fn test_render_deterministic() {
        let p = params();
        assert_eq!(render(&p).unwrap(), render(&p).unwrap());
    }

    #[test]
    fn test_render_empty_script_allowed() {
        let mut p = params();
        p.script = String::new();
        let script = render(&p).unwrap();
        assert!(script.contains("echo \"\" > pre-runner-script.sh"));
    }

    #[test]
    fn test_render_missing_mandatory_fields() {
        for field in ["home_dir", "repo", "token", "runner_release", "labels"] {
            let mut p = params();
            match field {
                "home_dir" => p.home_dir = String::new(),
                "repo" => p.repo = String::new(),
                "token" => p.token = String::new(),
                "runner_release" => p.runner_release = String::new(),
                "labels" => p.labels = String::new(),
                _ => unreachable!(),
            }
            let err = render(&p).unwrap_err();
            assert!(
                matches!(err, Error::Template(_)),
                "expected Template error for empty {field}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_unknown_placeholder_fails_closed() {
        let err = render_template("echo $does_not_exist", &params()).unwrap_err();
        assert!(err.to_string().contains("does_not_exist"));
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let mut p = params();
        p.script = "echo $token".to_string();
        let script = render(&p).unwrap();
        // The literal script body survives; only the config.sh line carries
        // the real token.
        assert!(script.contains("echo \"echo $token\" > pre-runner-script.sh"));
    }
}
