//! The instance-id to runner-label correlation artifact.
//!
//! A `start` invocation creates one mapping entry per launched instance and
//! hands the whole mapping to the persistence boundary: a single
//! `mapping=<json>` line appended to the workflow output channel (the file
//! named by `GITHUB_OUTPUT`). The later `stop` invocation is a separate
//! process and reconstructs the mapping by parsing that file. This is the
//! only state that crosses the start/stop boundary, so the line format must
//! stay byte-compatible across versions.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Key under which the mapping is written to the output channel.
pub const MAPPING_OUTPUT_KEY: &str = "mapping";

/// Mapping from cloud instance id to the runner label it was bootstrapped
/// with. One entry per instance created in a single `start` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceMapping(BTreeMap<String, String>);

impl InstanceMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a launched instance and the label its bootstrap registers.
    pub fn insert(&mut self, instance_id: String, label: String) {
        self.0.insert(instance_id, label);
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.0.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Mapping(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Mapping(e.to_string()))
    }

    /// Append the mapping to the output channel as a `mapping=<json>` line.
    pub fn append_output(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{MAPPING_OUTPUT_KEY}={json}")?;
        debug!("Persisted {} instance mapping entries to {}", self.len(), path.display());
        Ok(())
    }

    /// Reconstruct the mapping from the output channel.
    ///
    /// The last `mapping=` line wins, matching append semantics.
    pub fn read_output(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Mapping(format!("cannot read {}: {e}", path.display())))?;
        let line = content
            .lines()
            .rev()
            .find_map(|l| l.strip_prefix(&format!("{MAPPING_OUTPUT_KEY}=")))
            .ok_or_else(|| {
                Error::Mapping(format!(
                    "no '{MAPPING_OUTPUT_KEY}' entry in {}",
                    path.display()
                ))
            })?;
        Self::from_json(line)
    }
}

impl FromIterator<(String, String)> for InstanceMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> InstanceMapping {
        [
            ("i-0abc".to_string(), "runner-aaaa1111".to_string()),
            ("i-0def".to_string(), "runner-bbbb2222".to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_json_round_trip() {
        let mapping = sample();
        let json = mapping.to_json().unwrap();
        assert_eq!(InstanceMapping::from_json(&json).unwrap(), mapping);
    }

    #[test]
    fn test_output_channel_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        // The channel is shared with other writers; our line must survive
        // being surrounded by unrelated key=value lines.
        std::fs::write(&path, "other=1\n").unwrap();

        let mapping = sample();
        mapping.append_output(&path).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "trailing=2").unwrap();
        drop(file);

        assert_eq!(InstanceMapping::read_output(&path).unwrap(), mapping);
    }

    #[test]
    fn test_last_mapping_line_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");

        let mut first = InstanceMapping::new();
        first.insert("i-old".into(), "runner-old00000".into());
        first.append_output(&path).unwrap();

        let second = sample();
        second.append_output(&path).unwrap();

        assert_eq!(InstanceMapping::read_output(&path).unwrap(), second);
    }

    #[test]
    fn test_read_output_missing_file() {
        let err = InstanceMapping::read_output(Path::new("/nonexistent/output")).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
    }

    #[test]
    fn test_read_output_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        std::fs::write(&path, "unrelated=value\n").unwrap();
        let err = InstanceMapping::read_output(&path).unwrap_err();
        assert!(err.to_string().contains("no 'mapping' entry"));
    }

    #[test]
    fn test_read_output_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        std::fs::write(&path, "mapping=not-json\n").unwrap();
        assert!(matches!(
            InstanceMapping::read_output(&path).unwrap_err(),
            Error::Mapping(_)
        ));
    }
}
