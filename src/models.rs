//! Normalized entities that cross the plugin boundary.
//!
//! Nothing in here references a host-native record: adapters produce
//! [`crate::host`] types and the translator turns them into these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(rename = "type")]
    pub server_type: String,
    pub version: String,
    pub url: String,
    pub instance_id: String,
    pub sending_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub version: String,
}

impl PluginInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Connection parameters of the Octane server, owned by the host.
///
/// Serialized camelCase like every other contract type. Config files may
/// also spell the keys in kebab-case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OctaneConfiguration {
    pub url: String,
    #[serde(alias = "shared-space")]
    pub shared_space: String,
    #[serde(alias = "client-id")]
    pub client_id: String,
    #[serde(alias = "client-secret")]
    pub client_secret: String,
    #[serde(alias = "instance-id")]
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Boolean,
    String,
    Number,
    Password,
    File,
    Choice,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_ci_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterDefinition>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobsList {
    pub jobs: Vec<Job>,
}

/// Structural composition of a root job and its downstream jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    pub job_ci_id: String,
    pub name: String,
    /// Set when this job already appears higher on the same path; the branch
    /// is cut here.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cyclic: bool,
    #[serde(default)]
    pub children: Vec<PipelineNode>,
}

impl PipelineNode {
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }
}

/// Execution status of a build as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
    NotRun,
    Queued,
    Running,
    Succeeded,
    Failed,
    Aborted,
    Unstable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
    Success,
    Failure,
    Aborted,
    Unstable,
}

impl BuildStatus {
    /// Maps a host status word onto the normalized set.
    ///
    /// Accepts the vocabulary used by GitLab, GitHub Actions and Jenkins,
    /// case-insensitively and with `-`/` ` treated as `_`.
    pub fn from_host(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let status = match normalized.as_str() {
            "not_run" | "not_built" | "skipped" | "manual" | "never_run" => Self::NotRun,
            "queued" | "pending" | "created" | "scheduled" | "waiting"
            | "waiting_for_resource" | "preparing" | "requested" => Self::Queued,
            "running" | "in_progress" | "building" => Self::Running,
            "success" | "succeeded" | "successful" | "passed" => Self::Succeeded,
            "failed" | "failure" | "error" | "timed_out" => Self::Failed,
            "canceled" | "cancelled" | "canceling" | "aborted" | "stopped" => Self::Aborted,
            "unstable" => Self::Unstable,
            _ => return None,
        };
        Some(status)
    }

    pub fn result(self) -> Option<BuildResult> {
        match self {
            Self::Succeeded => Some(BuildResult::Success),
            Self::Failed => Some(BuildResult::Failure),
            Self::Aborted => Some(BuildResult::Aborted),
            Self::Unstable => Some(BuildResult::Unstable),
            Self::NotRun | Self::Queued | Self::Running => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRun => "not-run",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Unstable => "unstable",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`PipelineNode`] annotated with the execution state of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNode {
    pub job_ci_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_ci_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cyclic: bool,
    #[serde(default)]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    /// Returns this node with the execution details dropped, keeping only
    /// the structural part of the tree.
    pub fn structure(&self) -> PipelineNode {
        PipelineNode {
            job_ci_id: self.job_ci_id.clone(),
            name: self.name.clone(),
            cyclic: self.cyclic,
            children: self.children.iter().map(Self::structure).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub build_ci_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// Time-ordered digest of recent builds of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildHistory {
    pub job_ci_id: String,
    pub builds: Vec<BuildSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_build: Option<BuildSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_build: Option<BuildSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestRunResult {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRunError {
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub module_name: String,
    pub package_name: String,
    pub class_name: String,
    pub test_name: String,
    pub result: TestRunResult,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TestRunError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub job_id: String,
    pub build_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestsResult {
    pub build_context: BuildContext,
    pub test_runs: Vec<TestRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: String,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Structured input of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub parameters: Vec<ParameterValue>,
}

impl RunRequest {
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(ParameterValue::new(name, value));
        self
    }
}

/// Acknowledgment of a submitted (or deduplicated) pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReceipt {
    pub job_ci_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_ci_id: Option<String>,
    pub deduplicated: bool,
}

/// Decoded form of the legacy history request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_host_vocabulary() {
        assert_eq!(BuildStatus::from_host("SUCCESS"), Some(BuildStatus::Succeeded));
        assert_eq!(BuildStatus::from_host("in_progress"), Some(BuildStatus::Running));
        assert_eq!(BuildStatus::from_host("waiting-for-resource"), Some(BuildStatus::Queued));
        assert_eq!(BuildStatus::from_host("canceled"), Some(BuildStatus::Aborted));
        assert_eq!(BuildStatus::from_host("UNSTABLE"), Some(BuildStatus::Unstable));
        assert_eq!(BuildStatus::from_host("manual"), Some(BuildStatus::NotRun));
        assert_eq!(BuildStatus::from_host("mystery"), None);
    }

    #[test]
    fn test_result_only_for_finished_statuses() {
        assert_eq!(BuildStatus::Running.result(), None);
        assert_eq!(BuildStatus::Failed.result(), Some(BuildResult::Failure));
        assert_eq!(BuildStatus::Aborted.result(), Some(BuildResult::Aborted));
        assert_eq!(BuildStatus::Queued.result(), None);
    }

    #[test]
    fn test_octane_configuration_is_camel_case() {
        let octane = OctaneConfiguration {
            url: "https://octane.example.com".to_string(),
            shared_space: "1001".to_string(),
            client_id: "ci-bridge".to_string(),
            client_secret: "secret".to_string(),
            instance_id: "ci-01".to_string(),
        };

        let json = serde_json::to_value(&octane).unwrap();
        assert_eq!(json["sharedSpace"], "1001");
        assert_eq!(json["clientId"], "ci-bridge");
        assert!(json.get("shared-space").is_none());

        let kebab: OctaneConfiguration = serde_json::from_str(
            r#"{"url":"https://octane.example.com","shared-space":"1001","client-id":"ci-bridge","client-secret":"secret","instance-id":"ci-01"}"#,
        )
        .unwrap();
        assert_eq!(kebab, octane);
        assert_eq!(serde_json::from_value::<OctaneConfiguration>(json).unwrap(), octane);
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&BuildStatus::NotRun).unwrap();
        assert_eq!(json, "\"not-run\"");
    }

    #[test]
    fn test_snapshot_structure_drops_execution_details() {
        let snapshot = SnapshotNode {
            job_ci_id: "root".to_string(),
            name: "Root".to_string(),
            build_ci_id: Some("7".to_string()),
            number: Some(7),
            status: BuildStatus::Running,
            result: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
            cyclic: false,
            children: vec![],
        };

        let structure = snapshot.structure();
        assert_eq!(structure.job_ci_id, "root");
        assert_eq!(structure.node_count(), 1);
    }
}
