//! GitLab REST v4 payloads used by the host adapter.
//!
//! Only the fields the adapter reads are declared; GitLab sends many more.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabVersion {
    pub version: String,
}

/// A GitLab project, exposed to Octane as a job.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabProject {
    pub id: u64,
    pub name: String,
    /// Full path (e.g., "group/project"), used as the job id
    pub path_with_namespace: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// A pipeline as returned by both the list and the single-pipeline
/// endpoints. Timing fields are only present on the latter.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabPipeline {
    pub id: u64,
    #[serde(default)]
    pub iid: Option<u64>,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Trigger job that starts a pipeline in another project.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabBridge {
    #[serde(default)]
    pub downstream_pipeline: Option<GitLabDownstreamPipeline>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabDownstreamPipeline {
    pub id: u64,
    pub project_id: u64,
}

/// Project-level CI/CD variable.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabVariable {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub variable_type: Option<String>,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabTestReport {
    pub total_count: u64,
    #[serde(default)]
    pub test_suites: Vec<GitLabTestSuite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabTestSuite {
    pub name: String,
    #[serde(default)]
    pub test_cases: Vec<GitLabTestCase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabTestCase {
    pub status: String,
    pub name: String,
    #[serde(default)]
    pub classname: Option<String>,
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub system_output: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePipelineRequest<'a> {
    #[serde(rename = "ref")]
    pub ref_: &'a str,
    pub variables: Vec<PipelineVariable<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineVariable<'a> {
    pub key: &'a str,
    pub value: &'a str,
}
