//! Contract between the bridge core and a concrete CI host.
//!
//! A host adapter implements three collaborators:
//! - `JobStore`: read access to jobs, parameters, builds and test reports
//! - `ExecutionEngine`: the submit-run primitive
//! - `ConfigurationStore`: host-managed Octane, proxy and storage settings
//!
//! Records here are host-native: status is whatever word the host uses and
//! is normalized later by the translator.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HostResult;
use crate::models::{OctaneConfiguration, ParameterValue, ProxyConfiguration};

/// Identity of the running CI server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerIdentity {
    pub server_type: String,
    pub version: String,
    pub url: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostJob {
    pub id: String,
    pub name: String,
    /// Statically configured downstream job ids, in trigger order.
    #[serde(default)]
    pub downstream: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostParameter {
    pub name: String,
    /// Host type word, e.g. `string`, `boolean`, `env_var`, `file`.
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Reference from a build to a build it triggered downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownstreamBuild {
    pub job_id: String,
    #[serde(default)]
    pub build_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostBuild {
    pub id: String,
    #[serde(default)]
    pub number: Option<u64>,
    pub status: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downstream: Vec<DownstreamBuild>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostTestCase {
    #[serde(default)]
    pub suite: String,
    #[serde(default)]
    pub class_name: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostTestReport {
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cases: Vec<HostTestCase>,
}

/// What the execution engine hands back once a run is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitAck {
    pub build_id: Option<String>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// `None` while the host is not initialized enough to identify itself.
    async fn server_identity(&self) -> HostResult<Option<ServerIdentity>>;

    /// Every visible job. Records may leave `downstream` empty;
    /// [`JobStore::job`] returns the complete definition.
    async fn list_jobs(&self) -> HostResult<Vec<HostJob>>;

    async fn job(&self, job_id: &str) -> HostResult<Option<HostJob>>;

    async fn parameters(&self, job_id: &str) -> HostResult<Vec<HostParameter>>;

    /// Builds of a job, newest first. Records may leave `downstream` empty;
    /// [`JobStore::build`] returns the complete record.
    async fn builds(&self, job_id: &str, limit: usize) -> HostResult<Vec<HostBuild>>;

    async fn build(&self, job_id: &str, build_id: &str) -> HostResult<Option<HostBuild>>;

    /// `None` when the build has no test tooling or no report.
    async fn test_report(&self, job_id: &str, build_id: &str)
        -> HostResult<Option<HostTestReport>>;
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Returns once the host has accepted the run, not when it finishes.
    async fn submit(&self, job_id: &str, parameters: &[ParameterValue]) -> HostResult<SubmitAck>;

    /// Whether the host can run several instances of the job at once.
    fn supports_concurrent_builds(&self, job_id: &str) -> bool;
}

pub trait ConfigurationStore: Send + Sync {
    fn allowed_storage(&self) -> Option<PathBuf>;

    fn octane_configuration(&self) -> Option<OctaneConfiguration>;

    fn proxy_configuration(&self, target_host: &str) -> Option<ProxyConfiguration>;
}
