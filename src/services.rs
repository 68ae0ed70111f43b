//! The plugin contract a CI host runtime calls into.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    BuildHistory, JobsList, OctaneConfiguration, PipelineNode, PluginInfo, ProxyConfiguration,
    RunReceipt, RunRequest, ServerInfo, SnapshotNode, TestsResult,
};

/// One method per plugin operation.
///
/// Reads are idempotent and safe to retry. Configuration getters and
/// [`CiPluginServices::tests_result`] report absence as `None`; every
/// other operation either returns a value or fails with a typed error.
#[async_trait]
pub trait CiPluginServices: Send + Sync {
    /// Fails with `Configuration` when the host cannot identify itself.
    async fn server_info(&self) -> Result<ServerInfo>;

    fn plugin_info(&self) -> PluginInfo;

    fn allowed_storage(&self) -> Option<PathBuf>;

    fn octane_configuration(&self) -> Option<OctaneConfiguration>;

    fn proxy_configuration(&self, target_host: &str) -> Option<ProxyConfiguration>;

    async fn jobs_list(&self, include_parameters: bool) -> Result<JobsList>;

    async fn pipeline(&self, job_id: &str) -> Result<PipelineNode>;

    /// Returns once the host has accepted the run.
    async fn run_pipeline(&self, job_id: &str, request: RunRequest) -> Result<RunReceipt>;

    /// Same as [`CiPluginServices::run_pipeline`] with an opaque JSON body.
    async fn run_pipeline_legacy(&self, job_id: &str, body: &str) -> Result<RunReceipt>;

    async fn snapshot_latest(&self, job_id: &str, sub_tree: bool) -> Result<SnapshotNode>;

    async fn snapshot_by_number(
        &self,
        job_id: &str,
        build_id: &str,
        sub_tree: bool,
    ) -> Result<SnapshotNode>;

    async fn history_pipeline(&self, job_id: &str, body: &str) -> Result<BuildHistory>;

    async fn tests_result(&self, job_id: &str, build_id: &str) -> Result<Option<TestsResult>>;
}
