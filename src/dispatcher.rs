use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, HostError, Result};
use crate::host::{ConfigurationStore, ExecutionEngine, JobStore};
use crate::models::{
    BuildHistory, HistoryQuery, JobsList, OctaneConfiguration, PipelineNode, PluginInfo,
    ProxyConfiguration, RunReceipt, RunRequest, ServerInfo, SnapshotNode, TestsResult,
};
use crate::runner::PipelineRunner;
use crate::services::CiPluginServices;
use crate::snapshot::SnapshotResolver;
use crate::translator::ModelTranslator;

/// Entry point for every plugin operation.
///
/// Each call acquires a permit from a shared semaphore and runs under a
/// timeout that also covers the wait for the permit. Calls carry no state
/// between them, so one dispatcher can be shared behind an `Arc`.
pub struct Dispatcher {
    config_store: Arc<dyn ConfigurationStore>,
    translator: ModelTranslator,
    resolver: SnapshotResolver,
    runner: PipelineRunner,
    timeout: Duration,
    permits: Semaphore,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn ExecutionEngine>,
        config_store: Arc<dyn ConfigurationStore>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            config_store,
            translator: ModelTranslator::new(store.clone(), config.history_limit),
            resolver: SnapshotResolver::new(store.clone()),
            runner: PipelineRunner::new(store, engine, config.run_dedup_window()),
            timeout: config.operation_timeout(),
            permits: Semaphore::new(config.max_concurrent_operations.max(1)),
        }
    }

    /// Dispatcher over a host that implements all three collaborators.
    pub fn for_host<H>(host: Arc<H>, config: &BridgeConfig) -> Self
    where
        H: JobStore + ExecutionEngine + ConfigurationStore + 'static,
    {
        Self::new(host.clone(), host.clone(), host, config)
    }

    async fn guarded<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = tokio::time::timeout(self.timeout, async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| HostError::Unavailable("dispatcher is shut down".to_string()))?;
            work.await
        });

        match bounded.await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("{operation} did not complete within {:?}", self.timeout);
                Err(BridgeError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }
}

/// Decodes the legacy history body: empty, or `{"limit": N}`.
pub fn decode_history_body(body: &str) -> Result<HistoryQuery> {
    if body.trim().is_empty() {
        return Ok(HistoryQuery::default());
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| BridgeError::InvalidArgument(format!("history body is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(BridgeError::InvalidArgument(
            "history body must be a JSON object".to_string(),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| BridgeError::InvalidArgument(format!("invalid history query: {e}")))
}

#[async_trait]
impl CiPluginServices for Dispatcher {
    async fn server_info(&self) -> Result<ServerInfo> {
        self.guarded("server_info", async {
            self.translator.server_info().await?.ok_or_else(|| {
                BridgeError::Configuration("CI server has not reported its identity".to_string())
            })
        })
        .await
    }

    fn plugin_info(&self) -> PluginInfo {
        self.translator.plugin_info()
    }

    fn allowed_storage(&self) -> Option<PathBuf> {
        self.config_store.allowed_storage()
    }

    fn octane_configuration(&self) -> Option<OctaneConfiguration> {
        self.config_store.octane_configuration()
    }

    fn proxy_configuration(&self, target_host: &str) -> Option<ProxyConfiguration> {
        self.config_store.proxy_configuration(target_host)
    }

    async fn jobs_list(&self, include_parameters: bool) -> Result<JobsList> {
        self.guarded("jobs_list", self.translator.jobs_list(include_parameters))
            .await
    }

    async fn pipeline(&self, job_id: &str) -> Result<PipelineNode> {
        self.guarded("pipeline", self.translator.pipeline(job_id))
            .await
    }

    async fn run_pipeline(&self, job_id: &str, request: RunRequest) -> Result<RunReceipt> {
        self.guarded("run_pipeline", self.runner.run(job_id, request))
            .await
    }

    async fn run_pipeline_legacy(&self, job_id: &str, body: &str) -> Result<RunReceipt> {
        self.guarded("run_pipeline", self.runner.run_legacy(job_id, body))
            .await
    }

    async fn snapshot_latest(&self, job_id: &str, sub_tree: bool) -> Result<SnapshotNode> {
        self.guarded("snapshot_latest", self.resolver.latest(job_id, sub_tree))
            .await
    }

    async fn snapshot_by_number(
        &self,
        job_id: &str,
        build_id: &str,
        sub_tree: bool,
    ) -> Result<SnapshotNode> {
        self.guarded(
            "snapshot_by_number",
            self.resolver.by_number(job_id, build_id, sub_tree),
        )
        .await
    }

    async fn history_pipeline(&self, job_id: &str, body: &str) -> Result<BuildHistory> {
        let query = decode_history_body(body)?;
        self.guarded("history_pipeline", self.translator.build_history(job_id, query))
            .await
    }

    async fn tests_result(&self, job_id: &str, build_id: &str) -> Result<Option<TestsResult>> {
        self.guarded("tests_result", async {
            let server_id = self
                .translator
                .server_info()
                .await?
                .map(|info| info.instance_id);

            match self.translator.tests_result(job_id, build_id, server_id).await {
                Err(e) if e.is_not_found() => {
                    debug!("No tests for {job_id} #{build_id}: {e}");
                    Ok(None)
                }
                other => other,
            }
        })
        .await
    }
}
