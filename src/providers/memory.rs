//! In-memory CI host.
//!
//! Backs the test suite and the `--fixture` mode of the CLI. State can be
//! assembled with the `with_*` builders or loaded from a YAML/JSON fixture.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use crate::error::{BridgeError, HostError, HostResult, Result};
use crate::host::{
    ConfigurationStore, ExecutionEngine, HostBuild, HostJob, HostParameter, HostTestReport,
    JobStore, ServerIdentity, SubmitAck,
};
use crate::models::{OctaneConfiguration, ParameterValue, ProxyConfiguration};

/// Fixture file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostFixture {
    #[serde(default)]
    pub server: Option<ServerIdentity>,
    #[serde(default)]
    pub concurrent_builds: bool,
    #[serde(default)]
    pub octane: Option<OctaneConfiguration>,
    #[serde(default)]
    pub proxy: Option<ProxyConfiguration>,
    #[serde(default)]
    pub storage: Option<PathBuf>,
    #[serde(default)]
    pub jobs: Vec<FixtureJob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FixtureJob {
    #[serde(flatten)]
    pub job: HostJob,
    #[serde(default)]
    pub parameters: Vec<HostParameter>,
    /// Oldest first.
    #[serde(default)]
    pub builds: Vec<FixtureBuild>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FixtureBuild {
    #[serde(flatten)]
    pub build: HostBuild,
    #[serde(default)]
    pub tests: Option<HostTestReport>,
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: Vec<HostJob>,
    parameters: HashMap<String, Vec<HostParameter>>,
    /// Per job, oldest first.
    builds: HashMap<String, Vec<HostBuild>>,
    reports: HashMap<(String, String), HostTestReport>,
    submissions: Vec<(String, Vec<ParameterValue>)>,
}

/// Thread-safe in-memory implementation of all three host collaborators.
#[derive(Debug)]
pub struct MemoryHost {
    identity: Option<ServerIdentity>,
    concurrent_builds: bool,
    latency: Option<Duration>,
    submit_delays: HashMap<String, Duration>,
    octane: Option<OctaneConfiguration>,
    proxy: Option<ProxyConfiguration>,
    storage: Option<PathBuf>,
    state: Mutex<MemoryState>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            identity: Some(ServerIdentity {
                server_type: "memory".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                url: "memory://localhost".to_string(),
                instance_id: "memory".to_string(),
            }),
            concurrent_builds: false,
            latency: None,
            submit_delays: HashMap::new(),
            octane: None,
            proxy: None,
            storage: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn from_fixture(fixture: HostFixture) -> Self {
        let mut host = Self::new();
        if fixture.server.is_some() {
            host.identity = fixture.server;
        }
        host.concurrent_builds = fixture.concurrent_builds;
        host.octane = fixture.octane;
        host.proxy = fixture.proxy;
        host.storage = fixture.storage;

        for entry in fixture.jobs {
            let job_id = entry.job.id.clone();
            host = host.with_job(entry.job);
            for param in entry.parameters {
                host = host.with_parameter(&job_id, param);
            }
            for build in entry.builds {
                let build_id = build.build.id.clone();
                host = host.with_build(&job_id, build.build);
                if let Some(report) = build.tests {
                    host = host.with_test_report(&job_id, &build_id, report);
                }
            }
        }

        host
    }

    /// Loads a fixture file; `.json` files are parsed as JSON, anything else
    /// as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;

        let fixture: HostFixture = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents).map_err(|e| {
                BridgeError::Configuration(format!(
                    "Failed to parse fixture {}: {e}",
                    path.display()
                ))
            })?,
        };

        debug!("Loaded {} fixture jobs from {}", fixture.jobs.len(), path.display());
        Ok(Self::from_fixture(fixture))
    }

    pub fn with_identity(mut self, identity: Option<ServerIdentity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_concurrent_builds(mut self, allowed: bool) -> Self {
        self.concurrent_builds = allowed;
        self
    }

    /// Delays every store read, to exercise timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delays acceptance of runs of one job, as a slow engine would.
    pub fn with_submit_delay(mut self, job_id: &str, delay: Duration) -> Self {
        self.submit_delays.insert(job_id.to_string(), delay);
        self
    }

    pub fn with_octane(mut self, octane: OctaneConfiguration) -> Self {
        self.octane = Some(octane);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfiguration) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_storage(mut self, dir: PathBuf) -> Self {
        self.storage = Some(dir);
        self
    }

    pub fn with_job(mut self, job: HostJob) -> Self {
        self.state_mut().jobs.push(job);
        self
    }

    pub fn with_parameter(mut self, job_id: &str, param: HostParameter) -> Self {
        self.state_mut()
            .parameters
            .entry(job_id.to_string())
            .or_default()
            .push(param);
        self
    }

    /// Appends a build; the last build added is the latest.
    pub fn with_build(mut self, job_id: &str, build: HostBuild) -> Self {
        self.state_mut()
            .builds
            .entry(job_id.to_string())
            .or_default()
            .push(build);
        self
    }

    pub fn with_test_report(mut self, job_id: &str, build_id: &str, report: HostTestReport) -> Self {
        self.state_mut()
            .reports
            .insert((job_id.to_string(), build_id.to_string()), report);
        self
    }

    /// Runs accepted by [`ExecutionEngine::submit`], in order.
    pub fn submissions(&self) -> Vec<(String, Vec<ParameterValue>)> {
        self.state().submissions.clone()
    }

    /// Replaces the status of an existing build, as the host engine would
    /// while it progresses.
    pub fn set_build_status(&self, job_id: &str, build_id: &str, status: &str) {
        let mut state = self.state();
        if let Some(build) = state
            .builds
            .get_mut(job_id)
            .and_then(|builds| builds.iter_mut().find(|b| b.id == build_id))
        {
            build.status = status.to_string();
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut MemoryState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl JobStore for MemoryHost {
    async fn server_identity(&self) -> HostResult<Option<ServerIdentity>> {
        self.simulate_latency().await;
        Ok(self.identity.clone())
    }

    async fn list_jobs(&self) -> HostResult<Vec<HostJob>> {
        self.simulate_latency().await;
        Ok(self.state().jobs.clone())
    }

    async fn job(&self, job_id: &str) -> HostResult<Option<HostJob>> {
        self.simulate_latency().await;
        Ok(self.state().jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn parameters(&self, job_id: &str) -> HostResult<Vec<HostParameter>> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .parameters
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn builds(&self, job_id: &str, limit: usize) -> HostResult<Vec<HostBuild>> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .builds
            .get(job_id)
            .map(|builds| builds.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn build(&self, job_id: &str, build_id: &str) -> HostResult<Option<HostBuild>> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .builds
            .get(job_id)
            .and_then(|builds| builds.iter().find(|b| b.id == build_id).cloned()))
    }

    async fn test_report(
        &self,
        job_id: &str,
        build_id: &str,
    ) -> HostResult<Option<HostTestReport>> {
        self.simulate_latency().await;
        Ok(self
            .state()
            .reports
            .get(&(job_id.to_string(), build_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl ExecutionEngine for MemoryHost {
    async fn submit(&self, job_id: &str, parameters: &[ParameterValue]) -> HostResult<SubmitAck> {
        if let Some(delay) = self.submit_delays.get(job_id) {
            tokio::time::sleep(*delay).await;
        }

        let mut state = self.state();
        if !state.jobs.iter().any(|j| j.id == job_id) {
            return Err(HostError::Api {
                status: 404,
                message: format!("no job {job_id}"),
            });
        }

        let builds = state.builds.entry(job_id.to_string()).or_default();
        let number = builds.iter().filter_map(|b| b.number).max().unwrap_or(0) + 1;
        let build_id = number.to_string();
        builds.push(HostBuild {
            id: build_id.clone(),
            number: Some(number),
            status: "queued".to_string(),
            started_at: None,
            finished_at: None,
            downstream: vec![],
        });
        state
            .submissions
            .push((job_id.to_string(), parameters.to_vec()));

        Ok(SubmitAck {
            build_id: Some(build_id),
        })
    }

    fn supports_concurrent_builds(&self, _job_id: &str) -> bool {
        self.concurrent_builds
    }
}

impl ConfigurationStore for MemoryHost {
    fn allowed_storage(&self) -> Option<PathBuf> {
        self.storage.clone()
    }

    fn octane_configuration(&self) -> Option<OctaneConfiguration> {
        self.octane.clone()
    }

    fn proxy_configuration(&self, _target_host: &str) -> Option<ProxyConfiguration> {
        self.proxy.clone()
    }
}
