use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use log::{debug, info, warn};

use crate::config::GitLabConfig;
use crate::error::{HostError, HostResult};
use crate::host::{
    DownstreamBuild, ExecutionEngine, HostBuild, HostJob, HostParameter, HostTestCase,
    HostTestReport, JobStore, ServerIdentity, SubmitAck,
};
use crate::models::{ParameterValue, ProxyConfiguration};

use super::client::{GitLabClient, RetryPolicy, PAGE_SIZE};
use super::types::{
    CreatePipelineRequest, GitLabBridge, GitLabPipeline, GitLabProject, GitLabTestReport,
    GitLabVariable, GitLabVersion, PipelineVariable,
};

/// GitLab host adapter.
///
/// Projects are exposed as jobs (keyed by their full path) and pipelines as
/// builds. The static downstream structure of a project is taken from the
/// trigger jobs of its latest default-branch pipeline.
pub struct GitLabHost {
    client: GitLabClient,
    config: GitLabConfig,
    project_paths: Mutex<HashMap<u64, String>>,
}

impl GitLabHost {
    pub fn new(config: GitLabConfig, proxy: Option<&ProxyConfiguration>) -> HostResult<Self> {
        let retry = RetryPolicy {
            max_retries: config.max_retries,
            delay: Duration::from_secs(config.retry_delay_secs),
        };
        let client = GitLabClient::new(&config.base_url, config.token.clone(), proxy, retry)?;

        Ok(Self {
            client,
            config,
            project_paths: Mutex::new(HashMap::new()),
        })
    }

    async fn project(&self, job_id: &str) -> HostResult<Option<GitLabProject>> {
        let project: Option<GitLabProject> = self
            .client
            .get_optional(&GitLabClient::project_path(job_id), &[])
            .await?;

        if let Some(project) = &project {
            self.remember_path(project);
        }
        Ok(project)
    }

    fn remember_path(&self, project: &GitLabProject) {
        self.project_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project.id, project.path_with_namespace.clone());
    }

    /// Full path of a project id, as seen on downstream pipeline records.
    async fn path_of(&self, project_id: u64) -> HostResult<Option<String>> {
        let cached = self
            .project_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&project_id)
            .cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        Ok(self
            .project(&project_id.to_string())
            .await?
            .map(|project| project.path_with_namespace))
    }

    async fn bridges(&self, job_id: &str, pipeline_id: u64) -> HostResult<Vec<GitLabBridge>> {
        let path = format!(
            "{}/pipelines/{pipeline_id}/bridges",
            GitLabClient::project_path(job_id)
        );
        self.client.get_all_pages(&path, &[]).await
    }

    /// Downstream builds triggered by a pipeline, in bridge order.
    async fn downstream_of(&self, job_id: &str, pipeline_id: u64) -> HostResult<Vec<DownstreamBuild>> {
        let triggered = self
            .bridges(job_id, pipeline_id)
            .await?
            .into_iter()
            .filter_map(|bridge| bridge.downstream_pipeline);

        let resolved = try_join_all(triggered.map(|pipeline| async move {
            let path = self.path_of(pipeline.project_id).await?;
            Ok::<_, HostError>(path.map(|job_id| DownstreamBuild {
                job_id,
                build_id: Some(pipeline.id.to_string()),
            }))
        }))
        .await?;

        Ok(resolved.into_iter().flatten().collect())
    }

    async fn all_member_projects(&self) -> HostResult<Vec<GitLabProject>> {
        self.client
            .get_all_pages(
                "projects",
                &[
                    ("membership", "true".to_string()),
                    ("simple", "true".to_string()),
                    ("order_by", "id".to_string()),
                    ("sort", "asc".to_string()),
                ],
            )
            .await
    }

    /// Branch new pipelines run on: the project's default branch, else the
    /// configured ref.
    fn run_ref(&self, project: &GitLabProject) -> String {
        project
            .default_branch
            .clone()
            .unwrap_or_else(|| self.config.default_ref.clone())
    }
}

fn to_host_job(project: GitLabProject, downstream: Vec<String>) -> HostJob {
    HostJob {
        id: project.path_with_namespace,
        name: project.name,
        downstream,
    }
}

fn to_host_build(pipeline: GitLabPipeline, downstream: Vec<DownstreamBuild>) -> HostBuild {
    HostBuild {
        id: pipeline.id.to_string(),
        number: pipeline.iid,
        status: pipeline.status,
        // Pending pipelines have a creation time but have not started
        started_at: pipeline.started_at,
        finished_at: pipeline.finished_at,
        downstream,
    }
}

fn to_host_parameter(variable: GitLabVariable) -> HostParameter {
    let kind = match variable.variable_type.as_deref() {
        Some("file") => "file",
        _ if variable.masked => "masked",
        _ => "string",
    };

    HostParameter {
        name: variable.key,
        kind: kind.to_string(),
        description: variable.description,
        default: variable.value,
        choices: vec![],
    }
}

fn to_host_report(report: GitLabTestReport) -> HostTestReport {
    let cases = report
        .test_suites
        .into_iter()
        .flat_map(|suite| {
            let suite_name = suite.name;
            suite.test_cases.into_iter().map(move |case| HostTestCase {
                suite: suite_name.clone(),
                class_name: case.classname.unwrap_or_default(),
                name: case.name,
                status: case.status,
                duration_secs: case.execution_time.unwrap_or_default(),
                message: case.system_output,
                stack_trace: case.stack_trace,
            })
        })
        .collect();

    HostTestReport {
        started_at: None,
        cases,
    }
}

#[async_trait]
impl JobStore for GitLabHost {
    async fn server_identity(&self) -> HostResult<Option<ServerIdentity>> {
        let version = match self.client.get::<GitLabVersion>("version", &[]).await {
            Ok(version) => version,
            Err(HostError::Api {
                status: 401 | 403, ..
            }) => {
                warn!("GitLab rejected the token; server identity unavailable");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(Some(ServerIdentity {
            server_type: "gitlab".to_string(),
            version: version.version,
            url: self.config.base_url.clone(),
            instance_id: self.config.instance_id.clone(),
        }))
    }

    async fn list_jobs(&self) -> HostResult<Vec<HostJob>> {
        let projects = if self.config.projects.is_empty() {
            self.all_member_projects().await?
        } else {
            let lookups = self.config.projects.iter().map(|path| self.project(path));
            let found = try_join_all(lookups).await?;

            self.config
                .projects
                .iter()
                .zip(found)
                .filter_map(|(path, project)| {
                    if project.is_none() {
                        warn!("Configured project {path} not found on GitLab, skipping");
                    }
                    project
                })
                .collect()
        };

        info!("Found {} GitLab projects", projects.len());

        Ok(projects
            .into_iter()
            .map(|project| to_host_job(project, vec![]))
            .collect())
    }

    async fn job(&self, job_id: &str) -> HostResult<Option<HostJob>> {
        let Some(project) = self.project(job_id).await? else {
            return Ok(None);
        };

        let ref_ = self.run_ref(&project);
        let latest: Vec<GitLabPipeline> = self
            .client
            .get(
                &format!("{}/pipelines", GitLabClient::project_path(job_id)),
                &[("ref", ref_), ("per_page", "1".to_string())],
            )
            .await?;

        let mut downstream: Vec<String> = Vec::new();
        if let Some(pipeline) = latest.first() {
            for build in self.downstream_of(job_id, pipeline.id).await? {
                if !downstream.contains(&build.job_id) {
                    downstream.push(build.job_id);
                }
            }
        }

        debug!("Project {job_id} triggers {} downstream projects", downstream.len());

        Ok(Some(to_host_job(project, downstream)))
    }

    async fn parameters(&self, job_id: &str) -> HostResult<Vec<HostParameter>> {
        let path = format!("{}/variables", GitLabClient::project_path(job_id));
        let variables: Vec<GitLabVariable> = match self.client.get_all_pages(&path, &[]).await {
            Ok(variables) => variables,
            // Variables need maintainer access
            Err(HostError::Api { status: 403, .. }) => {
                debug!("No access to variables of {job_id}");
                return Ok(vec![]);
            }
            Err(e) => return Err(e),
        };

        Ok(variables.into_iter().map(to_host_parameter).collect())
    }

    async fn builds(&self, job_id: &str, limit: usize) -> HostResult<Vec<HostBuild>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let pipelines: Vec<GitLabPipeline> = self
            .client
            .get(
                &format!("{}/pipelines", GitLabClient::project_path(job_id)),
                &[
                    ("order_by", "id".to_string()),
                    ("sort", "desc".to_string()),
                    ("per_page", limit.min(PAGE_SIZE).to_string()),
                ],
            )
            .await?;

        Ok(pipelines
            .into_iter()
            .take(limit)
            .map(|pipeline| to_host_build(pipeline, vec![]))
            .collect())
    }

    async fn build(&self, job_id: &str, build_id: &str) -> HostResult<Option<HostBuild>> {
        let Ok(pipeline_id) = build_id.parse::<u64>() else {
            debug!("{build_id} is not a GitLab pipeline id");
            return Ok(None);
        };

        let path = format!("{}/pipelines/{pipeline_id}", GitLabClient::project_path(job_id));
        let Some(pipeline) = self.client.get_optional::<GitLabPipeline>(&path, &[]).await? else {
            return Ok(None);
        };

        let downstream = self.downstream_of(job_id, pipeline_id).await?;
        Ok(Some(to_host_build(pipeline, downstream)))
    }

    async fn test_report(
        &self,
        job_id: &str,
        build_id: &str,
    ) -> HostResult<Option<HostTestReport>> {
        let Ok(pipeline_id) = build_id.parse::<u64>() else {
            return Ok(None);
        };

        let path = format!(
            "{}/pipelines/{pipeline_id}/test_report",
            GitLabClient::project_path(job_id)
        );
        let report = self.client.get_optional::<GitLabTestReport>(&path, &[]).await?;

        Ok(report
            .filter(|report| report.total_count > 0)
            .map(to_host_report))
    }
}

#[async_trait]
impl ExecutionEngine for GitLabHost {
    async fn submit(&self, job_id: &str, parameters: &[ParameterValue]) -> HostResult<SubmitAck> {
        let Some(project) = self.project(job_id).await? else {
            return Err(HostError::Api {
                status: 404,
                message: format!("project {job_id} not found"),
            });
        };

        let ref_ = self.run_ref(&project);
        let request = CreatePipelineRequest {
            ref_: &ref_,
            variables: parameters
                .iter()
                .map(|p| PipelineVariable {
                    key: &p.name,
                    value: &p.value,
                })
                .collect(),
        };

        let path = format!("{}/pipeline", GitLabClient::project_path(job_id));
        let pipeline: GitLabPipeline = self.client.post(&path, &request).await?;

        info!("Created pipeline {} for {job_id}", pipeline.id);

        Ok(SubmitAck {
            build_id: Some(pipeline.id.to_string()),
        })
    }

    fn supports_concurrent_builds(&self, _job_id: &str) -> bool {
        self.config.allow_concurrent_runs
    }
}
