use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use log::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::host::{HostBuild, HostJob, HostParameter, HostTestReport, JobStore};
use crate::models::{
    BuildContext, BuildHistory, BuildStatus, BuildSummary, HistoryQuery, Job, JobsList,
    ParameterDefinition, ParameterType, PipelineNode, PluginInfo, ServerInfo, TestRun,
    TestRunError, TestRunResult, TestsResult,
};

/// Converts host-native job, build and test records into the normalized
/// models.
///
/// Every method is a pure read against the [`JobStore`]; nothing is cached
/// between calls.
#[derive(Clone)]
pub struct ModelTranslator {
    store: Arc<dyn JobStore>,
    history_limit: usize,
}

impl ModelTranslator {
    pub fn new(store: Arc<dyn JobStore>, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
        }
    }

    /// Returns `None` when the host cannot identify itself yet.
    pub async fn server_info(&self) -> Result<Option<ServerInfo>> {
        let identity = self.store.server_identity().await?;

        Ok(identity.map(|identity| ServerInfo {
            server_type: identity.server_type,
            version: identity.version,
            url: identity.url,
            instance_id: identity.instance_id,
            sending_time: Utc::now(),
        }))
    }

    pub fn plugin_info(&self) -> PluginInfo {
        PluginInfo::current()
    }

    /// Lists every job visible to the integration.
    ///
    /// Parameter definitions are only fetched when `include_parameters` is
    /// set, one concurrent request per job.
    pub async fn jobs_list(&self, include_parameters: bool) -> Result<JobsList> {
        let host_jobs = self.store.list_jobs().await?;

        let mut seen = HashSet::new();
        let host_jobs: Vec<HostJob> = host_jobs
            .into_iter()
            .filter(|job| {
                let fresh = seen.insert(job.id.clone());
                if !fresh {
                    warn!("Host reported job {} more than once, keeping first", job.id);
                }
                fresh
            })
            .collect();

        let parameters = if include_parameters {
            let fetches = host_jobs.iter().map(|job| self.store.parameters(&job.id));
            try_join_all(fetches).await?
        } else {
            vec![Vec::new(); host_jobs.len()]
        };

        let jobs = host_jobs
            .into_iter()
            .zip(parameters)
            .map(|(job, params)| Job {
                job_ci_id: job.id,
                name: job.name,
                parameters: (include_parameters && !params.is_empty())
                    .then(|| params.into_iter().map(to_parameter_definition).collect()),
            })
            .collect::<Vec<_>>();

        info!("Translated {} jobs", jobs.len());

        Ok(JobsList { jobs })
    }

    pub async fn pipeline(&self, job_id: &str) -> Result<PipelineNode> {
        let graph = JobGraph::load(self.store.as_ref(), job_id, None).await?;
        Ok(graph.pipeline_tree())
    }

    pub async fn build_history(&self, job_id: &str, query: HistoryQuery) -> Result<BuildHistory> {
        if self.store.job(job_id).await?.is_none() {
            return Err(BridgeError::JobNotFound(job_id.to_string()));
        }

        let limit = query.limit.unwrap_or(self.history_limit);
        let builds = self.store.builds(job_id, limit).await?;

        let mut summaries: Vec<BuildSummary> = builds.iter().map(to_build_summary).collect();
        // Newest start first; builds that never started sort last.
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        summaries.truncate(limit);

        let last_build = summaries.first().cloned();
        let last_successful_build = summaries
            .iter()
            .find(|summary| summary.status == BuildStatus::Succeeded)
            .cloned();

        Ok(BuildHistory {
            job_ci_id: job_id.to_string(),
            builds: summaries,
            last_build,
            last_successful_build,
        })
    }

    /// Test report of one build; `None` when the host has none for it.
    /// Unknown jobs are `JobNotFound`.
    pub async fn tests_result(
        &self,
        job_id: &str,
        build_id: &str,
        server_id: Option<String>,
    ) -> Result<Option<TestsResult>> {
        if self.store.job(job_id).await?.is_none() {
            return Err(BridgeError::JobNotFound(job_id.to_string()));
        }

        let Some(report) = self.store.test_report(job_id, build_id).await? else {
            debug!("No test report for {job_id} #{build_id}");
            return Ok(None);
        };

        Ok(Some(to_tests_result(job_id, build_id, server_id, report)))
    }
}

/// Job definitions reachable from one root job, fetched once per call.
pub(crate) struct JobGraph {
    root: String,
    jobs: HashMap<String, Option<HostJob>>,
}

impl JobGraph {
    /// Loads the root job and its downstream jobs level by level.
    ///
    /// `max_depth` limits how many downstream levels are fetched; `None`
    /// fetches everything reachable. Every job is requested at most once,
    /// so cyclic configurations terminate.
    pub(crate) async fn load(
        store: &dyn JobStore,
        root: &str,
        max_depth: Option<usize>,
    ) -> Result<Self> {
        let root_job = store
            .job(root)
            .await?
            .ok_or_else(|| BridgeError::JobNotFound(root.to_string()))?;

        let mut jobs = HashMap::new();
        let mut frontier: Vec<String> = root_job.downstream.clone();
        jobs.insert(root.to_string(), Some(root_job));

        let mut depth = 0;
        while !frontier.is_empty() && max_depth.map_or(true, |max| depth < max) {
            let pending: Vec<String> = frontier
                .into_iter()
                .filter(|id| !jobs.contains_key(id))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();

            let fetched = try_join_all(pending.iter().map(|id| store.job(id))).await?;

            frontier = Vec::new();
            for (id, job) in pending.into_iter().zip(fetched) {
                if let Some(job) = &job {
                    frontier.extend(job.downstream.iter().cloned());
                } else {
                    warn!("Downstream job {id} is not known to the host, skipping");
                }
                jobs.insert(id, job);
            }
            depth += 1;
        }

        Ok(Self {
            root: root.to_string(),
            jobs,
        })
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    pub(crate) fn job(&self, id: &str) -> Option<&HostJob> {
        self.jobs.get(id).and_then(Option::as_ref)
    }

    /// Downstream jobs of `id` that the host knows about, in configured order.
    pub(crate) fn children(&self, id: &str) -> Vec<&HostJob> {
        self.job(id)
            .map(|job| {
                job.downstream
                    .iter()
                    .filter_map(|child| self.job(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn pipeline_tree(&self) -> PipelineNode {
        let mut path = Vec::new();
        self.pipeline_node(&self.root, &mut path)
    }

    fn pipeline_node<'a>(&'a self, id: &'a str, path: &mut Vec<&'a str>) -> PipelineNode {
        let name = self.job(id).map_or_else(|| id.to_string(), |job| job.name.clone());

        if path.contains(&id) {
            warn!("Cycle detected at job {id}, truncating branch");
            return PipelineNode {
                job_ci_id: id.to_string(),
                name,
                cyclic: true,
                children: vec![],
            };
        }

        path.push(id);
        let children = self
            .children(id)
            .into_iter()
            .map(|child| self.pipeline_node(&child.id, path))
            .collect();
        path.pop();

        PipelineNode {
            job_ci_id: id.to_string(),
            name,
            cyclic: false,
            children,
        }
    }
}

/// Normalizes a host status word, falling back to `not-run` for words the
/// bridge does not recognize.
pub(crate) fn normalize_status(raw: &str) -> BuildStatus {
    BuildStatus::from_host(raw).unwrap_or_else(|| {
        warn!("Unrecognized host build status '{raw}', reporting not-run");
        BuildStatus::NotRun
    })
}

pub(crate) fn duration_ms(
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> Option<i64> {
    match (started_at, finished_at) {
        (Some(start), Some(end)) if end >= start => Some((end - start).num_milliseconds()),
        _ => None,
    }
}

fn to_build_summary(build: &HostBuild) -> BuildSummary {
    BuildSummary {
        build_ci_id: build.id.clone(),
        number: build.number,
        status: normalize_status(&build.status),
        start_time: build.started_at,
        duration_ms: duration_ms(build.started_at, build.finished_at),
    }
}

fn to_parameter_type(param: &HostParameter) -> ParameterType {
    match param.kind.trim().to_ascii_lowercase().as_str() {
        "boolean" | "bool" => ParameterType::Boolean,
        "string" | "text" | "env_var" | "variable" => ParameterType::String,
        "number" | "integer" | "int" | "float" => ParameterType::Number,
        "password" | "secret" | "masked" => ParameterType::Password,
        "file" => ParameterType::File,
        "choice" | "select" | "enum" => ParameterType::Choice,
        _ if !param.choices.is_empty() => ParameterType::Choice,
        _ => ParameterType::Unknown,
    }
}

fn to_parameter_definition(param: HostParameter) -> ParameterDefinition {
    let param_type = to_parameter_type(&param);
    // Secrets never leave the host.
    let default_value = match param_type {
        ParameterType::Password => None,
        _ => param.default,
    };

    ParameterDefinition {
        name: param.name,
        param_type,
        description: param.description,
        default_value,
        choices: param.choices,
    }
}

fn to_test_result(status: &str) -> TestRunResult {
    match status.trim().to_ascii_lowercase().as_str() {
        "success" | "passed" | "pass" | "ok" => TestRunResult::Passed,
        "skipped" | "ignored" | "disabled" => TestRunResult::Skipped,
        _ => TestRunResult::Failed,
    }
}

fn to_tests_result(
    job_id: &str,
    build_id: &str,
    server_id: Option<String>,
    report: HostTestReport,
) -> TestsResult {
    let test_runs = report
        .cases
        .into_iter()
        .map(|case| {
            let result = to_test_result(&case.status);
            let package_name = case
                .class_name
                .rsplit_once('.')
                .map(|(package, _)| package.to_string())
                .unwrap_or_default();
            let class_name = case
                .class_name
                .rsplit_once('.')
                .map_or_else(|| case.class_name.clone(), |(_, class)| class.to_string());
            let error = (result == TestRunResult::Failed).then(|| TestRunError {
                error_type: case.status.to_ascii_lowercase(),
                message: case.message.unwrap_or_default(),
                stack_trace: case.stack_trace,
            });

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = (case.duration_secs * 1000.0).round() as i64;

            TestRun {
                module_name: case.suite,
                package_name,
                class_name,
                test_name: case.name,
                result,
                duration_ms,
                started_at: report.started_at,
                error,
            }
        })
        .collect();

    TestsResult {
        build_context: BuildContext {
            server_id,
            job_id: job_id.to_string(),
            build_id: build_id.to_string(),
        },
        test_runs,
    }
}
