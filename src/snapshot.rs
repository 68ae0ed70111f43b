use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use log::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::host::{DownstreamBuild, HostBuild, JobStore};
use crate::models::{BuildStatus, SnapshotNode};
use crate::translator::{duration_ms, normalize_status, JobGraph};

/// Builds snapshot trees for one build of a root job.
///
/// The tree always follows the static pipeline structure of the root job:
/// child nodes are matched against the downstream builds the host reports
/// for their parent build, and static children that were never triggered
/// show up as `not-run`.
#[derive(Clone)]
pub struct SnapshotResolver {
    store: Arc<dyn JobStore>,
}

impl SnapshotResolver {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Snapshot of the most recent build, or a `not-run` tree when the job
    /// has never been built.
    pub async fn latest(&self, job_id: &str, sub_tree: bool) -> Result<SnapshotNode> {
        let graph = self.load_graph(job_id, sub_tree).await?;
        // List records may omit downstream builds; fetch the full record.
        let latest = match self.store.builds(job_id, 1).await?.into_iter().next() {
            Some(summary) => self.store.build(job_id, &summary.id).await?.or(Some(summary)),
            None => {
                debug!("Job {job_id} has no builds yet");
                None
            }
        };

        self.resolve(&graph, latest, sub_tree).await
    }

    pub async fn by_number(
        &self,
        job_id: &str,
        build_id: &str,
        sub_tree: bool,
    ) -> Result<SnapshotNode> {
        let graph = self.load_graph(job_id, sub_tree).await?;
        let build = self
            .store
            .build(job_id, build_id)
            .await?
            .ok_or_else(|| BridgeError::BuildNotFound {
                job_id: job_id.to_string(),
                build_id: build_id.to_string(),
            })?;

        self.resolve(&graph, Some(build), sub_tree).await
    }

    async fn load_graph(&self, job_id: &str, sub_tree: bool) -> Result<JobGraph> {
        let max_depth = sub_tree.then_some(1);
        JobGraph::load(self.store.as_ref(), job_id, max_depth).await
    }

    async fn resolve(
        &self,
        graph: &JobGraph,
        build: Option<HostBuild>,
        sub_tree: bool,
    ) -> Result<SnapshotNode> {
        let depth = sub_tree.then_some(1);
        self.snapshot_node(graph, graph.root(), build, Vec::new(), depth)
            .await
    }

    fn snapshot_node<'a>(
        &'a self,
        graph: &'a JobGraph,
        job_id: &'a str,
        build: Option<HostBuild>,
        mut path: Vec<&'a str>,
        remaining_depth: Option<usize>,
    ) -> BoxFuture<'a, Result<SnapshotNode>> {
        async move {
            let mut node = annotate(graph, job_id, build.as_ref());

            if path.contains(&job_id) {
                node.cyclic = true;
                return Ok(node);
            }
            if remaining_depth == Some(0) {
                return Ok(node);
            }

            path.push(job_id);
            let mut triggered: Vec<DownstreamBuild> =
                build.map(|b| b.downstream).unwrap_or_default();

            let children = graph.children(job_id).into_iter().map(|child| {
                let position = triggered.iter().position(|d| d.job_id == child.id);
                let build_ref = position.map(|i| triggered.remove(i));
                let path = path.clone();

                async move {
                    let child_build = self.downstream_build(&child.id, build_ref).await?;
                    self.snapshot_node(
                        graph,
                        &child.id,
                        child_build,
                        path,
                        remaining_depth.map(|d| d - 1),
                    )
                    .await
                }
            });

            // Collect the futures first so downstream builds are matched in
            // static child order before anything is awaited.
            let children: Vec<_> = children.collect();
            node.children = try_join_all(children).await?;

            Ok(node)
        }
        .boxed()
    }

    async fn downstream_build(
        &self,
        job_id: &str,
        build_ref: Option<DownstreamBuild>,
    ) -> Result<Option<HostBuild>> {
        let Some(build_id) = build_ref.and_then(|d| d.build_id) else {
            return Ok(None);
        };

        let build = self.store.build(job_id, &build_id).await?;
        if build.is_none() {
            warn!("Downstream build {job_id} #{build_id} is referenced but not found");
        }
        Ok(build)
    }
}

fn annotate(graph: &JobGraph, job_id: &str, build: Option<&HostBuild>) -> SnapshotNode {
    let name = graph
        .job(job_id)
        .map_or_else(|| job_id.to_string(), |job| job.name.clone());

    let Some(build) = build else {
        return SnapshotNode {
            job_ci_id: job_id.to_string(),
            name,
            build_ci_id: None,
            number: None,
            status: BuildStatus::NotRun,
            result: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
            cyclic: false,
            children: vec![],
        };
    };

    let status = normalize_status(&build.status);

    SnapshotNode {
        job_ci_id: job_id.to_string(),
        name,
        build_ci_id: Some(build.id.clone()),
        number: build.number,
        status,
        result: status.result(),
        start_time: build.started_at,
        end_time: build.finished_at,
        duration_ms: duration_ms(build.started_at, build.finished_at),
        cyclic: false,
        children: vec![],
    }
}
