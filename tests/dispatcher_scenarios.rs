use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use octane_ci_bridge::config::BridgeConfig;
use octane_ci_bridge::host::HostJob;
use octane_ci_bridge::models::{BuildStatus, ParameterType, RunRequest, TestRunResult};
use octane_ci_bridge::providers::MemoryHost;
use octane_ci_bridge::{BridgeError, CiPluginServices, Dispatcher};

fn load_fixture() -> MemoryHost {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/build-app.yaml");
    MemoryHost::load(&path).unwrap()
}

fn fixture_host() -> Arc<MemoryHost> {
    Arc::new(load_fixture())
}

fn dispatcher(host: Arc<MemoryHost>) -> Dispatcher {
    Dispatcher::for_host(host, &BridgeConfig::default())
}

#[tokio::test]
async fn test_pipeline_of_build_app_has_three_nodes() {
    let dispatcher = dispatcher(fixture_host());

    let pipeline = dispatcher.pipeline("build-app").await.unwrap();

    assert_eq!(pipeline.job_ci_id, "build-app");
    assert_eq!(pipeline.node_count(), 3);
    let children: Vec<_> = pipeline.children.iter().map(|c| c.job_ci_id.as_str()).collect();
    assert_eq!(children, vec!["unit-tests", "package"]);
    assert!(pipeline.children.iter().all(|c| c.children.is_empty()));
}

#[tokio::test]
async fn test_pipeline_reads_are_idempotent() {
    let dispatcher = dispatcher(fixture_host());

    let first = dispatcher.pipeline("build-app").await.unwrap();
    let second = dispatcher.pipeline("build-app").await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_pipeline_of_unknown_job_is_not_found() {
    let dispatcher = dispatcher(fixture_host());

    let err = dispatcher.pipeline("nonexistent").await.unwrap_err();
    assert!(matches!(err, BridgeError::JobNotFound(ref id) if id == "nonexistent"));
}

#[tokio::test]
async fn test_cyclic_pipeline_is_finite() {
    let host = MemoryHost::new()
        .with_job(HostJob {
            id: "a".to_string(),
            name: "a".to_string(),
            downstream: vec!["b".to_string()],
        })
        .with_job(HostJob {
            id: "b".to_string(),
            name: "b".to_string(),
            downstream: vec!["a".to_string(), "b".to_string()],
        });
    let dispatcher = dispatcher(Arc::new(host));

    let pipeline = dispatcher.pipeline("a").await.unwrap();

    let b = &pipeline.children[0];
    assert_eq!(b.children.len(), 2);
    assert!(b.children.iter().all(|c| c.cyclic && c.children.is_empty()));
}

#[tokio::test]
async fn test_run_on_unknown_job_is_not_found() {
    let host = fixture_host();
    let dispatcher = dispatcher(host.clone());

    let err = dispatcher
        .run_pipeline_legacy("nonexistent", "{}")
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::JobNotFound(_)));
    assert!(host.submissions().is_empty());
}

#[tokio::test]
async fn test_run_with_malformed_payload_is_invalid() {
    let dispatcher = dispatcher(fixture_host());

    let err = dispatcher
        .run_pipeline_legacy("build-app", "{not json")
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_snapshot_of_missing_build_is_not_found() {
    let dispatcher = dispatcher(fixture_host());

    let err = dispatcher
        .snapshot_by_number("build-app", "999", false)
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::BuildNotFound { .. }));
}

#[tokio::test]
async fn test_snapshot_latest_marks_untriggered_children() {
    let dispatcher = dispatcher(fixture_host());

    let snapshot = dispatcher.snapshot_latest("build-app", false).await.unwrap();

    assert_eq!(snapshot.build_ci_id.as_deref(), Some("42"));
    assert_eq!(snapshot.status, BuildStatus::Running);
    assert_eq!(snapshot.children[0].build_ci_id.as_deref(), Some("12"));
    assert_eq!(snapshot.children[1].job_ci_id, "package");
    assert_eq!(snapshot.children[1].status, BuildStatus::NotRun);
}

#[tokio::test]
async fn test_sub_tree_snapshot_is_prefix_of_full_tree() {
    let dispatcher = dispatcher(fixture_host());

    let full = dispatcher.snapshot_latest("build-app", false).await.unwrap();
    let partial = dispatcher.snapshot_latest("build-app", true).await.unwrap();

    assert_eq!(partial.job_ci_id, full.job_ci_id);
    assert_eq!(partial.build_ci_id, full.build_ci_id);
    assert_eq!(partial.children.len(), full.children.len());
    for (p, f) in partial.children.iter().zip(&full.children) {
        assert_eq!(p.job_ci_id, f.job_ci_id);
        assert_eq!(p.status, f.status);
        assert!(p.children.is_empty());
    }
}

#[tokio::test]
async fn test_snapshot_by_number_matches_pipeline_structure() {
    let dispatcher = dispatcher(fixture_host());

    let snapshot = dispatcher
        .snapshot_by_number("build-app", "41", false)
        .await
        .unwrap();
    let pipeline = dispatcher.pipeline("build-app").await.unwrap();

    assert_eq!(snapshot.structure(), pipeline);
    assert_eq!(snapshot.duration_ms, Some(240_000));
    assert!(snapshot
        .children
        .iter()
        .all(|c| c.status == BuildStatus::Succeeded));
}

#[tokio::test]
async fn test_tests_result_absent_without_report() {
    let dispatcher = dispatcher(fixture_host());

    assert!(dispatcher
        .tests_result("build-app", "42")
        .await
        .unwrap()
        .is_none());
    assert!(dispatcher
        .tests_result("nonexistent", "1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_tests_result_from_report() {
    let dispatcher = dispatcher(fixture_host());

    let tests = dispatcher
        .tests_result("unit-tests", "11")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(tests.build_context.server_id.as_deref(), Some("ci-01"));
    assert_eq!(tests.test_runs.len(), 2);
    assert_eq!(tests.test_runs[0].package_name, "com.example");
    assert_eq!(tests.test_runs[0].class_name, "CalcTest");
    assert_eq!(tests.test_runs[1].result, TestRunResult::Failed);
    let error = tests.test_runs[1].error.as_ref().unwrap();
    assert_eq!(error.message, "expected 2 but was 0");
}

#[tokio::test]
async fn test_jobs_list_honours_parameter_flag() {
    let dispatcher = dispatcher(fixture_host());

    let without = dispatcher.jobs_list(false).await.unwrap();
    assert_eq!(without.jobs.len(), 3);
    assert!(without.jobs.iter().all(|job| job.parameters.is_none()));

    let with = dispatcher.jobs_list(true).await.unwrap();
    let build_app = &with.jobs[0];
    let params = build_app.parameters.as_ref().unwrap();
    assert_eq!(params.len(), 2);
    assert_eq!(params[0].param_type, ParameterType::Choice);
    assert_eq!(params[1].param_type, ParameterType::Password);
    assert!(params[1].default_value.is_none());
    assert!(with.jobs[1].parameters.is_none());
}

#[tokio::test]
async fn test_history_orders_newest_first() {
    let dispatcher = dispatcher(fixture_host());

    let history = dispatcher.history_pipeline("build-app", "").await.unwrap();
    let ids: Vec<_> = history.builds.iter().map(|b| b.build_ci_id.as_str()).collect();
    assert_eq!(ids, vec!["42", "41"]);
    assert_eq!(history.last_build.unwrap().build_ci_id, "42");
    assert_eq!(history.last_successful_build.unwrap().build_ci_id, "41");

    let limited = dispatcher
        .history_pipeline("build-app", r#"{"limit":1}"#)
        .await
        .unwrap();
    assert_eq!(limited.builds.len(), 1);
}

#[tokio::test]
async fn test_run_then_poll_snapshot() {
    let host = fixture_host();
    let dispatcher = dispatcher(host.clone());

    let receipt = dispatcher
        .run_pipeline("build-app", RunRequest::default().with_parameter("TARGET", "prod"))
        .await
        .unwrap();
    assert_eq!(receipt.build_ci_id.as_deref(), Some("43"));

    let snapshot = dispatcher.snapshot_latest("build-app", true).await.unwrap();
    assert_eq!(snapshot.build_ci_id.as_deref(), Some("43"));
    assert_eq!(snapshot.status, BuildStatus::Queued);

    host.set_build_status("build-app", "43", "success");
    let snapshot = dispatcher.snapshot_latest("build-app", true).await.unwrap();
    assert_eq!(snapshot.status, BuildStatus::Succeeded);
}

#[tokio::test]
async fn test_rapid_identical_runs_submit_once() {
    let host = fixture_host();
    let dispatcher = dispatcher(host.clone());

    let (first, second) = tokio::join!(
        dispatcher.run_pipeline_legacy("build-app", r#"{"TARGET":"prod"}"#),
        dispatcher.run_pipeline_legacy("build-app", r#"{"parameters":[{"name":"TARGET","value":"prod"}]}"#),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(host.submissions().len(), 1);
    assert!(first.deduplicated != second.deduplicated);
    assert_eq!(first.build_ci_id, second.build_ci_id);
}

#[tokio::test]
async fn test_independent_operations_run_concurrently() {
    let dispatcher = dispatcher(fixture_host());

    let (jobs, pipeline, snapshot, history) = tokio::join!(
        dispatcher.jobs_list(true),
        dispatcher.pipeline("build-app"),
        dispatcher.snapshot_latest("build-app", false),
        dispatcher.history_pipeline("unit-tests", ""),
    );

    assert_eq!(jobs.unwrap().jobs.len(), 3);
    assert_eq!(pipeline.unwrap().node_count(), 3);
    assert_eq!(snapshot.unwrap().children.len(), 2);
    assert_eq!(history.unwrap().builds.len(), 2);
}

#[tokio::test]
async fn test_server_and_plugin_info() {
    let dispatcher = dispatcher(fixture_host());

    let server = dispatcher.server_info().await.unwrap();
    assert_eq!(server.server_type, "jenkins");
    assert_eq!(server.url, "https://ci.example.com");
    assert_eq!(dispatcher.plugin_info().version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_configuration_getters() {
    let dispatcher = dispatcher(fixture_host());

    let octane = dispatcher.octane_configuration().unwrap();
    assert_eq!(octane.shared_space, "1001");
    assert!(dispatcher.proxy_configuration("octane.example.com").is_none());
    assert!(dispatcher.allowed_storage().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_slow_host_surfaces_timeout() {
    let host = MemoryHost::new()
        .with_job(HostJob {
            id: "build-app".to_string(),
            name: "build-app".to_string(),
            downstream: vec![],
        })
        .with_latency(Duration::from_secs(120));
    let config = BridgeConfig {
        operation_timeout_secs: 2,
        ..BridgeConfig::default()
    };
    let dispatcher = Dispatcher::for_host(Arc::new(host), &config);

    let err = dispatcher.snapshot_latest("build-app", true).await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { operation: "snapshot_latest", .. }));
}

#[tokio::test(start_paused = true)]
async fn test_runs_of_different_jobs_proceed_independently() {
    let host = Arc::new(load_fixture().with_submit_delay("build-app", Duration::from_secs(20)));
    let dispatcher = dispatcher(host.clone());

    let started = tokio::time::Instant::now();
    let (slow, fast) = tokio::join!(
        dispatcher.run_pipeline("build-app", RunRequest::default()),
        async {
            let receipt = dispatcher.run_pipeline("package", RunRequest::default()).await;
            (receipt, started.elapsed())
        },
    );

    let (fast, elapsed) = fast;
    assert!(elapsed < Duration::from_secs(1), "package waited {elapsed:?}");
    assert!(!fast.unwrap().deduplicated);
    assert_eq!(slow.unwrap().build_ci_id.as_deref(), Some("43"));
    assert_eq!(host.submissions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_submission_surfaces_timeout() {
    let host = load_fixture().with_submit_delay("build-app", Duration::from_secs(120));
    let config = BridgeConfig {
        operation_timeout_secs: 2,
        ..BridgeConfig::default()
    };
    let dispatcher = Dispatcher::for_host(Arc::new(host), &config);

    let err = dispatcher
        .run_pipeline("build-app", RunRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Timeout { operation: "run_pipeline", .. }));
}
