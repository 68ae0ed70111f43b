use std::fmt::Write;

use comfy_table::Cell;

use crate::models::{
    BuildHistory, JobsList, PipelineNode, SnapshotNode, TestRunResult, TestsResult,
};

use super::styling::{heading, job_label, muted, status_text, verdict};
use super::tables::{create_table, cyan_header, duration_cell, status_cell, test_result_cell};

fn add_section_header(output: &mut String, title: &str) {
    let _ = writeln!(output, "{}", heading(title));
}

pub fn render_jobs(jobs: &JobsList) -> String {
    let mut output = String::new();
    add_section_header(&mut output, "Jobs");

    let mut table = create_table();
    table.set_header(cyan_header(&["Job", "Name", "Parameters"]));

    for job in &jobs.jobs {
        let parameters = match &job.parameters {
            Some(params) => params
                .iter()
                .map(|p| match &p.default_value {
                    Some(default) => format!("{} = {default}", p.name),
                    None => p.name.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            None => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&job.job_ci_id),
            Cell::new(&job.name),
            Cell::new(parameters),
        ]);
    }

    let _ = writeln!(output, "{table}");
    let _ = writeln!(output, "{}", muted(format!("{} jobs", jobs.jobs.len())));
    output
}

/// Indented tree of a pipeline, one job per line.
pub fn render_pipeline(pipeline: &PipelineNode) -> String {
    fn walk(node: &PipelineNode, depth: usize, output: &mut String) {
        let marker = if node.cyclic { " (cycle)" } else { "" };
        let _ = writeln!(
            output,
            "{}{} {}{}",
            "  ".repeat(depth),
            job_label(&node.job_ci_id),
            muted(&node.name),
            marker
        );
        for child in &node.children {
            walk(child, depth + 1, output);
        }
    }

    let mut output = String::new();
    add_section_header(&mut output, "Pipeline");
    walk(pipeline, 0, &mut output);
    output
}

pub fn render_snapshot(snapshot: &SnapshotNode) -> String {
    fn rows(node: &SnapshotNode, depth: usize, table: &mut comfy_table::Table) {
        let label = format!("{}{}", "  ".repeat(depth), node.job_ci_id);
        let label = if node.cyclic {
            format!("{label} (cycle)")
        } else {
            label
        };
        table.add_row(vec![
            Cell::new(label),
            Cell::new(node.build_ci_id.as_deref().unwrap_or("-")),
            status_cell(node.status),
            duration_cell(node.duration_ms),
        ]);
        for child in &node.children {
            rows(child, depth + 1, table);
        }
    }

    let mut output = String::new();
    add_section_header(&mut output, "Snapshot");

    let mut table = create_table();
    table.set_header(cyan_header(&["Job", "Build", "Status", "Duration"]));
    rows(snapshot, 0, &mut table);

    let _ = writeln!(output, "{table}");
    output
}

pub fn render_history(history: &BuildHistory) -> String {
    let mut output = String::new();
    add_section_header(&mut output, &format!("History of {}", history.job_ci_id));

    let mut table = create_table();
    table.set_header(cyan_header(&["Build", "Number", "Status", "Started", "Duration"]));
    for build in &history.builds {
        table.add_row(vec![
            Cell::new(&build.build_ci_id),
            Cell::new(build.number.map_or_else(|| "-".to_string(), |n| n.to_string())),
            status_cell(build.status),
            Cell::new(
                build
                    .start_time
                    .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            ),
            duration_cell(build.duration_ms),
        ]);
    }
    let _ = writeln!(output, "{table}");

    if let Some(last) = &history.last_build {
        let _ = writeln!(output, "Last build: {} {}", last.build_ci_id, status_text(last.status));
    }
    if let Some(last) = &history.last_successful_build {
        let _ = writeln!(output, "Last successful build: {}", last.build_ci_id);
    }
    output
}

pub fn render_tests(tests: &TestsResult) -> String {
    let mut output = String::new();
    add_section_header(
        &mut output,
        &format!(
            "Tests of {} #{}",
            tests.build_context.job_id, tests.build_context.build_id
        ),
    );

    let mut table = create_table();
    table.set_header(cyan_header(&["Class", "Test", "Result", "Duration"]));
    for run in &tests.test_runs {
        let class = if run.package_name.is_empty() {
            run.class_name.clone()
        } else {
            format!("{}.{}", run.package_name, run.class_name)
        };
        table.add_row(vec![
            Cell::new(class),
            Cell::new(&run.test_name),
            test_result_cell(run.result),
            duration_cell(Some(run.duration_ms)),
        ]);
    }
    let _ = writeln!(output, "{table}");

    let failed = tests
        .test_runs
        .iter()
        .filter(|run| run.result == TestRunResult::Failed)
        .count();
    let summary = if failed == 0 {
        format!("{} tests, none failed", tests.test_runs.len())
    } else {
        format!("{} tests, {failed} failed", tests.test_runs.len())
    };
    let _ = writeln!(output, "{}", verdict(summary, failed == 0));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildStatus, BuildSummary, Job};

    fn leaf(id: &str) -> PipelineNode {
        PipelineNode {
            job_ci_id: id.to_string(),
            name: id.to_uppercase(),
            cyclic: false,
            children: vec![],
        }
    }

    #[test]
    fn test_render_pipeline_indents_children() {
        console::set_colors_enabled(false);
        let pipeline = PipelineNode {
            children: vec![leaf("unit-tests"), leaf("package")],
            ..leaf("build-app")
        };

        let rendered = render_pipeline(&pipeline);

        assert!(rendered.contains("build-app BUILD-APP"));
        assert!(rendered.contains("\n  unit-tests UNIT-TESTS"));
        assert!(rendered.contains("\n  package PACKAGE"));
    }

    #[test]
    fn test_render_jobs_lists_every_job() {
        let jobs = JobsList {
            jobs: vec![
                Job {
                    job_ci_id: "group/app".to_string(),
                    name: "app".to_string(),
                    parameters: None,
                },
                Job {
                    job_ci_id: "group/lib".to_string(),
                    name: "lib".to_string(),
                    parameters: None,
                },
            ],
        };

        let rendered = render_jobs(&jobs);

        assert!(rendered.contains("group/app"));
        assert!(rendered.contains("group/lib"));
        assert!(rendered.contains("2 jobs"));
    }

    #[test]
    fn test_render_snapshot_shows_status() {
        let snapshot = SnapshotNode {
            job_ci_id: "build-app".to_string(),
            name: "build-app".to_string(),
            build_ci_id: Some("42".to_string()),
            number: Some(42),
            status: BuildStatus::Running,
            result: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
            cyclic: false,
            children: vec![],
        };

        let rendered = render_snapshot(&snapshot);

        assert!(rendered.contains("42"));
        assert!(rendered.contains("running"));
    }

    #[test]
    fn test_render_history_names_last_builds() {
        console::set_colors_enabled(false);
        let summary = |id: &str, status| BuildSummary {
            build_ci_id: id.to_string(),
            number: id.parse().ok(),
            status,
            start_time: None,
            duration_ms: Some(1500),
        };
        let history = BuildHistory {
            job_ci_id: "build-app".to_string(),
            builds: vec![
                summary("42", BuildStatus::Failed),
                summary("41", BuildStatus::Succeeded),
            ],
            last_build: Some(summary("42", BuildStatus::Failed)),
            last_successful_build: Some(summary("41", BuildStatus::Succeeded)),
        };

        let rendered = render_history(&history);

        assert!(rendered.contains("History of build-app"));
        assert!(rendered.contains("Last build: 42 failed"));
        assert!(rendered.contains("Last successful build: 41"));
    }
}
