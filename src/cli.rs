use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use octane_ci_bridge::config::{Config, FileConfigurationStore};
use octane_ci_bridge::host::ConfigurationStore;
use octane_ci_bridge::models::RunRequest;
use octane_ci_bridge::output;
use octane_ci_bridge::providers::{GitLabHost, MemoryHost};
use octane_ci_bridge::{CiPluginServices, Dispatcher};

#[derive(Parser)]
#[command(name = "octane-bridge")]
#[command(author, version, about = "Octane CI plugin bridge", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serve from a YAML/JSON host fixture instead of GitLab
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// GitLab token, overrides the configuration file
    #[arg(long, global = true, env = "GITLAB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    #[arg(short, long, global = true, value_enum, default_value_t = Format::Json)]
    format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Identity of the CI server
    ServerInfo,

    /// Version of the bridge
    PluginInfo,

    /// Host-managed Octane, proxy and storage settings
    Config {
        /// Host the proxy would be used for, defaults to the Octane host
        #[arg(long)]
        target_host: Option<String>,
    },

    /// List jobs
    Jobs {
        /// Include declared parameters
        #[arg(long, default_value_t = false)]
        parameters: bool,
    },

    /// Static pipeline structure of a job
    Pipeline { job: String },

    /// Execution snapshot of a job's latest (or given) build
    Snapshot {
        job: String,

        #[arg(short, long)]
        build: Option<String>,

        /// Only the job and its direct children
        #[arg(long, default_value_t = false)]
        sub_tree: bool,
    },

    /// Trigger a run
    Run {
        job: String,

        /// Parameter as NAME=VALUE, repeatable
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Legacy JSON body, instead of --param
        #[arg(long, conflicts_with = "params")]
        body: Option<String>,
    },

    /// Recent builds of a job
    History {
        job: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Test report of one build
    Tests { job: String, build: String },
}

fn parse_param(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => bail!("Invalid parameter '{raw}', expected NAME=VALUE"),
    }
}

impl Cli {
    fn dispatcher(&self) -> Result<Dispatcher> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(fixture) = &self.fixture {
            info!("Serving from fixture {}", fixture.display());
            let host = Arc::new(MemoryHost::load(fixture)?);
            return Ok(Dispatcher::for_host(host, &config.bridge));
        }

        if let Some(token) = &self.token {
            config.gitlab.token = Some(token.clone());
        }

        let gitlab_host = url::Url::parse(&config.gitlab.base_url)
            .with_context(|| format!("Invalid GitLab URL: {}", config.gitlab.base_url))?
            .host_str()
            .unwrap_or_default()
            .to_string();

        let store = FileConfigurationStore::new(config.clone());
        let proxy = store.proxy_configuration(&gitlab_host);

        info!("Serving from GitLab at {}", config.gitlab.base_url);
        let host = Arc::new(GitLabHost::new(config.gitlab.clone(), proxy.as_ref())?);

        Ok(Dispatcher::new(
            host.clone(),
            host,
            Arc::new(store),
            &config.bridge,
        ))
    }

    fn emit<T: Serialize>(&self, value: &T, table: impl FnOnce(&T) -> String) -> Result<()> {
        match self.format {
            Format::Table => self.write(table(value)),
            Format::Json => self.emit_json(value),
        }
    }

    fn emit_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let json_output = if self.pretty || self.format == Format::Table {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        self.write(json_output)
    }

    fn write(&self, rendered: String) -> Result<()> {
        if let Some(output_path) = &self.output {
            std::fs::write(output_path, rendered)?;
            info!("Output written to: {}", output_path.display());
        } else {
            println!("{rendered}");
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let dispatcher = self.dispatcher()?;

        match &self.command {
            Commands::ServerInfo => self.emit_json(&dispatcher.server_info().await?),
            Commands::PluginInfo => self.emit_json(&dispatcher.plugin_info()),
            Commands::Config { target_host } => {
                let octane = dispatcher.octane_configuration();
                let target = target_host.clone().or_else(|| {
                    let url = url::Url::parse(&octane.as_ref()?.url).ok()?;
                    url.host_str().map(ToString::to_string)
                });
                let proxy = target.and_then(|host| dispatcher.proxy_configuration(&host));
                let settings = serde_json::json!({
                    "octane": octane,
                    "proxy": proxy,
                    "storage": dispatcher.allowed_storage(),
                });
                self.emit_json(&settings)
            }
            Commands::Jobs { parameters } => {
                let jobs = dispatcher.jobs_list(*parameters).await?;
                self.emit(&jobs, output::render_jobs)
            }
            Commands::Pipeline { job } => {
                let pipeline = dispatcher.pipeline(job).await?;
                self.emit(&pipeline, output::render_pipeline)
            }
            Commands::Snapshot {
                job,
                build,
                sub_tree,
            } => {
                let snapshot = match build {
                    Some(build) => dispatcher.snapshot_by_number(job, build, *sub_tree).await?,
                    None => dispatcher.snapshot_latest(job, *sub_tree).await?,
                };
                self.emit(&snapshot, output::render_snapshot)
            }
            Commands::Run { job, params, body } => {
                let receipt = match body {
                    Some(body) => dispatcher.run_pipeline_legacy(job, body).await?,
                    None => {
                        let mut request = RunRequest::default();
                        for raw in params {
                            let (name, value) = parse_param(raw)?;
                            request = request.with_parameter(name, value);
                        }
                        dispatcher.run_pipeline(job, request).await?
                    }
                };
                self.emit_json(&receipt)
            }
            Commands::History { job, limit } => {
                let body = match limit {
                    Some(limit) => serde_json::json!({ "limit": limit }).to_string(),
                    None => String::new(),
                };
                let history = dispatcher.history_pipeline(job, &body).await?;
                self.emit(&history, output::render_history)
            }
            Commands::Tests { job, build } => match dispatcher.tests_result(job, build).await? {
                Some(tests) => self.emit(&tests, output::render_tests),
                None => {
                    info!("No test report for {job} #{build}");
                    self.emit_json(&serde_json::Value::Null)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("TARGET=prod").unwrap(),
            ("TARGET".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_param("EXPR=a=b").unwrap(),
            ("EXPR".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_cli_parses_run_with_params() {
        let cli = Cli::try_parse_from([
            "octane-bridge",
            "--fixture",
            "host.yaml",
            "run",
            "build-app",
            "--param",
            "A=1",
            "--param",
            "B=2",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Run { ref params, body: None, .. } if params.len() == 2
        ));
    }

    #[test]
    fn test_cli_rejects_body_with_params() {
        assert!(Cli::try_parse_from([
            "octane-bridge",
            "run",
            "build-app",
            "--param",
            "A=1",
            "--body",
            "{}",
        ])
        .is_err());
    }
}
