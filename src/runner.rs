use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{BridgeError, Result};
use crate::host::{ExecutionEngine, JobStore};
use crate::models::{ParameterValue, RunReceipt, RunRequest};

/// Identity of a run for deduplication: the job plus its effective,
/// name-sorted parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RunKey {
    job_id: String,
    parameters: Vec<ParameterValue>,
}

#[derive(Debug, Clone)]
struct RecentRun {
    submitted_at: Instant,
    build_id: Option<String>,
}

/// Last accepted run for one key. Locked across submission, so only
/// identical runs wait on each other.
type RunSlot = Arc<Mutex<Option<RecentRun>>>;

/// Triggers runs of a root job on the host execution engine.
///
/// Deduplication policy: when `dedup_window` is non-zero and the engine
/// reports that a job cannot run concurrent instances, a second run of the
/// same job with the same effective parameters inside the window is not
/// submitted. The caller gets the earlier receipt back, flagged as
/// `deduplicated`. Runs with different keys never wait on each other.
pub struct PipelineRunner {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ExecutionEngine>,
    dedup_window: Duration,
    recent: std::sync::Mutex<HashMap<RunKey, RunSlot>>,
}

impl PipelineRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn ExecutionEngine>,
        dedup_window: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            dedup_window,
            recent: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Decodes the legacy opaque body and runs the job with it.
    pub async fn run_legacy(&self, job_id: &str, body: &str) -> Result<RunReceipt> {
        self.ensure_job(job_id).await?;
        let request = decode_legacy_body(body)?;
        self.run_known(job_id, request).await
    }

    /// Submits a run and returns as soon as the host acknowledges it.
    pub async fn run(&self, job_id: &str, request: RunRequest) -> Result<RunReceipt> {
        self.ensure_job(job_id).await?;
        self.run_known(job_id, request).await
    }

    async fn ensure_job(&self, job_id: &str) -> Result<()> {
        match self.store.job(job_id).await? {
            Some(_) => Ok(()),
            None => Err(BridgeError::JobNotFound(job_id.to_string())),
        }
    }

    async fn run_known(&self, job_id: &str, request: RunRequest) -> Result<RunReceipt> {
        let declared = self.store.parameters(job_id).await?;
        let parameters = effective_parameters(&declared, request.parameters)?;

        let dedup = !self.dedup_window.is_zero() && !self.engine.supports_concurrent_builds(job_id);
        if !dedup {
            return self.submit(job_id, &parameters).await;
        }

        let mut key_parameters = parameters.clone();
        key_parameters.sort();
        let key = RunKey {
            job_id: job_id.to_string(),
            parameters: key_parameters,
        };

        let slot = self.slot(key);
        let mut last = slot.lock().await;

        if let Some(previous) = last
            .as_ref()
            .filter(|run| run.submitted_at.elapsed() < self.dedup_window)
        {
            info!(
                "Run of {job_id} matches a run submitted {:?} ago, not resubmitting",
                previous.submitted_at.elapsed()
            );
            return Ok(RunReceipt {
                job_ci_id: job_id.to_string(),
                build_ci_id: previous.build_id.clone(),
                deduplicated: true,
            });
        }

        let receipt = self.submit(job_id, &parameters).await?;
        *last = Some(RecentRun {
            submitted_at: Instant::now(),
            build_id: receipt.build_ci_id.clone(),
        });

        Ok(receipt)
    }

    /// Slot for `key`, dropping idle slots whose run left the window.
    fn slot(&self, key: RunKey) -> RunSlot {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let window = self.dedup_window;
        recent.retain(|_, slot| {
            // Handed out to a caller that has not locked it yet
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(last) => last
                    .as_ref()
                    .is_some_and(|run| run.submitted_at.elapsed() < window),
                Err(_) => true,
            }
        });

        recent.entry(key).or_default().clone()
    }

    async fn submit(&self, job_id: &str, parameters: &[ParameterValue]) -> Result<RunReceipt> {
        debug!("Submitting {job_id} with {} parameters", parameters.len());
        let ack = self.engine.submit(job_id, parameters).await?;

        info!(
            "Run of {job_id} accepted (build {})",
            ack.build_id.as_deref().unwrap_or("pending")
        );

        Ok(RunReceipt {
            job_ci_id: job_id.to_string(),
            build_ci_id: ack.build_id,
            deduplicated: false,
        })
    }
}

/// Merges supplied values over declared defaults.
///
/// When the job declares parameters, every supplied name must be one of
/// them and the result follows declaration order. Jobs without declared
/// parameters pass supplied values through untouched.
fn effective_parameters(
    declared: &[crate::host::HostParameter],
    supplied: Vec<ParameterValue>,
) -> Result<Vec<ParameterValue>> {
    let mut seen = HashSet::new();
    for param in &supplied {
        if param.name.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(
                "parameter name must not be empty".to_string(),
            ));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(BridgeError::InvalidArgument(format!(
                "parameter '{}' is supplied more than once",
                param.name
            )));
        }
    }

    if declared.is_empty() {
        return Ok(supplied);
    }

    if let Some(unknown) = supplied
        .iter()
        .find(|p| !declared.iter().any(|d| d.name == p.name))
    {
        return Err(BridgeError::InvalidArgument(format!(
            "job does not declare parameter '{}'",
            unknown.name
        )));
    }

    let mut supplied: HashMap<String, String> = supplied
        .into_iter()
        .map(|p| (p.name, p.value))
        .collect();

    Ok(declared
        .iter()
        .filter_map(|d| {
            supplied
                .remove(&d.name)
                .or_else(|| d.default.clone())
                .map(|value| ParameterValue::new(d.name.clone(), value))
        })
        .collect())
}

/// Decodes the legacy run body into a [`RunRequest`].
///
/// Accepted forms:
/// - empty or whitespace: no parameters
/// - `{"parameters": [{"name": "...", "value": ...}, ...]}`
/// - a flat object of parameter name to scalar value
pub fn decode_legacy_body(body: &str) -> Result<RunRequest> {
    if body.trim().is_empty() {
        return Ok(RunRequest::default());
    }

    let object: IndexMap<String, Value> = serde_json::from_str(body)
        .map_err(|e| BridgeError::InvalidArgument(format!("run payload is not a JSON object: {e}")))?;

    if let Some(Value::Array(items)) = object.get("parameters") {
        let parameters = items
            .iter()
            .map(|item| {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        BridgeError::InvalidArgument(
                            "each parameter needs a string 'name'".to_string(),
                        )
                    })?;
                let value = scalar_to_string(name, item.get("value").unwrap_or(&Value::Null))?;
                Ok(ParameterValue::new(name, value))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(RunRequest { parameters });
    }

    let parameters = object
        .iter()
        .map(|(name, value)| Ok(ParameterValue::new(name.clone(), scalar_to_string(name, value)?)))
        .collect::<Result<Vec<_>>>()?;

    Ok(RunRequest { parameters })
}

fn scalar_to_string(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(_) | Value::Object(_) => Err(BridgeError::InvalidArgument(format!(
            "parameter '{name}' must have a scalar value"
        ))),
    }
}
