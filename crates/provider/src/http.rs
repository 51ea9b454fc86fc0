//! HTTP adapter for an actor-run REST API
//!
//! Maps the four `RemoteTaskClient` operations onto the provider's endpoints:
//!
//! - verify: `GET users/me`
//! - submit: `POST acts/{actor}/runs` with the task input as the JSON body
//! - poll:   `GET actor-runs/{run_id}`
//! - fetch:  `GET datasets/{dataset_id}/items`
//!
//! Every call authenticates with the credential's bearer token. Non-2xx
//! responses go through `classify_status`; transport failures are `Transient`.

use std::time::Duration;

use common::Secret;
use serde_json::Value;
use tracing::debug;

use crate::classify::{classify_status, classify_transport};
use crate::error::{Result, TaskError};
use crate::{BoxFuture, Dataset, RemoteTaskClient, RunHandle, RunStatus, TaskSpec};

/// Run status reported when an actor finished successfully.
const STATUS_SUCCEEDED: &str = "SUCCEEDED";

/// Run statuses that are terminal but unsuccessful.
const STATUS_FAILED: &[&str] = &["FAILED", "ABORTED", "TIMED-OUT"];

/// `reqwest`-backed actor-run client.
pub struct ActorRunClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    probe_timeout: Duration,
}

impl ActorRunClient {
    /// `base_url` includes the API version prefix, e.g. `https://api.apify.com/v2`.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            timeout,
            probe_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get(&self, path: &str, api_key: &Secret<String>, timeout: Duration) -> Result<Value> {
        let request = self
            .client
            .get(self.url(path))
            .bearer_auth(api_key.expose())
            .timeout(timeout);
        send(request).await
    }

    async fn run_details(&self, run: &RunHandle) -> Result<Value> {
        let body = self
            .get(
                &format!("actor-runs/{}", run.run_id),
                &run.api_key,
                self.timeout,
            )
            .await?;
        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), &body));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| TaskError::Transient(format!("invalid response body: {e}")))
}

/// Actor ids of the form `user/actor` are addressed as `user~actor` in paths.
fn actor_path(actor: &str) -> String {
    actor.replace('/', "~")
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

impl RemoteTaskClient for ActorRunClient {
    fn id(&self) -> &str {
        "actor-run-http"
    }

    fn verify<'a>(&'a self, api_key: &'a Secret<String>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.get("users/me", api_key, self.probe_timeout).await?;
            Ok(())
        })
    }

    fn submit<'a>(
        &'a self,
        spec: &'a TaskSpec,
        api_key: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<RunHandle>> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(&format!("acts/{}/runs", actor_path(&spec.actor))))
                .bearer_auth(api_key.expose())
                .timeout(self.timeout)
                .json(&spec.input);
            let body = send(request).await?;
            let data = body.get("data").cloned().unwrap_or(Value::Null);
            let run_id = str_field(&data, "id").ok_or_else(|| {
                TaskError::Transient("run start response carried no run id".into())
            })?;
            debug!(actor = %spec.actor, run_id, "actor run started");
            Ok(RunHandle {
                run_id,
                dataset_id: str_field(&data, "defaultDatasetId"),
                api_key: api_key.clone(),
            })
        })
    }

    fn poll_status<'a>(&'a self, run: &'a RunHandle) -> BoxFuture<'a, Result<RunStatus>> {
        Box::pin(async move {
            let data = self.run_details(run).await?;
            let label = str_field(&data, "status").unwrap_or_else(|| "UNKNOWN".into());
            let status = if label == STATUS_SUCCEEDED {
                RunStatus::succeeded(label)
            } else if STATUS_FAILED.contains(&label.as_str()) {
                RunStatus::failed(label)
            } else {
                RunStatus::running(label)
            };
            Ok(status)
        })
    }

    fn fetch_result<'a>(&'a self, run: &'a RunHandle) -> BoxFuture<'a, Result<Dataset>> {
        Box::pin(async move {
            let dataset_id = match &run.dataset_id {
                Some(id) => id.clone(),
                None => {
                    let data = self.run_details(run).await?;
                    str_field(&data, "defaultDatasetId").ok_or_else(|| {
                        TaskError::Transient(format!("run {} has no dataset", run.run_id))
                    })?
                }
            };
            let body = self
                .get(
                    &format!("datasets/{dataset_id}/items"),
                    &run.api_key,
                    self.timeout,
                )
                .await?;
            match body {
                Value::Array(rows) => Ok(rows),
                other => Err(TaskError::Transient(format!(
                    "dataset {dataset_id} returned non-array body: {}",
                    other
                ))),
            }
        })
    }
}
