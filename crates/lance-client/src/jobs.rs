//! Background job polling
//!
//! Long-running backend work (invoice imports, reminder batches) is exposed as
//! a job resource. Polling goes through `AuthClient`, so an access token that
//! expires halfway through a long job is refreshed like any other request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use transport::ApiRequest;

use crate::error::{Error, Result};
use crate::pipeline::{AuthClient, expect_success};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One snapshot of `GET /jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub status: JobState,
    /// Percent complete, when the backend reports it
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

/// Poll a job until it completes, fails, or `max_attempts` polls have been made.
///
/// The first poll is immediate. `on_update` sees every snapshot, including
/// the final one.
#[instrument(skip(client, options, on_update))]
pub async fn poll_job_status<F>(
    client: &AuthClient,
    job_id: &str,
    options: &PollOptions,
    mut on_update: F,
) -> Result<JobStatus>
where
    F: FnMut(&JobStatus),
{
    let url = client.url(&format!("/jobs/{job_id}"));
    let mut ticker = tokio::time::interval(options.interval);

    for attempt in 1..=options.max_attempts {
        ticker.tick().await;

        let response = expect_success(client.send(ApiRequest::get(&url)).await?)?;
        let status: JobStatus = response
            .json()
            .map_err(|e| Error::Decode(format!("job status: {e}")))?;
        debug!(attempt, state = ?status.status, progress = ?status.progress, "job polled");
        on_update(&status);

        match status.status {
            JobState::Completed => {
                info!(attempt, "job completed");
                return Ok(status);
            }
            JobState::Failed => {
                let message = status
                    .error
                    .clone()
                    .unwrap_or_else(|| String::from("no error message"));
                warn!(error = %message, "job failed");
                return Err(Error::JobFailed {
                    id: status.id,
                    message,
                });
            }
            JobState::Pending | JobState::Processing => {}
        }
    }

    warn!(attempts = options.max_attempts, "job polling gave up");
    Err(Error::PollTimeout {
        id: job_id.to_string(),
        attempts: options.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CoordinatorSettings, RefreshCoordinator};
    use crate::testing::{FakeRefresher, RecordingNavigator, RefreshBehavior};
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use lance_auth::{AccessToken, CredentialStore};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use transport::ReqwestTransport;

    /// Mock jobs API. Job `import-1` is pending, then processing, then
    /// completed. Job `broken` fails. Job `stuck` never finishes. The first
    /// request with token `T1` is rejected to exercise refresh mid-poll.
    async fn start_jobs_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let polls = Arc::new(AtomicUsize::new(0));
        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/jobs/{id}",
                axum::routing::get(move |Path(id): Path<String>, headers: HeaderMap| {
                    let polls = polls.clone();
                    async move {
                        let bearer = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        if bearer == "Bearer T1" {
                            return (StatusCode::UNAUTHORIZED, String::from("expired"));
                        }
                        let body = match id.as_str() {
                            "import-1" => {
                                let n = polls.fetch_add(1, Ordering::SeqCst);
                                let state = match n {
                                    0 => "pending",
                                    1 => "processing",
                                    _ => "completed",
                                };
                                serde_json::json!({
                                    "id": id,
                                    "status": state,
                                    "progress": (n.min(2) * 50) as u8,
                                    "result": if state == "completed" {
                                        serde_json::json!({"imported": 12})
                                    } else {
                                        serde_json::Value::Null
                                    },
                                })
                            }
                            "broken" => serde_json::json!({
                                "id": id, "status": "failed", "error": "CSV header missing"
                            }),
                            _ => serde_json::json!({"id": id, "status": "processing"}),
                        };
                        (StatusCode::OK, body.to_string())
                    }
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> (AuthClient, Arc<FakeRefresher>) {
        let store = Arc::new(CredentialStore::in_memory());
        store.set(AccessToken::new("T1"));
        let refresher = Arc::new(FakeRefresher::new(RefreshBehavior::Succeed("T2")));
        let coordinator = RefreshCoordinator::new(
            store,
            refresher.clone(),
            Arc::new(RecordingNavigator::default()),
            None,
            CoordinatorSettings::default(),
        );
        let transport = Arc::new(ReqwestTransport::new(
            reqwest::Client::new(),
            Duration::from_secs(5),
        ));
        (AuthClient::new(base, transport, coordinator), refresher)
    }

    fn fast() -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(10),
            max_attempts: 5,
        }
    }

    #[tokio::test]
    async fn polls_until_completed_and_reports_each_snapshot() {
        let base = start_jobs_server().await;
        let (client, refresher) = client(&base);
        let mut seen = Vec::new();

        let status = poll_job_status(&client, "import-1", &fast(), |s| seen.push(s.status))
            .await
            .unwrap();

        assert_eq!(status.status, JobState::Completed);
        assert_eq!(status.result.unwrap()["imported"], 12);
        assert_eq!(
            seen,
            vec![JobState::Pending, JobState::Processing, JobState::Completed]
        );
        // The expired T1 token was refreshed once on the first poll
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn failed_job_is_an_error() {
        let base = start_jobs_server().await;
        let (client, _) = client(&base);

        let err = poll_job_status(&client, "broken", &fast(), |_| {})
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::JobFailed { ref message, .. } if message == "CSV header missing"),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let base = start_jobs_server().await;
        let (client, _) = client(&base);
        let mut polls = 0;

        let err = poll_job_status(&client, "stuck", &fast(), |_| polls += 1)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::PollTimeout { attempts: 5, .. }),
            "got: {err:?}"
        );
        assert_eq!(polls, 5);
    }

    #[test]
    fn job_state_deserializes_lowercase() {
        let status: JobStatus =
            serde_json::from_str(r#"{"id":"j1","status":"processing"}"#).unwrap();
        assert_eq!(status.status, JobState::Processing);
        assert!(!status.status.is_terminal());
        assert!(status.progress.is_none());
        assert!(JobState::Failed.is_terminal());
    }
}
