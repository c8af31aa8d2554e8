use std::{collections::HashMap, path::PathBuf, time::Duration};

use {
    tokio::sync::{mpsc, oneshot},
    tracing::{error, info, warn},
};

/// File under the data dir holding the most recently dispatched payload.
const LAST_RESPONSE_FILE: &str = "last_response.json";

/// Timeout for a single webhook post.
const POST_TIMEOUT: Duration = Duration::from_secs(30);

enum Job {
    Deliver {
        url: String,
        payload: serde_json::Value,
        headers: HashMap<String, String>,
    },
    /// Resolves once every previously enqueued job has completed.
    Flush(oneshot::Sender<()>),
}

/// Posts JSON payloads to webhook destinations, off the caller's execution
/// context.
///
/// One worker task drains an unbounded FIFO queue: enqueue order is delivery
/// order, and per payload the post happens before `last_response.json` is
/// rewritten. Delivery outcomes are logged, never surfaced.
#[derive(Clone)]
pub struct WebhookDispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl WebhookDispatcher {
    /// Spawn the delivery worker. `data_dir` must exist; the last-payload
    /// file is created inside it on first delivery.
    #[must_use]
    pub fn new(data_dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_loop(rx, data_dir));
        Self { tx }
    }

    /// Enqueue a delivery. Returns immediately; failures are logged by the
    /// worker and never reach the caller.
    pub fn send(&self, url: &str, payload: serde_json::Value, headers: &HashMap<String, String>) {
        if url.is_empty() {
            return;
        }
        let job = Job::Deliver {
            url: url.to_string(),
            payload,
            headers: headers.clone(),
        };
        if self.tx.send(job).is_err() {
            warn!(url, "webhook worker is gone, dropping payload");
        }
    }

    /// Wait until everything enqueued so far has been delivered (or failed)
    /// and persisted. Used by shutdown paths and tests.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Job::Flush(tx)).is_ok() {
            rx.await.ok();
        }
    }
}

async fn deliver_loop(mut rx: mpsc::UnboundedReceiver<Job>, data_dir: PathBuf) {
    let client = match reqwest::Client::builder().timeout(POST_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build webhook HTTP client, deliveries disabled");
            while let Some(job) = rx.recv().await {
                if let Job::Flush(done) = job {
                    done.send(()).ok();
                }
            }
            return;
        }
    };
    let last_response_path = data_dir.join(LAST_RESPONSE_FILE);

    while let Some(job) = rx.recv().await {
        match job {
            Job::Deliver {
                url,
                payload,
                headers,
            } => {
                post(&client, &url, &payload, &headers).await;
                persist_last(&last_response_path, &payload).await;
            }
            Job::Flush(done) => {
                done.send(()).ok();
            }
        }
    }
}

async fn post(
    client: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
    headers: &HashMap<String, String>,
) {
    let mut request = client.post(url).json(payload);
    for (key, value) in headers {
        request = request.header(key, value);
    }
    match request.send().await {
        Ok(response) => {
            info!(url, status = %response.status(), "sent message to webhook");
        }
        Err(e) => {
            error!(url, error = %e, "error sending to webhook");
        }
    }
}

/// Overwrite the well-known last-payload file. Operational visibility only;
/// no history is kept and write failures are swallowed.
async fn persist_last(path: &PathBuf, payload: &serde_json::Value) {
    let rendered = match serde_json::to_vec(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to serialize last response");
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, rendered).await {
        error!(path = %path.display(), error = %e, "failed to write last response");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use {
        axum::{Json, Router, extract::State, http::HeaderMap, routing::post},
        tokio::net::TcpListener,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct Received {
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
        tokens: Arc<Mutex<Vec<String>>>,
    }

    async fn start_sink(fail: bool) -> (String, Received) {
        let received = Received::default();
        let state = received.clone();
        let app = Router::new().route(
            "/hook",
            post(
                move |State(state): State<Received>,
                      headers: HeaderMap,
                      Json(body): Json<serde_json::Value>| async move {
                    state.bodies.lock().unwrap().push(body);
                    if let Some(token) = headers.get("X-Token") {
                        state
                            .tokens
                            .lock()
                            .unwrap()
                            .push(token.to_str().unwrap_or("").to_string());
                    }
                    if fail {
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR
                    } else {
                        axum::http::StatusCode::OK
                    }
                },
            ),
        );
        let app = app.with_state(received.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), received)
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order_and_persists_last() {
        let (url, received) = start_sink(false).await;
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = WebhookDispatcher::new(dir.path().to_path_buf());
        let headers = HashMap::from([("X-Token".to_string(), "t".to_string())]);

        for n in 0..3 {
            dispatcher.send(&url, serde_json::json!({"n": n}), &headers);
        }
        dispatcher.flush().await;

        let bodies = received.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 3);
        assert_eq!(bodies[0]["n"], 0);
        assert_eq!(bodies[2]["n"], 2);
        assert_eq!(received.tokens.lock().unwrap().len(), 3);

        let last = std::fs::read_to_string(dir.path().join(LAST_RESPONSE_FILE)).unwrap();
        let last: serde_json::Value = serde_json::from_str(&last).unwrap();
        assert_eq!(last["n"], 2);
    }

    #[tokio::test]
    async fn destination_failure_is_swallowed() {
        let (url, received) = start_sink(true).await;
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = WebhookDispatcher::new(dir.path().to_path_buf());

        dispatcher.send(&url, serde_json::json!({"n": 1}), &HashMap::new());
        // Unreachable destination: connection refused, also swallowed.
        dispatcher.send(
            "http://127.0.0.1:1/hook",
            serde_json::json!({"n": 2}),
            &HashMap::new(),
        );
        dispatcher.flush().await;

        // The 500 response still counts as a delivery attempt.
        assert_eq!(received.bodies.lock().unwrap().len(), 1);
        // Last payload reflects the most recent attempt, failed or not.
        let last = std::fs::read_to_string(dir.path().join(LAST_RESPONSE_FILE)).unwrap();
        assert!(last.contains("2"));
    }

    #[tokio::test]
    async fn empty_url_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = WebhookDispatcher::new(dir.path().to_path_buf());
        dispatcher.send("", serde_json::json!({"n": 1}), &HashMap::new());
        dispatcher.flush().await;
        assert!(!dir.path().join(LAST_RESPONSE_FILE).exists());
    }
}
