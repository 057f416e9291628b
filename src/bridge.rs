use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::history::{HistoryMessage, HistoryStore};
use crate::message::Role;
use crate::openai::{select_model, OpenAiClient};

/// Push events delivered to the active listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// One incremental piece of assistant-generated text.
    Fragment(String),
    /// A stream-level failure, described for the user.
    StreamError(String),
}

/// The active subscription to the backend's push-event stream. Owned by the
/// session controller; dropping it releases the subscription.
pub struct Listener {
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl Listener {
    pub async fn next(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }
}

enum Request {
    GetHistory {
        reply: oneshot::Sender<Result<Vec<HistoryMessage>>>,
    },
    Prompt {
        text: String,
        low_cost: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearHistory {
        reply: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        events: mpsc::UnboundedSender<BridgeEvent>,
    },
    CancelStream,
}

/// Cloneable handle to the backend task.
#[derive(Clone)]
pub struct Bridge {
    tx: mpsc::UnboundedSender<Request>,
}

impl Bridge {
    pub async fn get_history(&self) -> Result<Vec<HistoryMessage>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::GetHistory { reply })
            .map_err(|_| anyhow!("backend is gone"))?;
        rx.await.map_err(|_| anyhow!("backend dropped the request"))?
    }

    /// Issue a prompt. Resolves once the response stream has started;
    /// fragments arrive on the subscribed listener.
    pub async fn prompt(&self, text: &str, low_cost: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Prompt {
                text: text.to_string(),
                low_cost,
                reply,
            })
            .map_err(|_| anyhow!("backend is gone"))?;
        rx.await.map_err(|_| anyhow!("backend dropped the request"))?
    }

    pub async fn clear_history(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::ClearHistory { reply })
            .map_err(|_| anyhow!("backend is gone"))?;
        rx.await.map_err(|_| anyhow!("backend dropped the request"))?
    }

    /// Subscribe to push events, replacing any previous subscriber.
    pub fn subscribe(&self) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.tx.send(Request::Subscribe { events: tx }).is_err() {
            warn!("subscribe failed: backend is gone");
        }
        Listener { rx }
    }

    /// Best-effort signal asking the backend to stop the in-flight stream.
    pub fn cancel_stream(&self) {
        if self.tx.send(Request::CancelStream).is_err() {
            warn!("cancel-stream signal failed: backend is gone");
        }
    }
}

/// Spawn the backend task and return a handle to it.
pub fn spawn_backend(store: HistoryStore, client: OpenAiClient) -> Bridge {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(backend_loop(rx, store, client));
    Bridge { tx }
}

async fn backend_loop(
    mut rx: mpsc::UnboundedReceiver<Request>,
    store: HistoryStore,
    client: OpenAiClient,
) {
    let store = Arc::new(store);
    // The stream task emits to whoever is subscribed at delivery time, like a
    // window broadcast. A fragment produced before cancellation takes effect
    // can therefore reach a fresh subscriber; that race is accepted.
    let subscriber: Arc<Mutex<Option<mpsc::UnboundedSender<BridgeEvent>>>> =
        Arc::new(Mutex::new(None));
    // Serializes history read-modify-write across overlapping prompts.
    let prompt_lock = Arc::new(tokio::sync::Mutex::new(()));
    let mut active_cancel = Arc::new(AtomicBool::new(false));

    while let Some(request) = rx.recv().await {
        match request {
            Request::GetHistory { reply } => {
                let _ = reply.send(store.read().map(|h| h.history));
            }
            Request::ClearHistory { reply } => {
                let _ = reply.send(store.clear());
            }
            Request::Subscribe { events } => {
                if let Ok(mut guard) = subscriber.lock() {
                    *guard = Some(events);
                }
            }
            Request::CancelStream => {
                debug!("cancel-stream received");
                active_cancel.store(true, Ordering::SeqCst);
            }
            Request::Prompt {
                text,
                low_cost,
                reply,
            } => {
                let cancel = Arc::new(AtomicBool::new(false));
                active_cancel = cancel.clone();
                let started = start_prompt(
                    store.clone(),
                    client.clone(),
                    subscriber.clone(),
                    prompt_lock.clone(),
                    cancel,
                    text,
                    low_cost,
                )
                .await;
                let _ = reply.send(started);
            }
        }
    }
}

/// Read history, append the user message, and kick off the response stream.
/// Returns once the stream is established; the fragment pump runs detached.
async fn start_prompt(
    store: Arc<HistoryStore>,
    client: OpenAiClient,
    subscriber: Arc<Mutex<Option<mpsc::UnboundedSender<BridgeEvent>>>>,
    prompt_lock: Arc<tokio::sync::Mutex<()>>,
    cancel: Arc<AtomicBool>,
    text: String,
    low_cost: bool,
) -> Result<()> {
    let lock = prompt_lock.lock_owned().await;

    let mut history = store.read()?;
    history.history.push(HistoryMessage::new(Role::User, text));

    let model = select_model(low_cost);
    let mut stream = client.stream_chat(model, &history.history).await?;

    tokio::spawn(async move {
        let _lock = lock;
        let mut response_buffer = String::new();

        while let Some(item) = stream.recv().await {
            if cancel.load(Ordering::SeqCst) {
                debug!("stream cancelled after {} chars", response_buffer.len());
                break;
            }
            match item {
                Ok(fragment) => {
                    response_buffer.push_str(&fragment);
                    emit(&subscriber, BridgeEvent::Fragment(fragment));
                }
                Err(e) => {
                    emit(&subscriber, BridgeEvent::StreamError(e.to_string()));
                    break;
                }
            }
        }

        // Persist whatever arrived, partial responses included
        history
            .history
            .push(HistoryMessage::new(Role::Assistant, response_buffer));
        if let Err(e) = store.write(&history) {
            error!("failed to write history: {e}");
        }
    });

    Ok(())
}

fn emit(
    subscriber: &Arc<Mutex<Option<mpsc::UnboundedSender<BridgeEvent>>>>,
    event: BridgeEvent,
) {
    let Ok(guard) = subscriber.lock() else {
        return;
    };
    if let Some(tx) = guard.as_ref() {
        // A closed receiver just means the listener was torn down
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SYSTEM_MESSAGE;

    fn test_backend(server_url: &str) -> (tempfile::TempDir, Bridge) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().to_path_buf());
        let client = OpenAiClient::with_base_url("sk-test", server_url);
        let bridge = spawn_backend(store, client);
        (dir, bridge)
    }

    #[tokio::test]
    async fn get_history_returns_seeded_session() {
        let (_dir, bridge) = test_backend("http://127.0.0.1:0");
        let history = bridge.get_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, SYSTEM_MESSAGE);
    }

    #[tokio::test]
    async fn prompt_streams_fragments_to_subscriber_and_persists() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        );
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let (_dir, bridge) = test_backend(&server.url());
        let mut listener = bridge.subscribe();
        bridge.prompt("Hi", true).await.unwrap();

        assert_eq!(
            listener.next().await,
            Some(BridgeEvent::Fragment("Hel".to_string()))
        );
        assert_eq!(
            listener.next().await,
            Some(BridgeEvent::Fragment("lo".to_string()))
        );

        // History gains the user message and the full assistant response
        let mut history = bridge.get_history().await.unwrap();
        for _ in 0..50 {
            if history.len() == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            history = bridge.get_history().await.unwrap();
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, Role::User);
        assert_eq!(history[1].content, "Hi");
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].content, "Hello");
    }

    #[tokio::test]
    async fn failed_prompt_reports_request_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let (_dir, bridge) = test_backend(&server.url());
        let err = bridge.prompt("Hi", true).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn clear_history_resets_to_seeded_session() {
        let (_dir, bridge) = test_backend("http://127.0.0.1:0");
        bridge.clear_history().await.unwrap();
        let history = bridge.get_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
    }

    #[tokio::test]
    async fn resubscribe_replaces_previous_listener() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        );
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let (_dir, bridge) = test_backend(&server.url());
        let mut stale = bridge.subscribe();
        let mut fresh = bridge.subscribe();
        bridge.prompt("Hi", true).await.unwrap();

        assert_eq!(
            fresh.next().await,
            Some(BridgeEvent::Fragment("x".to_string()))
        );
        // The stale listener's channel is closed, not double-delivered
        assert_eq!(stale.next().await, None);
    }
}
