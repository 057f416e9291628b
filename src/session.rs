use anyhow::Result;
use tracing::debug;

use crate::bridge::{Bridge, BridgeEvent, Listener};

/// Where the streaming session currently stands.
///
/// `AwaitingResponse` covers the gap between issuing a prompt and the first
/// fragment arriving; the UI shows the thinking indicator while in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    AwaitingResponse,
}

/// Owns the push-event subscription and tracks the stream lifecycle. The
/// listener is acquired on start/restart and released on teardown; it never
/// outlives the controller.
pub struct Session {
    bridge: Bridge,
    listener: Option<Listener>,
    pub state: SessionState,
}

impl Session {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            bridge,
            listener: None,
            state: SessionState::Idle,
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn is_thinking(&self) -> bool {
        self.state == SessionState::AwaitingResponse
    }

    /// Tear down any existing subscription and establish a fresh one.
    pub fn start_listening(&mut self) {
        if self.listener.is_some() {
            self.stop_listening();
        }
        self.listener = Some(self.bridge.subscribe());
        self.state = SessionState::Listening;
    }

    /// Signal cancellation to the backend and release the subscription.
    /// Cancellation is cooperative; the backend may still produce a stale
    /// fragment before it takes effect.
    pub fn stop_listening(&mut self) {
        if self.listener.take().is_some() {
            self.bridge.cancel_stream();
            debug!("listener released");
        }
        self.state = SessionState::Idle;
    }

    /// Issue the prompt request for an already-appended user message. On
    /// failure the thinking indicator is cleared and the error propagates;
    /// the user message is not rolled back.
    pub async fn prompt(&mut self, text: &str, low_cost: bool) -> Result<()> {
        self.state = SessionState::AwaitingResponse;
        match self.bridge.prompt(text, low_cost).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = SessionState::Listening;
                Err(e)
            }
        }
    }

    /// First fragment arrived (or the stream failed): back to plain listening.
    pub fn response_arrived(&mut self) {
        if self.state == SessionState::AwaitingResponse {
            self.state = SessionState::Listening;
        }
    }

    /// Wait for the next push event. Resolves to `None` when there is no
    /// active listener or the backend closed the subscription.
    pub async fn next_event(&mut self) -> Option<BridgeEvent> {
        match self.listener.as_mut() {
            Some(listener) => match listener.next().await {
                Some(event) => Some(event),
                None => {
                    // Backend replaced or dropped the subscription
                    self.listener = None;
                    self.state = SessionState::Idle;
                    None
                }
            },
            None => None,
        }
    }
}
