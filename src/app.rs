use tracing::warn;

use crate::bridge::BridgeEvent;
use crate::config::Config;
use crate::message::{merge_fragment, Message, Role};
use crate::session::Session;

/// Modal dialogs, rendered centered over the chat. Only one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    /// A failed backend action, named so the user knows what broke.
    Error { action: String, message: String },
    /// Session reset asks before throwing the conversation away.
    ConfirmReset,
    /// Informational notice, e.g. the model cost warning.
    Notice { message: String },
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub messages: Vec<Message>,
    pub dialog: Option<Dialog>,

    // Draft input
    pub input: String,
    pub input_cursor: usize, // cursor position in chars

    // Model mode (persisted)
    pub low_cost: bool,

    // Chat viewport
    pub chat_scroll: u16,
    pub chat_height: u16, // set during render, used for scroll math
    pub chat_width: u16,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Streaming session
    pub session: Session,
}

impl App {
    pub fn new(session: Session, config: Config) -> Self {
        Self {
            should_quit: false,
            messages: Vec::new(),
            dialog: None,

            input: String::new(),
            input_cursor: 0,

            low_cost: config.low_cost,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            animation_frame: 0,

            session,
        }
    }

    pub fn is_thinking(&self) -> bool {
        self.session.is_thinking()
    }

    /// Fetch the conversation from the backend, dropping system messages
    /// from the displayed list.
    pub async fn load_history(&mut self) {
        match self.session.bridge().get_history().await {
            Ok(history) => {
                self.messages = history
                    .into_iter()
                    .filter(|m| m.role != Role::System)
                    .map(|m| Message::new(m.role, m.content))
                    .collect();
                self.scroll_to_bottom();
            }
            Err(e) => self.show_error("history fetch", &e.to_string()),
        }
    }

    /// Submit the current draft. Whitespace-only input is a no-op. The old
    /// stream is cancelled and torn down, the user message appended, a fresh
    /// listener established, and only then is the prompt issued.
    pub async fn submit(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return;
        }

        self.input.clear();
        self.input_cursor = 0;

        self.session.stop_listening();
        // Each submission is its own message; the merge reducer is only for
        // streamed fragments
        self.messages.push(Message::new(Role::User, text.as_str()));
        self.session.start_listening();
        self.scroll_to_bottom();

        if let Err(e) = self.session.prompt(&text, self.low_cost).await {
            // The user message stays; only the thinking indicator is cleared
            self.show_error("prompt", &e.to_string());
        }
    }

    /// Fold one push event into the app state. Called once per event-loop
    /// cycle, so fragments merge strictly in arrival order.
    pub fn apply_bridge_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Fragment(fragment) => {
                self.session.response_arrived();
                merge_fragment(&mut self.messages, Role::Assistant, &fragment);
                self.scroll_to_bottom();
            }
            BridgeEvent::StreamError(message) => {
                self.session.response_arrived();
                self.show_error("response stream", &message);
            }
        }
    }

    // Session reset

    pub fn request_reset(&mut self) {
        self.dialog = Some(Dialog::ConfirmReset);
    }

    pub fn decline_reset(&mut self) {
        self.dialog = None;
    }

    /// Clear the conversation: backend clears (and backs up) its history,
    /// the local list is reloaded, and a fresh listener goes up. A failed
    /// clear is surfaced but does not prevent the listener restart.
    pub async fn confirm_reset(&mut self) {
        self.dialog = None;
        self.session.stop_listening();

        match self.session.bridge().clear_history().await {
            Ok(()) => {
                self.messages.clear();
                self.load_history().await;
                self.chat_scroll = 0;
            }
            Err(e) => self.show_error("clear history", &e.to_string()),
        }

        self.session.start_listening();
    }

    // Model mode

    pub fn toggle_low_cost(&mut self) {
        self.low_cost = !self.low_cost;
        if let Err(e) = Config::save_low_cost(self.low_cost) {
            warn!("failed to persist model mode: {e}");
        }
        if !self.low_cost {
            self.dialog = Some(Dialog::Notice {
                message: "Now using GPT-4.\n\nBeware of increased costs when using this model."
                    .to_string(),
            });
        }
    }

    // Dialogs

    pub fn show_error(&mut self, action: &str, message: &str) {
        self.dialog = Some(Dialog::Error {
            action: action.to_string(),
            message: message.to_string(),
        });
    }

    pub fn dismiss_dialog(&mut self) {
        self.dialog = None;
    }

    // Chat viewport

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        let max = self.total_chat_lines().saturating_sub(self.chat_height);
        if self.chat_scroll < max {
            self.chat_scroll += 1;
        }
    }

    pub fn scroll_half_page_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(self.chat_height / 2);
    }

    pub fn scroll_half_page_down(&mut self) {
        let max = self.total_chat_lines().saturating_sub(self.chat_height);
        self.chat_scroll = (self.chat_scroll + self.chat_height / 2).min(max);
    }

    /// Pin the viewport to the newest message. Invoked explicitly after
    /// every message-list mutation rather than as a reactive side effect.
    pub fn scroll_to_bottom(&mut self) {
        let total = self.total_chat_lines();
        let visible = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        self.chat_scroll = total.saturating_sub(visible);
    }

    /// Rendered line count of the chat transcript at the current width.
    pub fn total_chat_lines(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total: u16 = 0;
        for msg in &self.messages {
            total += 1; // role line
            for line in msg.content.lines() {
                // Char count, not byte length, so UTF-8 wraps correctly
                let chars = line.chars().count();
                total += ((chars / wrap_width) + 1) as u16;
            }
            total += 1; // blank line after message
        }

        if self.is_thinking() {
            total += 2; // role line + indicator
        }

        total
    }

    /// Tick the ellipsis animation while awaiting a response.
    pub fn tick_animation(&mut self) {
        if self.is_thinking() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::spawn_backend;
    use crate::history::HistoryStore;
    use crate::openai::OpenAiClient;
    use crate::session::SessionState;

    fn app_with_backend(server_url: &str) -> (tempfile::TempDir, App) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().to_path_buf());
        let client = OpenAiClient::with_base_url("sk-test", server_url);
        let bridge = spawn_backend(store, client);
        let app = App::new(Session::new(bridge), Config::default());
        (dir, app)
    }

    #[tokio::test]
    async fn whitespace_only_submit_is_a_noop() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");
        app.session.start_listening();

        app.input = "   \n\t ".to_string();
        app.submit().await;

        assert!(app.messages.is_empty());
        assert_eq!(app.session.state, SessionState::Listening);
        assert!(app.dialog.is_none());
    }

    #[tokio::test]
    async fn failed_prompt_keeps_user_message_and_shows_error() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");
        app.session.start_listening();

        app.input = "Hi".to_string();
        app.submit().await;

        assert_eq!(app.messages.len(), 1);
        assert_eq!(app.messages[0].role, Role::User);
        assert_eq!(app.messages[0].content, "Hi");
        // Thinking cleared, error dialog names the failing action
        assert_eq!(app.session.state, SessionState::Listening);
        assert!(matches!(
            app.dialog,
            Some(Dialog::Error { ref action, .. }) if action == "prompt"
        ));
    }

    #[tokio::test]
    async fn fragments_after_user_message_build_the_reply() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");
        app.messages.push(Message::new(Role::User, "Hi"));

        app.apply_bridge_event(BridgeEvent::Fragment("Hel".to_string()));
        app.apply_bridge_event(BridgeEvent::Fragment("lo".to_string()));

        assert_eq!(app.messages.len(), 2);
        assert_eq!(app.messages[0].content, "Hi");
        assert_eq!(app.messages[1].role, Role::Assistant);
        assert_eq!(app.messages[1].content, "Hello");
    }

    #[tokio::test]
    async fn first_fragment_clears_thinking_indicator() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");
        app.session.start_listening();
        app.session.state = SessionState::AwaitingResponse;

        app.apply_bridge_event(BridgeEvent::Fragment("ok".to_string()));
        assert_eq!(app.session.state, SessionState::Listening);
    }

    #[tokio::test]
    async fn stream_error_shows_dialog_and_clears_thinking() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");
        app.session.start_listening();
        app.session.state = SessionState::AwaitingResponse;

        app.apply_bridge_event(BridgeEvent::StreamError("rate limited".to_string()));

        assert_eq!(app.session.state, SessionState::Listening);
        assert!(matches!(
            app.dialog,
            Some(Dialog::Error { ref message, .. }) if message == "rate limited"
        ));
    }

    #[tokio::test]
    async fn confirmed_reset_clears_messages_and_restarts_listener() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");
        app.session.start_listening();
        app.messages.push(Message::new(Role::User, "Hi"));
        app.messages.push(Message::new(Role::Assistant, "Hello"));

        app.request_reset();
        assert_eq!(app.dialog, Some(Dialog::ConfirmReset));

        app.confirm_reset().await;

        assert!(app.messages.is_empty());
        assert!(app.session.is_listening());
        assert_eq!(app.session.state, SessionState::Listening);
    }

    #[tokio::test]
    async fn declined_reset_leaves_everything_unchanged() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");
        app.session.start_listening();
        app.messages.push(Message::new(Role::User, "Hi"));

        app.request_reset();
        app.decline_reset();

        assert_eq!(app.messages.len(), 1);
        assert!(app.session.is_listening());
        assert!(app.dialog.is_none());
    }

    #[tokio::test]
    async fn toggling_off_low_cost_warns_about_cost() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");
        assert!(app.low_cost);

        app.toggle_low_cost();
        assert!(!app.low_cost);
        assert!(matches!(app.dialog, Some(Dialog::Notice { .. })));

        app.dismiss_dialog();
        app.toggle_low_cost();
        assert!(app.low_cost);
        assert!(app.dialog.is_none());
    }

    #[tokio::test]
    async fn system_messages_are_filtered_from_display() {
        let (_dir, mut app) = app_with_backend("http://127.0.0.1:0");

        app.load_history().await;
        // Backend seeds a system message; the display hides it
        assert!(app.messages.is_empty());
        assert!(app.dialog.is_none());
    }
}
