use tokio::sync::mpsc;

use crate::config::Config;
use crate::gemini::{ChatSession, StreamEvent};

pub const WELCOME_TEXT: &str = "Welcome to the Public Sector AI Assistant. How can I assist you with matters of governance, policy, or public administration today?";

pub const APOLOGY_TEXT: &str = "I'm sorry, but I encountered an error while processing your request. Please try again later.";

/// Placeholder text for a model turn before the first fragment arrives.
pub const LOADING_MARKER: &str = "…";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

/// The ordered turn sequence behind the chat view.
///
/// Append-only, except that the last turn's text is replaced while a reply
/// streams in. Insertion order is display order.
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
}

impl Conversation {
    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    pub fn replace_last_text(&mut self, text: &str) {
        if let Some(last) = self.turns.last_mut() {
            last.text = text.to_string();
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Where the current exchange stands. `Settled` and `Idle` gate identically;
/// the distinction only matters to the indicator and to tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    AwaitingFirstFragment,
    Streaming,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub conversation: Conversation,
    pub is_loading: bool,
    pub phase: ExchangePhase,

    // Input state
    pub input: String,
    pub cursor: usize, // char index into input

    // Chat scroll state
    pub chat_scroll: u16,
    pub chat_height: u16, // inner chat area size, updated during render
    pub chat_width: u16,

    // Animation state
    pub animation_frame: u8, // 0-2 for the ellipsis animation

    // Session handle and the fragment channel of the in-flight exchange
    pub session: ChatSession,
    pub stream_rx: Option<mpsc::Receiver<StreamEvent>>,

    pending_reply: String,
}

impl App {
    pub fn new(config: &Config, api_key: &str) -> Self {
        let session = ChatSession::new(api_key, config.model(), config.system_prompt());

        let mut conversation = Conversation::default();
        conversation.push(ChatTurn::model(WELCOME_TEXT));

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            conversation,
            is_loading: false,
            phase: ExchangePhase::Idle,

            input: String::new(),
            cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            animation_frame: 0,

            session,
            stream_rx: None,

            pending_reply: String::new(),
        }
    }

    /// Send the current input as a new exchange.
    ///
    /// A no-op while a send is in flight or when the input trims to empty;
    /// single-flight is a correctness requirement, not a nicety, because a
    /// second stream would race on replace-last-turn.
    pub fn submit(&mut self) {
        if self.is_loading {
            return;
        }
        let message = self.input.trim().to_string();
        if message.is_empty() {
            return;
        }
        self.input.clear();
        self.cursor = 0;

        self.conversation.push(ChatTurn::user(&message));
        self.is_loading = true;
        self.phase = ExchangePhase::AwaitingFirstFragment;
        self.pending_reply.clear();

        self.stream_rx = Some(self.session.send_streaming(&message));
        self.conversation.push(ChatTurn::model(LOADING_MARKER));
        self.scroll_chat_to_bottom();
    }

    /// Apply one event of the in-flight stream, in receipt order.
    pub fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Fragment(text) => {
                self.phase = ExchangePhase::Streaming;
                self.pending_reply.push_str(&text);
                self.conversation.replace_last_text(&self.pending_reply);
                self.scroll_chat_to_bottom();
            }
            StreamEvent::Done => {
                let reply = std::mem::take(&mut self.pending_reply);
                self.session.record_reply(&reply);
                self.settle();
            }
            StreamEvent::Error(_) => self.fail_exchange(),
        }
    }

    /// The fragment channel closed without a terminal event. Treated as a
    /// stream failure so the in-flight flag cannot stay stuck.
    pub fn on_stream_closed(&mut self) {
        if self.is_loading {
            self.fail_exchange();
        } else {
            self.stream_rx = None;
        }
    }

    /// Surface a failure as the fixed apology turn and swallow the error.
    /// Partial text already shown is overwritten; text from earlier,
    /// completed exchanges is untouched.
    fn fail_exchange(&mut self) {
        let streaming_placeholder = self.is_loading
            && self.conversation.last().map(|t| t.role) == Some(Role::Model);
        if streaming_placeholder {
            self.conversation.replace_last_text(APOLOGY_TEXT);
        } else {
            self.conversation.push(ChatTurn::model(APOLOGY_TEXT));
        }
        self.session.discard_failed_exchange();
        self.settle();
    }

    fn settle(&mut self) {
        self.phase = ExchangePhase::Settled;
        self.is_loading = false;
        self.stream_rx = None;
        self.scroll_chat_to_bottom();
    }

    /// Tick animation frame (driven by the Tick event).
    pub fn tick_animation(&mut self) {
        if self.is_loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Chat scrolling
    pub fn scroll_down(&mut self) {
        let max_scroll = self.estimated_chat_lines().saturating_sub(self.chat_height);
        if self.chat_scroll < max_scroll {
            self.chat_scroll = self.chat_scroll.saturating_add(1);
        }
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_half_page_down(&mut self) {
        let half_page = self.chat_height / 2;
        let max_scroll = self.estimated_chat_lines().saturating_sub(self.chat_height);
        self.chat_scroll = (self.chat_scroll + half_page).min(max_scroll);
    }

    pub fn scroll_half_page_up(&mut self) {
        let half_page = self.chat_height / 2;
        self.chat_scroll = self.chat_scroll.saturating_sub(half_page);
    }

    pub fn scroll_to_top(&mut self) {
        self.chat_scroll = 0;
    }

    /// Keep the newest turn visible after every conversation update.
    pub fn scroll_chat_to_bottom(&mut self) {
        let total_lines = self.estimated_chat_lines();
        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };

        if total_lines > visible_height {
            self.chat_scroll = total_lines.saturating_sub(visible_height);
        } else {
            self.chat_scroll = 0;
        }
    }

    /// Rough wrapped line count of the rendered conversation, good enough
    /// for stick-to-bottom scrolling.
    fn estimated_chat_lines(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for turn in self.conversation.turns() {
            total_lines += 1; // role line
            for line in turn.text.lines() {
                // Character count, not byte length, so UTF-8 wraps right.
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1;
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // blank line after each turn
        }

        if self.is_loading && self.conversation.last().map(|t| t.role) == Some(Role::User) {
            total_lines += 2; // role line + typing indicator
        }

        total_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> App {
        App::new(&Config::default(), "test-key")
    }

    fn last_text(app: &App) -> &str {
        &app.conversation.last().unwrap().text
    }

    #[test]
    fn starts_with_one_welcome_turn() {
        let app = test_app();
        assert_eq!(app.conversation.len(), 1);
        assert_eq!(app.conversation.last().unwrap().role, Role::Model);
        assert_eq!(last_text(&app), WELCOME_TEXT);
        assert!(!app.is_loading);
        assert_eq!(app.phase, ExchangePhase::Idle);
    }

    #[tokio::test]
    async fn submit_appends_user_turn_then_placeholder() {
        let mut app = test_app();
        app.input = "What is a FOIA request?".to_string();
        app.submit();

        assert!(app.is_loading);
        assert_eq!(app.phase, ExchangePhase::AwaitingFirstFragment);
        assert_eq!(app.conversation.len(), 3);

        let turns = app.conversation.turns();
        assert_eq!(turns[1].role, Role::User);
        assert_eq!(turns[1].text, "What is a FOIA request?");
        assert_eq!(turns[2].role, Role::Model);
        assert_eq!(turns[2].text, LOADING_MARKER);
        assert!(app.input.is_empty());
    }

    #[tokio::test]
    async fn submit_trims_whitespace() {
        let mut app = test_app();
        app.input = "  hello  ".to_string();
        app.submit();
        assert_eq!(app.conversation.turns()[1].text, "hello");
    }

    #[test]
    fn blank_submit_is_a_noop() {
        let mut app = test_app();
        app.input = "   ".to_string();
        app.submit();
        assert_eq!(app.conversation.len(), 1);
        assert!(!app.is_loading);
    }

    #[tokio::test]
    async fn submit_while_in_flight_is_a_noop() {
        let mut app = test_app();
        app.input = "first".to_string();
        app.submit();
        let len = app.conversation.len();

        app.input = "second".to_string();
        app.submit();
        assert_eq!(app.conversation.len(), len);
        assert_eq!(app.input, "second");
    }

    #[tokio::test]
    async fn fragments_accumulate_in_order() {
        let mut app = test_app();
        app.input = "hi".to_string();
        app.submit();

        app.on_stream_event(StreamEvent::Fragment("Hello".to_string()));
        assert_eq!(app.phase, ExchangePhase::Streaming);
        assert_eq!(last_text(&app), "Hello");

        app.on_stream_event(StreamEvent::Fragment(" world".to_string()));
        assert_eq!(last_text(&app), "Hello world");

        app.on_stream_event(StreamEvent::Done);
        assert_eq!(last_text(&app), "Hello world");
        assert!(!app.is_loading);
        assert_eq!(app.phase, ExchangePhase::Settled);
        assert!(app.stream_rx.is_none());
    }

    #[tokio::test]
    async fn streamed_answer_replaces_placeholder_turns() {
        let mut app = test_app();
        app.input = "What is a FOIA request?".to_string();
        app.submit();

        for fragment in ["FOIA ", "stands for ...", ""] {
            app.on_stream_event(StreamEvent::Fragment(fragment.to_string()));
        }
        app.on_stream_event(StreamEvent::Done);

        let turns = app.conversation.turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].text, "What is a FOIA request?");
        assert_eq!(turns[2].text, "FOIA stands for ...");
    }

    #[tokio::test]
    async fn error_before_any_fragment_shows_apology() {
        let mut app = test_app();
        app.input = "hi".to_string();
        app.submit();
        let len = app.conversation.len();

        app.on_stream_event(StreamEvent::Error("boom".to_string()));

        assert_eq!(app.conversation.len(), len);
        assert_eq!(last_text(&app), APOLOGY_TEXT);
        assert!(!app.is_loading);
        assert_eq!(app.phase, ExchangePhase::Settled);
    }

    #[tokio::test]
    async fn mid_stream_error_overwrites_partial_text() {
        let mut app = test_app();
        app.input = "hi".to_string();
        app.submit();

        app.on_stream_event(StreamEvent::Fragment("partial".to_string()));
        app.on_stream_event(StreamEvent::Error("boom".to_string()));

        assert_eq!(last_text(&app), APOLOGY_TEXT);
        assert!(!app.is_loading);
    }

    #[tokio::test]
    async fn closed_channel_counts_as_failure() {
        let mut app = test_app();
        app.input = "hi".to_string();
        app.submit();

        app.on_stream_closed();
        assert_eq!(last_text(&app), APOLOGY_TEXT);
        assert!(!app.is_loading);
    }

    #[tokio::test]
    async fn next_submit_is_possible_after_settling() {
        let mut app = test_app();
        app.input = "first".to_string();
        app.submit();
        app.on_stream_event(StreamEvent::Error("boom".to_string()));

        app.input = "second".to_string();
        app.submit();
        assert!(app.is_loading);
        assert_eq!(app.phase, ExchangePhase::AwaitingFirstFragment);
        let turns = app.conversation.turns();
        assert_eq!(turns[turns.len() - 2].text, "second");
    }

    #[test]
    fn animation_only_advances_while_loading() {
        let mut app = test_app();
        app.tick_animation();
        assert_eq!(app.animation_frame, 0);

        app.is_loading = true;
        app.tick_animation();
        app.tick_animation();
        assert_eq!(app.animation_frame, 2);
        app.tick_animation();
        assert_eq!(app.animation_frame, 0);
    }
}
