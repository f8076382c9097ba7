//! Conversation state types

use crate::attachment::FileRef;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Greeting shown at the top of every fresh conversation
pub const GREETING_TEXT: &str = "Добрый день! Чем могу помочь?";

/// Bot acknowledgment appended after a file is sent
pub const FILE_ACK_TEXT: &str = "Ожидайте ответа специалиста.";

/// Bot question appended when the user picks the "other" prompt
pub const CLARIFYING_QUESTION_TEXT: &str = "Опишите, пожалуйста, ваш вопрос подробнее.";

// ============================================================================
// Messages
// ============================================================================

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Bot,
}

/// Delivery receipt of a user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadState {
    Unread,
    Read,
}

/// Message payload: free text or a sent file, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    File { file_name: String },
}

/// One entry of the conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub author: Author,
    pub body: MessageBody,
    /// Creation time formatted as `HH:MM`
    pub time: String,
    /// Only user messages carry a receipt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_state: Option<ReadState>,
}

impl Message {
    pub fn bot_text(id: u64, text: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            id,
            author: Author::Bot,
            body: MessageBody::Text { text: text.into() },
            time: time.into(),
            read_state: None,
        }
    }

    pub fn user_text(id: u64, text: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            id,
            author: Author::User,
            body: MessageBody::Text { text: text.into() },
            time: time.into(),
            read_state: Some(ReadState::Unread),
        }
    }

    pub fn user_file(id: u64, file_name: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            id,
            author: Author::User,
            body: MessageBody::File {
                file_name: file_name.into(),
            },
            time: time.into(),
            read_state: Some(ReadState::Unread),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { text } => Some(text),
            MessageBody::File { .. } => None,
        }
    }

    pub fn is_read(&self) -> bool {
        self.read_state == Some(ReadState::Read)
    }
}

// ============================================================================
// Scenario prompts
// ============================================================================

/// Fixed quick-reply menu, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioPrompt {
    RunTests,
    ProjectDocumentation,
    CreateConstructionObject,
    DocumentEditor,
    SourceData,
    Other,
    NewConversation,
}

impl ScenarioPrompt {
    pub const ALL: [ScenarioPrompt; 7] = [
        ScenarioPrompt::RunTests,
        ScenarioPrompt::ProjectDocumentation,
        ScenarioPrompt::CreateConstructionObject,
        ScenarioPrompt::DocumentEditor,
        ScenarioPrompt::SourceData,
        ScenarioPrompt::Other,
        ScenarioPrompt::NewConversation,
    ];

    /// Button caption, also the draft text for ordinary prompts
    pub fn text(self) -> &'static str {
        match self {
            ScenarioPrompt::RunTests => "Запустить тестирование",
            ScenarioPrompt::ProjectDocumentation => "Настройка проектной документации",
            ScenarioPrompt::CreateConstructionObject => "Создание объекта строительства",
            ScenarioPrompt::DocumentEditor => "Работа с редактором документов",
            ScenarioPrompt::SourceData => "Заполнение Исходных данных",
            ScenarioPrompt::Other => "Другое",
            ScenarioPrompt::NewConversation => "Начать новый чат",
        }
    }

    /// 1-based position in the menu
    pub fn from_index(index: usize) -> Option<Self> {
        index
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i))
            .copied()
    }
}

// ============================================================================
// Conversation State
// ============================================================================

/// Remote reply status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvPhase {
    /// No request outstanding
    #[default]
    Idle,
    /// Text sent, waiting for the dialog backend
    Sending { request_id: String },
}

/// The conversation aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub draft_text: String,
    pub attachment: Option<FileRef>,
    pub scenario_prompts_visible: bool,
    pub phase: ConvPhase,
    pub last_error: Option<String>,
    /// Bumped on every reset; delayed follow-ups carry the value they saw
    pub generation: u64,
    pub next_message_id: u64,
}

impl ConversationState {
    /// Fresh conversation: a single greeting with prompts visible
    pub fn new(time: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::bot_text(1, GREETING_TEXT, time)],
            draft_text: String::new(),
            attachment: None,
            scenario_prompts_visible: true,
            phase: ConvPhase::Idle,
            last_error: None,
            generation: 0,
            next_message_id: 2,
        }
    }

    /// Whether a dialog reply is in flight
    pub fn pending(&self) -> bool {
        !matches!(self.phase, ConvPhase::Idle)
    }

    pub fn in_flight_request(&self) -> Option<&str> {
        match &self.phase {
            ConvPhase::Sending { request_id } => Some(request_id),
            ConvPhase::Idle => None,
        }
    }

    pub fn message(&self, id: u64) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Hand out the next message id, never reused
    pub(crate) fn allocate_id(&mut self) -> u64 {
        let floor = self
            .messages
            .iter()
            .map(|m| m.id.saturating_add(1))
            .max()
            .unwrap_or(1);
        let id = self.next_message_id.max(floor);
        self.next_message_id = id.saturating_add(1);
        id
    }
}

/// Context for a conversation (immutable configuration)
#[derive(Debug, Clone)]
pub struct ConvContext {
    /// Delay before a sent user message flips to read
    pub read_receipt_delay: Duration,
    /// Delay before the bot acknowledges a sent file
    pub file_ack_delay: Duration,
}

/// Default delay for both follow-ups
pub const DEFAULT_FOLLOW_UP_DELAY: Duration = Duration::from_millis(1000);

impl Default for ConvContext {
    fn default() -> Self {
        Self {
            read_receipt_delay: DEFAULT_FOLLOW_UP_DELAY,
            file_ack_delay: DEFAULT_FOLLOW_UP_DELAY,
        }
    }
}

impl ConvContext {
    pub fn new(read_receipt_delay: Duration, file_ack_delay: Duration) -> Self {
        Self {
            read_receipt_delay,
            file_ack_delay,
        }
    }
}
