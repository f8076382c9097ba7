//! Events that can occur in a conversation

use crate::attachment::FileRef;
use crate::dialog::Reply;
use crate::state_machine::state::ScenarioPrompt;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User intents
    ComposeText {
        text: String,
    },
    AttachFile {
        file: FileRef,
    },
    RemoveAttachment,
    /// `request_id` is used only when the send reaches the dialog backend
    Send {
        request_id: String,
    },
    SelectPrompt {
        prompt: ScenarioPrompt,
    },

    // Dialog backend outcomes
    ReplyReceived {
        request_id: String,
        reply: Reply,
    },
    ReplyFailed {
        request_id: String,
        message: String,
    },

    // Delayed follow-ups
    MarkRead {
        message_id: u64,
        generation: u64,
    },
    FileAcknowledged {
        generation: u64,
    },
}

impl Event {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ComposeText { .. } => "compose_text",
            Event::AttachFile { .. } => "attach_file",
            Event::RemoveAttachment => "remove_attachment",
            Event::Send { .. } => "send",
            Event::SelectPrompt { .. } => "select_prompt",
            Event::ReplyReceived { .. } => "reply_received",
            Event::ReplyFailed { .. } => "reply_failed",
            Event::MarkRead { .. } => "mark_read",
            Event::FileAcknowledged { .. } => "file_acknowledged",
        }
    }
}
