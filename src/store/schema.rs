//! Persisted layout of the conversation and its migrations

use super::StoreResult;
use crate::attachment::FileRef;
use crate::state_machine::state::{Author, Message, MessageBody, ReadState};
use crate::state_machine::ConversationState;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Key of the versioned record
pub const RECORD_KEY: &str = "widget-chat.conversation";

/// Id counter left behind by a purge, as a decimal string
pub const COUNTER_KEY: &str = "widget-chat.next-message-id";

/// Version 1 is the four-key layout below
pub const SCHEMA_VERSION: u32 = 2;

pub const LEGACY_MESSAGES_KEY: &str = "chat.messages";
pub const LEGACY_SHOW_SCENARIOS_KEY: &str = "chat.showScenarios";
pub const LEGACY_DRAFT_KEY: &str = "chat.draft";
pub const LEGACY_ATTACHMENT_KEY: &str = "chat.attachment";

pub const LEGACY_KEYS: [&str; 4] = [
    LEGACY_MESSAGES_KEY,
    LEGACY_SHOW_SCENARIOS_KEY,
    LEGACY_DRAFT_KEY,
    LEGACY_ATTACHMENT_KEY,
];

/// What gets written under [`RECORD_KEY`]
#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord<'a> {
    pub schema_version: u32,
    pub messages: &'a [Message],
    pub scenario_prompts_visible: bool,
    pub draft_text: &'a str,
    pub attachment: Option<&'a FileRef>,
    pub next_message_id: u64,
}

impl<'a> ConversationRecord<'a> {
    pub fn from_state(state: &'a ConversationState) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            messages: &state.messages,
            scenario_prompts_visible: state.scenario_prompts_visible,
            draft_text: &state.draft_text,
            attachment: state.attachment.as_ref(),
            next_message_id: state.next_message_id,
        }
    }
}

/// Where a loaded conversation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Record,
    Legacy,
    Default,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub state: ConversationState,
    pub source: LoadSource,
    /// Fields that were present but unusable
    pub warnings: Vec<String>,
}

/// Decode the versioned record; `Err` means the record as a whole is unusable
pub fn decode_record(raw: &str, now: &str) -> Result<LoadOutcome, String> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("failed to parse {RECORD_KEY}: {e}"))?;
    let Value::Object(fields) = value else {
        return Err(format!("{RECORD_KEY} is not an object"));
    };

    let version = fields.get("schema_version").and_then(Value::as_u64);
    if version != Some(u64::from(SCHEMA_VERSION)) {
        return Err(format!(
            "unknown schema_version in {RECORD_KEY}: {version:?}"
        ));
    }

    let mut warnings = Vec::new();
    let mut state = ConversationState::new(now);

    if let Some(messages) = field::<Vec<Message>>(&fields, "messages", &mut warnings) {
        match validate_messages(messages) {
            Ok(messages) => state.messages = messages,
            Err(err) => warnings.push(err),
        }
    }
    if let Some(visible) = field(&fields, "scenario_prompts_visible", &mut warnings) {
        state.scenario_prompts_visible = visible;
    }
    if let Some(draft) = field(&fields, "draft_text", &mut warnings) {
        state.draft_text = draft;
    }
    if let Some(attachment) = field::<Option<FileRef>>(&fields, "attachment", &mut warnings) {
        state.attachment = attachment;
    }
    match field::<u64>(&fields, "next_message_id", &mut warnings) {
        Some(u64::MAX) => warnings.push(format!("{RECORD_KEY}.next_message_id is exhausted")),
        Some(next_id) => state.next_message_id = next_id,
        None => {}
    }
    repair_counter(&mut state);

    Ok(LoadOutcome {
        state,
        source: LoadSource::Record,
        warnings,
    })
}

/// Raise the id counter to what a purge left behind
///
/// A default log takes its greeting id from the counter, so ids handed out
/// before the purge are never reused.
pub fn apply_counter(outcome: &mut LoadOutcome, raw: &str) {
    let next_id = match raw.trim().parse::<u64>() {
        Ok(id) if id < u64::MAX => id,
        _ => {
            outcome
                .warnings
                .push(format!("unusable {COUNTER_KEY}: {raw:?}"));
            return;
        }
    };

    let state = &mut outcome.state;
    state.next_message_id = state.next_message_id.max(next_id);
    if outcome.source == LoadSource::Default {
        let greeting_id = state.allocate_id();
        if let Some(greeting) = state.messages.first_mut() {
            greeting.id = greeting_id;
        }
    }
}

/// Decode the four-key layout, each key on its own
pub fn decode_legacy<F>(get: F, now: &str) -> LoadOutcome
where
    F: Fn(&str) -> StoreResult<Option<String>>,
{
    let mut warnings = Vec::new();
    let mut found_any = false;
    let mut read = |key: &str, warnings: &mut Vec<String>| match get(key) {
        Ok(value) => {
            found_any |= value.is_some();
            value
        }
        Err(err) => {
            warnings.push(format!("failed to read {key}: {err}"));
            None
        }
    };

    let mut state = ConversationState::new(now);

    if let Some(raw) = read(LEGACY_MESSAGES_KEY, &mut warnings) {
        let parsed = serde_json::from_str::<Vec<LegacyMessage>>(&raw)
            .map_err(|e| format!("failed to parse {LEGACY_MESSAGES_KEY}: {e}"))
            .and_then(|legacy| validate_messages(legacy.into_iter().map(Message::from).collect()));
        match parsed {
            Ok(messages) => state.messages = messages,
            Err(err) => warnings.push(err),
        }
    }
    if let Some(raw) = read(LEGACY_SHOW_SCENARIOS_KEY, &mut warnings) {
        match serde_json::from_str::<bool>(&raw) {
            Ok(visible) => state.scenario_prompts_visible = visible,
            Err(e) => warnings.push(format!("failed to parse {LEGACY_SHOW_SCENARIOS_KEY}: {e}")),
        }
    }
    // The draft was stored as a raw string, not JSON
    if let Some(raw) = read(LEGACY_DRAFT_KEY, &mut warnings) {
        state.draft_text = raw;
    }
    if let Some(raw) = read(LEGACY_ATTACHMENT_KEY, &mut warnings) {
        match serde_json::from_str::<Option<LegacyAttachment>>(&raw) {
            Ok(attachment) => state.attachment = attachment.map(FileRef::from),
            Err(e) => warnings.push(format!("failed to parse {LEGACY_ATTACHMENT_KEY}: {e}")),
        }
    }
    repair_counter(&mut state);

    LoadOutcome {
        state,
        source: if found_any {
            LoadSource::Legacy
        } else {
            LoadSource::Default
        },
        warnings,
    }
}

fn field<T: DeserializeOwned>(
    fields: &Map<String, Value>,
    name: &str,
    warnings: &mut Vec<String>,
) -> Option<T> {
    let value = fields.get(name)?;
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warnings.push(format!("failed to parse {RECORD_KEY}.{name}: {e}"));
            None
        }
    }
}

/// A usable log is non-empty with unique ids
fn validate_messages(messages: Vec<Message>) -> Result<Vec<Message>, String> {
    if messages.is_empty() {
        return Err("stored message log is empty".to_string());
    }
    // The counter must always have room for the next id
    if messages.iter().any(|m| m.id == u64::MAX) {
        return Err(format!("stored message log holds id {}", u64::MAX));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = messages.iter().find(|m| !seen.insert(m.id)) {
        return Err(format!("stored message log repeats id {}", dup.id));
    }
    Ok(messages)
}

fn repair_counter(state: &mut ConversationState) {
    let floor = state
        .messages
        .iter()
        .map(|m| m.id.saturating_add(1))
        .max()
        .unwrap_or(1);
    state.next_message_id = state.next_message_id.max(floor);
}

// ============================================================================
// Legacy shapes
// ============================================================================

/// Message in the four-key layout (camelCase, file name beside the text)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMessage {
    id: u64,
    #[serde(default)]
    text: Option<String>,
    author: Author,
    time: String,
    #[serde(default)]
    read: Option<bool>,
    #[serde(default)]
    file_name: Option<String>,
}

impl From<LegacyMessage> for Message {
    fn from(legacy: LegacyMessage) -> Self {
        let body = match legacy.file_name {
            Some(file_name) => MessageBody::File { file_name },
            None => MessageBody::Text {
                text: legacy.text.unwrap_or_default(),
            },
        };
        let read_state = match legacy.author {
            Author::User if legacy.read == Some(true) => Some(ReadState::Read),
            Author::User => Some(ReadState::Unread),
            Author::Bot => None,
        };
        Message {
            id: legacy.id,
            author: legacy.author,
            body,
            time: legacy.time,
            read_state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacyAttachment {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "type")]
    media_type: Option<String>,
}

impl From<LegacyAttachment> for FileRef {
    fn from(legacy: LegacyAttachment) -> Self {
        let mut file = FileRef::new(legacy.name, legacy.size);
        if let Some(media_type) = legacy.media_type.filter(|t| !t.is_empty()) {
            file.media_type = media_type;
        }
        file
    }
}
