//! Test doubles and end-to-end runtime tests
//!
//! The widget runs for real; only the backend, clock and store are faked.

use super::traits::*;
use super::{start, WidgetEvent, WidgetHandle, WidgetParts};
use crate::attachment::AttachmentPolicy;
use crate::dialog::{DialogClient, DialogError, DialogRequest, Reply, UserIdentity};
use crate::state_machine::{ConvContext, ConversationState};
use crate::store::{KeyValueStore, MemoryKvStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

// ============================================================================
// Mock Dialog Client
// ============================================================================

/// Mock dialog client that returns queued replies
pub struct MockDialogClient {
    replies: Mutex<VecDeque<Result<Reply, DialogError>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<DialogRequest>>,
}

impl MockDialogClient {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn queue_error(&self, error: DialogError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<DialogRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockDialogClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DialogClient for MockDialogClient {
    async fn send_request(&self, request: &DialogRequest) -> Result<Reply, DialogError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DialogError::network("No mock reply queued")))
    }
}

// ============================================================================
// Gated Mock Dialog Client (for reset races)
// ============================================================================

/// Mock client that holds each request until the test releases it
pub struct GatedMockDialogClient {
    inner: MockDialogClient,
    /// Notified when a request starts
    pub request_started: Arc<Notify>,
    /// Notify to let one request complete
    pub release: Arc<Notify>,
}

impl GatedMockDialogClient {
    pub fn new() -> Self {
        Self {
            inner: MockDialogClient::new(),
            request_started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    pub fn queue_reply(&self, reply: Reply) {
        self.inner.queue_reply(reply);
    }
}

#[async_trait]
impl DialogClient for GatedMockDialogClient {
    async fn send_request(&self, request: &DialogRequest) -> Result<Reply, DialogError> {
        self.request_started.notify_one();
        self.release.notified().await;
        self.inner.send_request(request).await
    }
}

// ============================================================================
// Clock and Store Doubles
// ============================================================================

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl FixedClock {
    pub fn at(hour: u32, minute: u32) -> Self {
        Self(Local.with_ymd_and_hms(2026, 1, 15, hour, minute, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Store whose writes always fail
pub struct FailingKvStore;

impl KeyValueStore for FailingKvStore {
    fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> StoreResult<()> {
        Err(StoreError::Poisoned)
    }

    fn remove(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Poisoned)
    }
}

// ============================================================================
// Test Harness
// ============================================================================

pub const TEST_DELAY: Duration = Duration::from_millis(20);
const WAIT_LIMIT: Duration = Duration::from_secs(2);

pub fn test_context() -> ConvContext {
    ConvContext::new(TEST_DELAY, TEST_DELAY)
}

/// A started widget plus the doubles behind it
pub struct TestWidget<D> {
    pub handle: WidgetHandle,
    pub events: broadcast::Receiver<WidgetEvent>,
    pub kv: Arc<MemoryKvStore>,
    pub dialog: Arc<D>,
}

pub async fn start_test_widget<D: DialogClient + 'static>(
    kv: Arc<MemoryKvStore>,
    dialog: Arc<D>,
) -> TestWidget<D> {
    let (handle, events) = start(WidgetParts {
        context: test_context(),
        storage: KvStateStore::new(kv.clone()),
        dialog: dialog.clone(),
        clock: FixedClock::at(9, 30),
        identity: UserIdentity::new("verbose@example.com"),
        policy: AttachmentPolicy::default(),
    })
    .await;
    TestWidget {
        handle,
        events,
        kv,
        dialog,
    }
}

impl<D> TestWidget<D> {
    /// Next state matching `pred`, skipping other updates
    pub async fn wait_for_state<F>(&mut self, pred: F) -> ConversationState
    where
        F: Fn(&ConversationState) -> bool,
    {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                match self.events.recv().await {
                    Ok(WidgetEvent::StateChanged { state }) if pred(&state) => return state,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("runtime stopped"),
                }
            }
        })
        .await
        .expect("timed out waiting for state")
    }

    /// Next error message broadcast by the runtime
    pub async fn wait_for_error(&mut self) -> String {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                match self.events.recv().await {
                    Ok(WidgetEvent::Error { message }) => return message,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("runtime stopped"),
                }
            }
        })
        .await
        .expect("timed out waiting for error")
    }

    /// Round-trip a draft change so every earlier event has been processed
    pub async fn barrier(&mut self, marker: &str) -> ConversationState {
        self.handle.compose_text(marker).await.unwrap();
        let marker = marker.to_string();
        self.wait_for_state(move |s| s.draft_text == marker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::FileRef;
    use crate::state_machine::state::{
        Author, MessageBody, ReadState, ScenarioPrompt, CLARIFYING_QUESTION_TEXT, FILE_ACK_TEXT,
        GREETING_TEXT,
    };
    use crate::runtime::WidgetError;
    use crate::state_machine::TransitionError;
    use crate::store::{self, schema, LoadSource, RECORD_KEY};
    use std::collections::HashSet;

    async fn widget() -> TestWidget<MockDialogClient> {
        start_test_widget(Arc::new(MemoryKvStore::new()), Arc::new(MockDialogClient::new())).await
    }

    fn is_greeting_only(state: &ConversationState) -> bool {
        state.messages.len() == 1 && state.messages[0].text() == Some(GREETING_TEXT)
    }

    #[tokio::test]
    async fn test_initial_state_is_broadcast() {
        let mut w = widget().await;
        let state = w.wait_for_state(|_| true).await;
        assert!(is_greeting_only(&state));
        assert!(state.scenario_prompts_visible);
        assert_eq!(state.messages[0].time, "09:30");
    }

    #[tokio::test]
    async fn test_hello_hi_there_scenario() {
        let mut w = widget().await;
        w.dialog.queue_reply(Reply::new("hi there"));

        w.handle.compose_text("hello").await.unwrap();
        let before = w.wait_for_state(|s| s.draft_text == "hello").await;
        assert!(!before.pending());

        w.handle.send().await.unwrap();
        let sending = w.wait_for_state(|s| s.messages.len() == 2).await;
        assert!(sending.pending());
        assert!(sending.draft_text.is_empty());
        assert_eq!(sending.messages[1].read_state, Some(ReadState::Unread));

        let done = w
            .wait_for_state(|s| s.messages.len() == 3 && s.messages[1].is_read())
            .await;
        assert_eq!(done.messages[0].text(), Some(GREETING_TEXT));
        assert_eq!(done.messages[1].author, Author::User);
        assert_eq!(done.messages[1].text(), Some("hello"));
        assert_eq!(done.messages[2].author, Author::Bot);
        assert_eq!(done.messages[2].text(), Some("hi there"));
        assert!(!done.pending());
        assert_eq!(done.last_error, None);
        assert!(done.scenario_prompts_visible);

        let requests = w.dialog.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].text, "hello");
        assert_eq!(requests[0].email, "verbose@example.com");
    }

    #[tokio::test]
    async fn test_text_send_ids_increase_and_receipts_stick() {
        let mut w = widget().await;
        for word in ["one", "two", "three"] {
            w.dialog.queue_reply(Reply::new(format!("re: {word}")));
            w.handle.compose_text(word).await.unwrap();
            w.handle.send().await.unwrap();
            let expected = format!("re: {word}");
            w.wait_for_state(move |s| {
                !s.pending() && s.messages.last().and_then(|m| m.text()) == Some(expected.as_str())
            })
            .await;
        }

        let state = w
            .wait_for_state(|s| {
                s.messages
                    .iter()
                    .filter(|m| m.author == Author::User)
                    .all(|m| m.is_read())
            })
            .await;
        assert_eq!(state.messages.len(), 7);
        let ids: Vec<u64> = state.messages.iter().map(|m| m.id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "ids not increasing: {ids:?}");

        // Later updates never flip a receipt back
        let after = w.barrier("later").await;
        assert!(after
            .messages
            .iter()
            .filter(|m| m.author == Author::User)
            .all(|m| m.read_state == Some(ReadState::Read)));
    }

    #[tokio::test]
    async fn test_empty_send_changes_nothing() {
        let mut w = widget().await;
        w.handle.compose_text("   ").await.unwrap();
        w.handle.send().await.unwrap();

        let state = w.barrier("marker").await;
        assert!(is_greeting_only(&state));
        assert!(!state.pending());
        assert!(w.dialog.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_spec_pdf_scenario() {
        let mut w = widget().await;
        w.handle
            .attach_file(FileRef::new("spec.pdf", 1024))
            .await
            .unwrap();
        w.handle.send().await.unwrap();

        let sent = w.wait_for_state(|s| s.messages.len() == 2).await;
        assert_eq!(
            sent.messages[1].body,
            MessageBody::File {
                file_name: "spec.pdf".to_string()
            }
        );
        assert!(sent.attachment.is_none());
        assert!(!sent.pending());

        let acked = w.wait_for_state(|s| s.messages.len() == 3).await;
        assert_eq!(acked.messages[2].author, Author::Bot);
        assert_eq!(acked.messages[2].text(), Some(FILE_ACK_TEXT));
        assert!(acked.scenario_prompts_visible);
    }

    #[tokio::test]
    async fn test_file_send_appends_exactly_two_without_network() {
        let mut w = widget().await;
        w.handle
            .attach_file(FileRef::new("plan.dwg", 10))
            .await
            .unwrap();
        w.handle.send().await.unwrap();
        w.wait_for_state(|s| s.messages.len() == 3 && s.messages[1].is_read())
            .await;

        tokio::time::sleep(TEST_DELAY * 3).await;
        let state = w.barrier("marker").await;
        assert_eq!(state.messages.len(), 3);
        assert!(w.dialog.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_second_text_send_while_pending_is_rejected() {
        let dialog = Arc::new(GatedMockDialogClient::new());
        let mut w = start_test_widget(Arc::new(MemoryKvStore::new()), dialog.clone()).await;
        dialog.queue_reply(Reply::new("first answer"));

        w.handle.compose_text("first").await.unwrap();
        w.handle.send().await.unwrap();
        dialog.request_started.notified().await;

        w.handle.compose_text("second").await.unwrap();
        let rejected = w.handle.send().await;
        assert!(
            matches!(
                rejected,
                Err(WidgetError::Rejected(TransitionError::ReplyPending))
            ),
            "unexpected outcome: {rejected:?}"
        );
        let message = w.wait_for_error().await;
        assert!(message.contains("pending"), "unexpected error: {message}");

        // The rejected draft stays for a later retry
        let state = w.barrier("second").await;
        assert_eq!(state.messages.len(), 2);

        dialog.release.notify_one();
        let done = w.wait_for_state(|s| !s.pending()).await;
        assert_eq!(done.messages.last().and_then(|m| m.text()), Some("first answer"));
        assert_eq!(done.draft_text, "second");
    }

    #[tokio::test]
    async fn test_new_conversation_purges_store() {
        let kv = Arc::new(MemoryKvStore::new());
        for key in schema::LEGACY_KEYS {
            kv.set(key, "null").unwrap();
        }
        kv.set(schema::LEGACY_DRAFT_KEY, "old draft").unwrap();

        let mut w = start_test_widget(kv.clone(), Arc::new(MockDialogClient::new())).await;
        w.dialog.queue_reply(Reply::new("answer"));
        w.handle.compose_text("question").await.unwrap();
        w.handle.send().await.unwrap();
        w.wait_for_state(|s| s.messages.len() == 3).await;
        w.handle
            .attach_file(FileRef::new("a.txt", 1))
            .await
            .unwrap();
        w.handle.compose_text("draft").await.unwrap();
        w.wait_for_state(|s| s.draft_text == "draft").await;

        w.handle
            .select_prompt(ScenarioPrompt::NewConversation)
            .await
            .unwrap();
        let reset = w.wait_for_state(|s| s.generation == 1).await;
        assert!(is_greeting_only(&reset));
        assert!(reset.draft_text.is_empty());
        assert!(reset.attachment.is_none());
        assert!(reset.scenario_prompts_visible);
        assert!(reset.messages[0].id > 3, "greeting reused an old id");

        // Only the id counter outlives the purge
        assert_eq!(kv.len(), 1, "store still holds {} keys", kv.len());
        assert!(kv.get(RECORD_KEY).unwrap().is_none());
        for key in schema::LEGACY_KEYS {
            assert!(kv.get(key).unwrap().is_none(), "{key} survived the purge");
        }
        let reloaded = store::load_conversation(kv.as_ref(), "10:00");
        assert_eq!(reloaded.source, LoadSource::Default);
        assert!(is_greeting_only(&reloaded.state));
        assert!(reloaded.state.messages[0].id > reset.messages[0].id);
        assert!(reloaded.state.draft_text.is_empty());
        assert!(reloaded.state.attachment.is_none());
        assert!(reloaded.state.scenario_prompts_visible);
    }

    #[tokio::test]
    async fn test_intent_returns_after_store_write() {
        let w = widget().await;

        w.handle.compose_text("draft").await.unwrap();
        assert!(w.kv.get(RECORD_KEY).unwrap().is_some());
        let stored = store::load_conversation(w.kv.as_ref(), "10:00");
        assert_eq!(stored.source, LoadSource::Record);
        assert_eq!(stored.state.draft_text, "draft");

        w.handle
            .attach_file(FileRef::new("a.pdf", 5))
            .await
            .unwrap();
        let stored = store::load_conversation(w.kv.as_ref(), "10:00");
        assert_eq!(stored.state.attachment.map(|f| f.name), Some("a.pdf".to_string()));

        w.handle
            .select_prompt(ScenarioPrompt::NewConversation)
            .await
            .unwrap();
        assert!(w.kv.get(RECORD_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_are_not_reused_after_reset_and_restart() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut first = start_test_widget(kv.clone(), Arc::new(MockDialogClient::new())).await;
        first.dialog.queue_reply(Reply::new("answer"));
        first.handle.compose_text("hello").await.unwrap();
        first.handle.send().await.unwrap();
        let before = first.wait_for_state(|s| s.messages.len() == 3).await;
        first
            .handle
            .select_prompt(ScenarioPrompt::NewConversation)
            .await
            .unwrap();
        let reset = first.wait_for_state(|s| s.generation == 1).await;
        let mut used: HashSet<u64> = before.messages.iter().map(|m| m.id).collect();
        used.insert(reset.messages[0].id);
        drop(first);

        let mut second = start_test_widget(kv, Arc::new(MockDialogClient::new())).await;
        second.dialog.queue_reply(Reply::new("again"));
        let restored = second.wait_for_state(|_| true).await;
        assert!(is_greeting_only(&restored));
        second.handle.compose_text("hello again").await.unwrap();
        second.handle.send().await.unwrap();
        let after = second.wait_for_state(|s| s.messages.len() == 3).await;

        for message in &after.messages {
            assert!(!used.contains(&message.id), "id {} was reused", message.id);
        }
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut first = start_test_widget(kv.clone(), Arc::new(MockDialogClient::new())).await;
        first
            .handle
            .select_prompt(ScenarioPrompt::Other)
            .await
            .unwrap();
        first
            .handle
            .attach_file(FileRef::new("a.pdf", 5))
            .await
            .unwrap();
        first.handle.compose_text("unsent").await.unwrap();
        let saved = first.wait_for_state(|s| s.draft_text == "unsent").await;
        assert_eq!(
            saved.messages.last().and_then(|m| m.text()),
            Some(CLARIFYING_QUESTION_TEXT)
        );
        drop(first);

        let mut second = start_test_widget(kv, Arc::new(MockDialogClient::new())).await;
        let restored = second.wait_for_state(|_| true).await;
        assert_eq!(restored.messages, saved.messages);
        assert_eq!(restored.draft_text, saved.draft_text);
        assert_eq!(restored.attachment, saved.attachment);
        assert_eq!(
            restored.scenario_prompts_visible,
            saved.scenario_prompts_visible
        );
    }

    #[tokio::test]
    async fn test_reply_after_reset_is_discarded() {
        let dialog = Arc::new(GatedMockDialogClient::new());
        let mut w = start_test_widget(Arc::new(MemoryKvStore::new()), dialog.clone()).await;
        dialog.queue_reply(Reply::new("too late"));

        w.handle.compose_text("hello").await.unwrap();
        w.handle.send().await.unwrap();
        dialog.request_started.notified().await;

        w.handle
            .select_prompt(ScenarioPrompt::NewConversation)
            .await
            .unwrap();
        let reset = w.wait_for_state(|s| s.generation == 1).await;
        assert!(!reset.pending());

        dialog.release.notify_one();
        tokio::time::sleep(TEST_DELAY * 3).await;
        let state = w.barrier("marker").await;
        assert!(is_greeting_only(&state));
        assert_eq!(state.last_error, None);
    }

    #[tokio::test]
    async fn test_timers_do_not_outlive_reset() {
        let mut w = widget().await;
        w.handle
            .attach_file(FileRef::new("spec.pdf", 1))
            .await
            .unwrap();
        w.handle.send().await.unwrap();
        w.handle
            .select_prompt(ScenarioPrompt::NewConversation)
            .await
            .unwrap();
        w.wait_for_state(|s| s.generation == 1).await;

        tokio::time::sleep(TEST_DELAY * 4).await;
        let state = w.barrier("marker").await;
        assert!(is_greeting_only(&state));
        assert!(state
            .messages
            .iter()
            .all(|m| m.text() != Some(FILE_ACK_TEXT)));
    }

    #[tokio::test]
    async fn test_rejected_payload_sets_last_error() {
        let mut w = widget().await;
        w.dialog.queue_error(DialogError::rejected("quota exceeded"));
        w.handle.compose_text("hello").await.unwrap();
        w.handle.send().await.unwrap();

        let state = w.wait_for_state(|s| s.last_error.is_some()).await;
        assert_eq!(state.last_error.as_deref(), Some("quota exceeded"));
        assert!(!state.pending());
        assert_eq!(state.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_legacy_keys_load_and_migrate() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(
            schema::LEGACY_MESSAGES_KEY,
            r#"[
                {"id": 1, "text": "Добрый день! Чем могу помочь?", "author": "bot", "time": "08:00"},
                {"id": 7, "text": "старый вопрос", "author": "user", "time": "08:01", "read": true}
            ]"#,
        )
        .unwrap();
        kv.set(schema::LEGACY_SHOW_SCENARIOS_KEY, "maybe").unwrap();
        kv.set(schema::LEGACY_DRAFT_KEY, "черновик").unwrap();

        let mut w = start_test_widget(kv.clone(), Arc::new(MockDialogClient::new())).await;
        let loaded = w.wait_for_state(|_| true).await;
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].text(), Some("старый вопрос"));
        assert!(loaded.messages[1].is_read());
        assert!(loaded.scenario_prompts_visible);
        assert_eq!(loaded.draft_text, "черновик");
        assert!(loaded.attachment.is_none());

        // The first write replaces the old keys with the record
        w.barrier("новый").await;
        assert!(kv.get(RECORD_KEY).unwrap().is_some());
        for key in schema::LEGACY_KEYS {
            assert_eq!(kv.get(key).unwrap(), None, "{key} left behind");
        }

        w.dialog.queue_reply(Reply::new("ok"));
        w.handle.send().await.unwrap();
        let sent = w.wait_for_state(|s| s.messages.len() == 3).await;
        assert!(sent.messages[2].id > 7, "id {} collides", sent.messages[2].id);
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported_not_fatal() {
        let (handle, mut events) = start(WidgetParts {
            context: test_context(),
            storage: KvStateStore::new(FailingKvStore),
            dialog: MockDialogClient::new(),
            clock: FixedClock::at(9, 30),
            identity: UserIdentity::new("verbose@example.com"),
            policy: AttachmentPolicy::default(),
        })
        .await;

        handle.compose_text("draft").await.unwrap();
        let mut saw_error = false;
        let mut saw_state = false;
        while !(saw_error && saw_state) {
            match tokio::time::timeout(WAIT_LIMIT, events.recv())
                .await
                .expect("timed out")
                .unwrap()
            {
                WidgetEvent::Error { message } => {
                    assert!(message.contains("Failed to save"));
                    saw_error = true;
                }
                WidgetEvent::StateChanged { state } => {
                    saw_state |= state.draft_text == "draft";
                }
            }
        }
    }

    #[tokio::test]
    async fn test_oversized_attachment_never_reaches_runtime() {
        let mut w = widget().await;
        let err = w
            .handle
            .attach_file(FileRef::new("huge.zip", 6 * 1024 * 1024))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::runtime::WidgetError::Attachment(_)));

        let state = w.barrier("marker").await;
        assert!(state.attachment.is_none());
    }

    #[tokio::test]
    async fn test_dropped_files_keep_first() {
        let mut w = widget().await;
        w.handle
            .attach_dropped(vec![FileRef::new("first.png", 1), FileRef::new("second.png", 1)])
            .await
            .unwrap();
        let state = w.wait_for_state(|s| s.attachment.is_some()).await;
        assert_eq!(state.attachment.unwrap().name, "first.png");

        w.handle.remove_attachment().await.unwrap();
        let state = w.wait_for_state(|s| s.attachment.is_none()).await;
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_runtime() {
        let TestWidget {
            handle, mut events, ..
        } = widget().await;
        drop(handle);

        let closed = tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                if let Err(broadcast::error::RecvError::Closed) = events.recv().await {
                    return;
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "runtime kept running without handles");
    }
}
