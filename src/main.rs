//! Widget Chat - terminal front end
//!
//! Line-based stand-in for the embedded widget: plain lines are sent as
//! text, slash commands drive attachments and the prompt menu.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use widget_chat::attachment::AttachmentPolicy;
use widget_chat::config::WidgetConfig;
use widget_chat::dialog::{HttpDialogClient, LoggingDialogClient};
use widget_chat::runtime::{
    self, KvStateStore, SystemClock, WidgetError, WidgetEvent, WidgetHandle, WidgetParts,
};
use widget_chat::state_machine::{Author, ConversationState, MessageBody, ScenarioPrompt};
use widget_chat::store::SqliteKvStore;

const HELP: &str = "Commands: /attach <path>, /detach, /send, /prompts, \
                    /prompt <n> (fills the draft), /help, /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they don't interleave with the transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "widget_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = WidgetConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening store");
    let kv = SqliteKvStore::open(&config.db_path)?;

    let dialog = HttpDialogClient::new(config.endpoint.clone(), config.api_key.clone())?;
    tracing::info!(
        endpoint = %dialog.endpoint(),
        email = %config.identity.email,
        "Dialog backend configured"
    );

    let (handle, events) = runtime::start(WidgetParts {
        context: config.context(),
        storage: KvStateStore::new(kv),
        dialog: LoggingDialogClient::new(dialog),
        clock: SystemClock,
        identity: config.identity.clone(),
        policy: AttachmentPolicy::new(config.max_attachment_bytes),
    })
    .await;

    let printer = tokio::spawn(print_events(events));

    println!("{HELP}");
    read_commands(&handle).await?;

    drop(handle);
    let _ = printer.await;
    Ok(())
}

async fn read_commands(handle: &WidgetHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();

        let result = match command {
            "/quit" => break,
            "/help" => {
                println!("{HELP}");
                Ok(())
            }
            "/prompts" => {
                print_prompts();
                Ok(())
            }
            "/attach" if arg.is_empty() => {
                println!("! usage: /attach <path>");
                Ok(())
            }
            "/attach" => handle.attach_path(arg).await,
            "/detach" => handle.remove_attachment().await,
            "/prompt" => match arg.parse().ok().and_then(ScenarioPrompt::from_index) {
                Some(prompt) => handle.select_prompt(prompt).await,
                None => {
                    println!("! pick a prompt between 1 and {}", ScenarioPrompt::ALL.len());
                    Ok(())
                }
            },
            "/send" => handle.send().await,
            _ if line.starts_with('/') => {
                println!("! unknown command, {HELP}");
                Ok(())
            }
            // Plain text is typed into the draft and sent, like pressing Enter
            _ => match handle.compose_text(line).await {
                Ok(()) => handle.send().await,
                Err(e) => Err(e),
            },
        };

        match result {
            // The runtime broadcasts rejections; the printer shows them
            Ok(()) | Err(WidgetError::Rejected(_)) => {}
            Err(e) => println!("! {e}"),
        }
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<WidgetEvent>) {
    let mut view = TranscriptView::default();
    loop {
        match events.recv().await {
            Ok(WidgetEvent::StateChanged { state }) => view.render(&state),
            Ok(WidgetEvent::Error { message }) => println!("! {message}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Transcript fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_prompts() {
    for (i, prompt) in ScenarioPrompt::ALL.iter().enumerate() {
        println!("  [{}] {}", i + 1, prompt.text());
    }
}

/// Prints only what changed since the last state
#[derive(Default)]
struct TranscriptView {
    generation: Option<u64>,
    last_id: u64,
    read: std::collections::HashSet<u64>,
    prompts_visible: bool,
    pending: bool,
    last_error: Option<String>,
    attachment: Option<String>,
}

impl TranscriptView {
    fn render(&mut self, state: &ConversationState) {
        let shown_before = self.last_id;
        if self.generation != Some(state.generation) {
            if self.generation.is_some() {
                println!("--- new conversation ---");
            }
            self.generation = Some(state.generation);
            self.last_id = 0;
            self.attachment = None;
            self.read.clear();
            self.prompts_visible = false;
        }

        for message in &state.messages {
            let who = match message.author {
                Author::User => "you",
                Author::Bot => "bot",
            };
            if message.id > self.last_id {
                let body = match &message.body {
                    MessageBody::Text { text } => text.clone(),
                    MessageBody::File { file_name } => format!("[file] {file_name}"),
                };
                println!("[{}] {who}: {body}", message.time);
                self.last_id = message.id;
            }
            if message.is_read() && self.read.insert(message.id) {
                println!("      (read #{})", message.id);
            }
        }

        if state.scenario_prompts_visible && !self.prompts_visible {
            print_prompts();
        }
        self.prompts_visible = state.scenario_prompts_visible;

        if state.pending() && !self.pending {
            println!("  ...");
        }
        self.pending = state.pending();

        if state.last_error != self.last_error {
            if let Some(error) = &state.last_error {
                println!("! {error}");
            }
            self.last_error.clone_from(&state.last_error);
        }

        let attachment = state.attachment.as_ref().map(|f| f.name.clone());
        if attachment != self.attachment {
            match &attachment {
                Some(name) => println!("  attached: {name} (/send to send)"),
                // A send clears it too; only report explicit removal
                None if self.last_id == shown_before => {
                    println!("  attachment removed");
                }
                None => {}
            }
            self.attachment = attachment;
        }
    }
}
