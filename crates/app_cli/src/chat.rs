use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use config::AppConfig;
use core_orchestrator::{StreamOutcome, StreamingAccumulator, UserTurnDecision, screen_user_turn};
use core_types::{ChatMessage, ChatProvider};
use i18n::I18n;
use memory::MemoryManager;
use persona::{PromptManager, RequestContext};
use provider_http::HttpChatProvider;
use safety_filter::SafetyFilter;
use storage_sqlite::{ChatSession, MEMORY_SNAPSHOT_KEY, SqliteStorage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Empty,
    Quit,
    Help,
    ResetSession,
    Image {
        path: String,
        comment: Option<String>,
    },
    Say(String),
}

pub(crate) fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    match line {
        "/quit" | "/exit" => return Command::Quit,
        "/help" => return Command::Help,
        "/reset-session" => return Command::ResetSession,
        _ => {}
    }
    if let Some(rest) = line.strip_prefix("/image ") {
        let rest = rest.trim();
        let (path, comment) = match rest.split_once(char::is_whitespace) {
            Some((path, comment)) if !comment.trim().is_empty() => {
                (path, Some(comment.trim().to_string()))
            }
            _ => (rest, None),
        };
        return Command::Image {
            path: path.to_string(),
            comment,
        };
    }
    Command::Say(line.to_string())
}

/// The part of `content` not yet shown, or `None` when the reply was
/// replaced and has to be shown again from the start.
pub(crate) fn unseen_suffix<'a>(shown: &str, content: &'a str) -> Option<&'a str> {
    content.strip_prefix(shown)
}

pub(crate) struct ChatRepl {
    i18n: I18n,
    safety: Arc<SafetyFilter>,
    memory: Arc<MemoryManager>,
    prompts: PromptManager,
    provider: Arc<HttpChatProvider>,
    accumulator: Arc<StreamingAccumulator>,
    storage: SqliteStorage,
    session: ChatSession,
    history: Vec<ChatMessage>,
}

impl ChatRepl {
    pub(crate) async fn open(
        config: AppConfig,
        provider: HttpChatProvider,
        db_path: &Path,
    ) -> Result<Self> {
        let storage = SqliteStorage::connect(db_path).await?;
        let memory = Arc::new(MemoryManager::new()?);
        if let Some(json) = storage.load_memory_snapshot(MEMORY_SNAPSHOT_KEY).await?
            && let Err(err) = memory.import_json(&json)
        {
            warn!("ignoring unreadable memory snapshot: {err:#}");
        }

        let safety = Arc::new(SafetyFilter::new(config.moderation.clone())?);
        let provider = Arc::new(provider);
        let accumulator = Arc::new(
            StreamingAccumulator::new(provider.clone(), safety.clone())
                .with_options(config.streaming.completion_options()),
        );
        let prompts = PromptManager::new(config.personality.clone())
            .with_memory_provider(memory.clone())
            .with_history_turns(config.streaming.history_turns);
        let session = storage.create_session(session_title()).await?;

        Ok(Self {
            i18n: I18n::new(config.language),
            safety,
            memory,
            prompts,
            provider,
            accumulator,
            storage,
            session,
            history: Vec::new(),
        })
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        println!("{}", self.i18n.t("app.title"));
        println!("{}", self.i18n.t("chat.help"));
        println!();
        println!("{}", self.i18n.t("chat.greeting"));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("{}> ", self.i18n.t("chat.prompt"));
            std::io::stdout().flush().context("failed to flush stdout")?;

            let line = tokio::select! {
                line = lines.next_line() => line.context("failed to read stdin")?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };

            match parse_command(&line) {
                Command::Empty => {}
                Command::Quit => break,
                Command::Help => println!("{}", self.i18n.t("chat.help")),
                Command::ResetSession => self.reset_session().await?,
                Command::Image { path, comment } => self.analyze_image(&path, comment).await,
                Command::Say(text) => self.say(text).await?,
            }
        }

        println!();
        println!("{}", self.i18n.t("chat.bye"));
        self.save_memory().await;
        Ok(())
    }

    async fn say(&mut self, text: String) -> Result<()> {
        let user_turn = ChatMessage::user(&text).with_timestamp(now());

        if let UserTurnDecision::Reply(reply) = screen_user_turn(self.safety.as_ref(), &text) {
            println!("{reply}");
            self.record_turn(user_turn, ChatMessage::assistant(reply).with_timestamp(now()))
                .await;
            return Ok(());
        }

        let learned = self.memory.learn_from_message(&text);
        debug!(?learned, "learned from user message");

        let messages = request_messages(&self.prompts, &self.history, user_turn.clone());

        match self.stream_reply(messages).await? {
            StreamOutcome::Completed { content } => {
                self.record_turn(user_turn, ChatMessage::assistant(content).with_timestamp(now()))
                    .await;
                self.save_memory().await;
            }
            StreamOutcome::Failed { error } => {
                println!("{}", self.i18n.translate_error(&error));
            }
            StreamOutcome::Cancelled => println!("{}", self.i18n.t("chat.cancelled")),
        }

        if let Err(err) = self.accumulator.reset() {
            warn!("accumulator reset rejected: {err}");
        }
        Ok(())
    }

    /// Prints the reply as it grows; Ctrl-C cancels it.
    async fn stream_reply(&self, messages: Vec<ChatMessage>) -> Result<StreamOutcome> {
        let mut state = self.accumulator.subscribe();
        let mut task = self.accumulator.spawn_send(messages);
        let mut shown = String::new();

        let outcome = loop {
            tokio::select! {
                joined = &mut task => break joined.context("stream task failed")?,
                Ok(()) = state.changed() => {
                    let content = state.borrow_and_update().current_content.clone();
                    show_progress(&mut shown, &content)?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("cancelling reply on ctrl-c");
                    self.accumulator.cancel();
                }
            }
        };

        if let StreamOutcome::Completed { content } = &outcome {
            show_progress(&mut shown, content)?;
        }
        if !shown.is_empty() {
            println!();
        }
        Ok(outcome)
    }

    async fn analyze_image(&mut self, path: &str, comment: Option<String>) {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path, "failed to read image: {err}");
                println!("{}", self.i18n.t("chat.image_failed"));
                return;
            }
        };
        let encoded = STANDARD.encode(bytes);

        let reply = match self
            .provider
            .analyze_image(&encoded, comment.as_deref())
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!("image analysis failed: {err:#}");
                println!("{}", self.i18n.translate_error(&err.to_string()));
                return;
            }
        };
        println!("{reply}");

        let user_turn = ChatMessage::user(comment.unwrap_or_default())
            .with_timestamp(now())
            .with_image(encoded);
        self.record_turn(user_turn, ChatMessage::assistant(reply).with_timestamp(now()))
            .await;
    }

    async fn reset_session(&mut self) -> Result<()> {
        self.accumulator.cancel();
        self.memory.reset_session();
        self.history.clear();
        self.session = self.storage.create_session(session_title()).await?;
        self.save_memory().await;
        println!("{}", self.i18n.t("chat.session_reset"));
        Ok(())
    }

    async fn record_turn(&mut self, user: ChatMessage, assistant: ChatMessage) {
        for message in [&user, &assistant] {
            if let Err(err) = self.storage.append_message(self.session.id, message).await {
                warn!(session = %self.session.id, "failed to persist message: {err:#}");
            }
        }
        // History is text only; images live in storage.
        let mut user = user;
        user.image_data = None;
        self.history.push(user);
        self.history.push(assistant);
    }

    async fn save_memory(&self) {
        let saved = match self.memory.export_json() {
            Ok(json) => {
                self.storage
                    .save_memory_snapshot(MEMORY_SNAPSHOT_KEY, &json)
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = saved {
            warn!("failed to save memory snapshot: {err:#}");
        }
    }
}

/// Remembered facts reach the model through the memory provider's prose only.
pub(crate) fn request_messages(
    prompts: &PromptManager,
    history: &[ChatMessage],
    user_turn: ChatMessage,
) -> Vec<ChatMessage> {
    prompts.build_request_messages(
        RequestContext {
            user_memories: None,
            session_summary: None,
            history,
        },
        user_turn,
    )
}

fn show_progress(shown: &mut String, content: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    match unseen_suffix(shown, content) {
        Some(suffix) => write!(stdout, "{suffix}")?,
        None => write!(stdout, "\n{content}")?,
    }
    stdout.flush()?;
    shown.clear();
    shown.push_str(content);
    Ok(())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn session_title() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use core_types::PersonalityConfig;

    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("   "), Command::Empty);
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(parse_command("/reset-session"), Command::ResetSession);
        assert_eq!(
            parse_command("浅草に行きたい"),
            Command::Say("浅草に行きたい".to_string())
        );
    }

    #[test]
    fn parses_image_with_and_without_comment() {
        assert_eq!(
            parse_command("/image lunch.jpg"),
            Command::Image {
                path: "lunch.jpg".to_string(),
                comment: None
            }
        );
        assert_eq!(
            parse_command("/image lunch.jpg 今日のお昼"),
            Command::Image {
                path: "lunch.jpg".to_string(),
                comment: Some("今日のお昼".to_string())
            }
        );
    }

    #[test]
    fn remembered_preferences_are_sent_once() {
        let memory = Arc::new(MemoryManager::new().expect("memory"));
        memory.add_preference("抹茶", "好き");
        memory.set_nicknames(None, Some("ゆうき"));
        let prompts = PromptManager::new(PersonalityConfig::default()).with_memory_provider(memory);

        let messages = request_messages(&prompts, &[], ChatMessage::user("おすすめは？"));
        let mentions = |needle: &str| {
            messages
                .iter()
                .filter(|message| message.content.contains(needle))
                .count()
        };
        assert_eq!(mentions("抹茶"), 1);
        assert_eq!(mentions("ゆうき"), 1);
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("おすすめは？"));
    }

    #[test]
    fn unseen_suffix_tracks_growth_and_replacement() {
        assert_eq!(unseen_suffix("こん", "こんにちは"), Some("にちは"));
        assert_eq!(unseen_suffix("", "abc"), Some("abc"));
        assert_eq!(unseen_suffix("危ない話", "別の話をしよう"), None);
    }
}
