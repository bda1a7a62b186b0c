use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::Me;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use crate::access::AccessList;
use crate::config::Config;
use crate::format::{Formatter, MarkdownFormatter};
use crate::platform::{IncomingMessage, Replier};
use crate::responder::{Delivery, Responder};

const WELCOME_TEXT: &str = "\
🤖 **Markdown Formatter Bot**

Send me any markdown text and I'll format it for Telegram!

Supported features:
• Headings (# ## ### etc.)
• **Bold** and *italic* text
• Links \\[text\\](url)
• Code blocks and `inline code`
• Lists and tables
• Block quotes
• Strikethrough ~~text~~
• Spoilers ||text||
• And much more!

Just send me your markdown text and I'll convert it to proper Telegram format.";

/// Already in MarkdownV2, sent as is.
const HELP_TEXT: &str = r#"📖 *How to use this bot:*

1\. Send me any markdown text
2\. I'll convert it to Telegram's MarkdownV2 format
3\. The formatted message will be sent back to you

*Example:*
```
# My Title
This is **bold** and this is *italic*
- Item 1
- Item 2
```

*Supported markdown:*
• Headers \(\# \#\# \#\#\#\)
• *Bold* and _italic_
• Links \[text\]\(url\)
• Code blocks and \`inline code\`
• Lists \(ordered and unordered\)
• Tables
• Block quotes \(\>\)
• Strikethrough \~\~text\~\~
• Spoilers \|\|text\|\|
• LaTeX math expressions"#;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Markdown formatter commands:")]
pub enum Command {
    #[command(description = "show the welcome message")]
    Start,
    #[command(description = "explain how to use the bot")]
    Help,
}

/// Shared application state
pub struct AppState {
    access: AccessList,
    formatter: MarkdownFormatter,
    fallback_chunk_len: usize,
    replier: Arc<dyn Replier>,
}

impl AppState {
    pub fn new(config: &Config, replier: Arc<dyn Replier>) -> Self {
        Self {
            access: config.access.clone(),
            formatter: MarkdownFormatter::new(config.settings.format_options()),
            fallback_chunk_len: config.settings.fallback_chunk_len,
            replier,
        }
    }
}

/// What happened to an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Sender is not on the allow-list.
    Denied,
    /// A slash command this bot does not know.
    Skipped,
    Command(Command),
    Text(Delivery),
}

/// Start the Telegram bot
pub async fn run(bot: Bot, state: Arc<AppState>) -> Result<()> {
    info!("Starting Telegram bot...");

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }

    let handler = Update::filter_message()
        .filter_map(|msg: Message| {
            let text = msg.text()?;
            Some(IncomingMessage {
                user_id: msg.from.as_ref().map(|user| user.id.0),
                chat_id: msg.chat.id.0,
                text: text.to_string(),
            })
        })
        .endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("bot"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(incoming: IncomingMessage, me: Me, state: Arc<AppState>) -> Result<()> {
    match route(&state, me.username(), &incoming).await? {
        Handled::Denied | Handled::Skipped => {}
        Handled::Command(command) => {
            debug!("Answered {:?} in chat {}", command, incoming.chat_id)
        }
        Handled::Text(Delivery::Formatted { parts } | Delivery::Fallback { parts }) => {
            debug!("Replied to chat {} in {} part(s)", incoming.chat_id, parts)
        }
        Handled::Text(Delivery::ErrorNotice | Delivery::Failed) => {
            warn!("Could not format message for chat {}", incoming.chat_id)
        }
    }
    Ok(())
}

/// Gate, parse and answer one incoming message.
pub async fn route(state: &AppState, bot_name: &str, incoming: &IncomingMessage) -> Result<Handled> {
    if !state.access.allows(incoming.user_id) {
        match incoming.user_id {
            Some(id) => info!("Unauthorized user {} tried to use the bot", id),
            None => debug!("Ignoring message without sender in chat {}", incoming.chat_id),
        }
        return Ok(Handled::Denied);
    }

    if incoming.text.starts_with('/') {
        let Ok(command) = Command::parse(&incoming.text, bot_name) else {
            debug!("Ignoring unknown command: {}", incoming.text);
            return Ok(Handled::Skipped);
        };
        let reply = command_reply(&state.formatter, &command)?;
        state.replier.send_markdown(incoming.chat_id, &reply).await?;
        return Ok(Handled::Command(command));
    }

    info!(
        "Formatting message from {} ({} chars)",
        incoming.user_id.unwrap_or_default(),
        incoming.text.chars().count()
    );

    let responder = Responder::new(
        state.replier.as_ref(),
        &state.formatter,
        state.fallback_chunk_len,
    );
    let delivery = responder.respond(incoming.chat_id, &incoming.text).await;
    Ok(Handled::Text(delivery))
}

fn command_reply(formatter: &dyn Formatter, command: &Command) -> Result<String> {
    match command {
        Command::Start => Ok(formatter.markdownify(WELCOME_TEXT)?),
        Command::Help => Ok(HELP_TEXT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::testing::{RecordingReplier, Sent};

    const BOT_NAME: &str = "mdbot";

    fn state(replier: Arc<RecordingReplier>) -> AppState {
        let config = Config::from_vars(
            Some("123:abc".to_string()),
            Some("42".to_string()),
            Settings::default(),
        )
        .unwrap();
        AppState::new(&config, replier)
    }

    fn message(user_id: Option<u64>, text: &str) -> IncomingMessage {
        IncomingMessage {
            user_id,
            chat_id: 1000,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_strangers_get_no_reply() {
        let replier = Arc::new(RecordingReplier::default());
        let state = state(replier.clone());

        for text in ["/start", "/help", "# Hi\n**bold**"] {
            let handled = route(&state, BOT_NAME, &message(Some(7), text))
                .await
                .unwrap();
            assert_eq!(handled, Handled::Denied);
        }
        let handled = route(&state, BOT_NAME, &message(None, "hello"))
            .await
            .unwrap();
        assert_eq!(handled, Handled::Denied);

        assert!(replier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_start_sends_one_welcome() {
        let replier = Arc::new(RecordingReplier::default());
        let state = state(replier.clone());

        let handled = route(&state, BOT_NAME, &message(Some(42), "/start"))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Command(Command::Start));
        let sent = replier.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Text(text) => {
                assert!(text.starts_with("🤖 *Markdown Formatter Bot*"));
                assert!(text.contains("I'll format it for Telegram\\!"));
                assert!(text.contains("Links \\[text\\]\\(url\\)"));
            }
            other => panic!("unexpected send {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_help_sent_verbatim() {
        let replier = Arc::new(RecordingReplier::default());
        let state = state(replier.clone());

        let handled = route(&state, BOT_NAME, &message(Some(42), "/help@mdbot"))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Command(Command::Help));
        assert_eq!(replier.sent(), vec![Sent::Text(HELP_TEXT.to_string())]);
    }

    #[tokio::test]
    async fn test_unknown_command_ignored() {
        let replier = Arc::new(RecordingReplier::default());
        let state = state(replier.clone());

        let handled = route(&state, BOT_NAME, &message(Some(42), "/settings"))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Skipped);
        assert!(replier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_markdown_message_formatted() {
        let replier = Arc::new(RecordingReplier::default());
        let state = state(replier.clone());

        let handled = route(&state, BOT_NAME, &message(Some(42), "# Hi\n**bold**"))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Text(Delivery::Formatted { parts: 1 }));
        assert_eq!(
            replier.sent(),
            vec![Sent::Text("📌 *Hi*\n\n*bold*".to_string())]
        );
    }
}
