//! Turning Telegram updates into core commands.

use anyhow::Context;
use teloxide::{
    prelude::*,
    types::{Message, Update, UpdateKind},
};
use tracing::{debug, info};

use ssb_core::{
    commands::{Command, CommandRouter},
    domain::ChatId,
};

/// The bot's own username, used to skip `/cmd@OtherBot` in groups.
#[derive(Clone, Debug, Default)]
pub struct BotIdentity {
    username: Option<String>,
}

impl BotIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
        }
    }

    /// Ask Telegram who we are (`getMe`).
    pub async fn fetch(bot: &Bot) -> anyhow::Result<Self> {
        let me = bot.get_me().await.context("getMe failed")?;
        info!(username = ?me.user.username, "Bot identity resolved");
        Ok(Self {
            username: me.user.username.clone(),
        })
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

/// Extract a bot command from a text message.
pub fn command_from_message(msg: &Message, me: &BotIdentity) -> Option<Command> {
    let text = msg.text()?;
    Command::from_text(ChatId(msg.chat.id.0), text, me.username())
}

pub fn command_from_update(update: &Update, me: &BotIdentity) -> Option<Command> {
    match &update.kind {
        UpdateKind::Message(msg) => command_from_message(msg, me),
        _ => None,
    }
}

/// Route one update. Anything that is not a command for us is ignored.
pub async fn route_update(router: &CommandRouter, me: &BotIdentity, update: &Update) {
    match command_from_update(update, me) {
        Some(cmd) => {
            router.dispatch(&cmd).await;
        }
        None => debug!(update_id = ?update.id, "Ignoring non-command update"),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{message_update, parse};
    use super::*;

    #[test]
    fn extracts_commands_from_messages() {
        let me = BotIdentity::new("StoryBot");
        let update = parse(message_update(1, 42, "/track@StoryBot Instagram"));
        let cmd = command_from_update(&update, &me).unwrap();
        assert_eq!(cmd.chat_id, ChatId(42));
        assert_eq!(cmd.name, "track");
        assert_eq!(cmd.first_arg(), Some("Instagram"));
    }

    #[test]
    fn commands_for_other_bots_are_skipped() {
        let me = BotIdentity::new("StoryBot");
        let update = parse(message_update(3, -100, "/track@SomeOtherBot instagram"));
        assert!(command_from_update(&update, &me).is_none());
        assert!(command_from_update(&update, &BotIdentity::default()).is_some());
    }

    #[test]
    fn plain_text_is_not_a_command() {
        let update = parse(message_update(2, 42, "hello there"));
        assert!(command_from_update(&update, &BotIdentity::default()).is_none());
    }
}
