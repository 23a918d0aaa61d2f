//! Command routing: one handler per bot command.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    domain::ChatId,
    formatting::{bullet_list, escape_html, stories_word},
    handle::Handle,
    messaging::port::MessagingPort,
    placeholders::placeholder_reply,
    store::SubscriptionStore,
    stories::StoryChecker,
    Result,
};

/// A transport-neutral bot command invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub chat_id: ChatId,
    /// Lowercase command name without the leading `/` or `@botname`.
    pub name: String,
    /// Everything after the command name, trimmed.
    pub args: String,
}

impl Command {
    /// Parse a message text into a command. `None` unless it starts with `/`.
    ///
    /// With `bot_username` set, `/cmd@OtherBot` is not ours and yields `None`.
    /// Telegram usernames compare case-insensitively.
    pub fn from_text(chat_id: ChatId, text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim_start();
        if !text.starts_with('/') {
            return None;
        }
        if let (Some(addressed), Some(me)) = (command_mention(text), bot_username) {
            if !addressed.eq_ignore_ascii_case(me.trim_start_matches('@')) {
                return None;
            }
        }
        let (name, args) = parse_command(text);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            chat_id,
            name,
            args,
        })
    }

    /// First whitespace-separated argument; the rest is ignored.
    pub fn first_arg(&self) -> Option<&str> {
        self.args.split_whitespace().next()
    }
}

/// The `botname` of `/cmd@botname ...`, if present.
fn command_mention(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    first
        .split_once('@')
        .map(|(_, bot)| bot)
        .filter(|bot| !bot.is_empty())
}

/// Split `/cmd@botname arg1 ...` into (`cmd`, `arg1 ...`).
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub const GENERIC_ERROR: &str = "❌ An error occurred. Please try again later.";

const INVALID_FORMAT: &str = "❌ Invalid Instagram username format.\n\
Usernames can only contain letters, numbers, periods, and underscores.";

const HELP: &str = "🎭 <b>Welcome to the Instagram Story Stalker Bot!</b>\n\n\
Oh great, another person who can't resist the urge to know what others are doing 24/7. Don't worry, we won't judge... much. 😏\n\n\
Here's what you can do with me (because apparently, you have nothing better to do):\n\n\
🔍 <b>Track Stories:</b>\n\
/track username - Start stalking someone's stories\n\
Example: /track instagram\n\n\
📥 <b>Download Stories:</b>\n\
/download username - Download someone's current story\n\
Example: /download kimkardashian\n\n\
🚫 <b>Stop Stalking:</b>\n\
/untrack username - Stop being creepy (or at least pretend to)\n\n\
📋 <b>Your Stalking List:</b>\n\
/list - See who you're currently obsessing over\n\n\
📊 <b>Stalking Stats:</b>\n\
/stats - Check how much of your life you've wasted here\n\n\
🏆 <b>Stalking Level:</b>\n\
/level - See how deep into the stalking rabbit hole you are\n\n\
🔥 <b>Get Roasted:</b>\n\
/roast - Get roasted for your questionable life choices\n\n\
🎯 <b>Pro Tips:</b>\n\
/tips - Learn how to be a better stalker (we're not proud of this)\n\n\
🏅 <b>Stalking Achievements:</b>\n\
/achievements - Collect badges for your dedication to being nosy\n\n\
❓ <b>Need Help?</b>\n\
/help - Get this message again (because you probably forgot already)\n\n\
<i>Remember: Just because you can stalk someone's stories doesn't mean you should... but who are we to stop you? 🤷‍♂️</i>";

/// Routes commands to handlers. Cheap to share behind an `Arc`.
pub struct CommandRouter {
    store: Arc<SubscriptionStore>,
    stories: Arc<StoryChecker>,
    messenger: Arc<dyn MessagingPort>,
}

impl CommandRouter {
    pub fn new(
        store: Arc<SubscriptionStore>,
        stories: Arc<StoryChecker>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            store,
            stories,
            messenger,
        }
    }

    /// Handle one command. Returns false if the command is unknown.
    ///
    /// Never fails: a reply that cannot be delivered is logged and followed
    /// by one best-effort generic error message.
    pub async fn dispatch(&self, cmd: &Command) -> bool {
        let chat_id = cmd.chat_id;
        let outcome = match cmd.name.as_str() {
            "start" | "help" => self.reply(chat_id, HELP).await,
            "track" => self.track(chat_id, cmd.first_arg()).await,
            "untrack" => self.untrack(chat_id, cmd.first_arg()).await,
            "list" => self.list(chat_id).await,
            "download" => self.download(chat_id, cmd.first_arg()).await,
            other => match placeholder_reply(other) {
                Some(text) => self.reply(chat_id, text).await,
                None => {
                    debug!(chat_id = %chat_id, command = %other, "Ignoring unknown command");
                    return false;
                }
            },
        };

        if let Err(e) = outcome {
            error!(chat_id = %chat_id, command = %cmd.name, error = %e, "Command failed");
            let _ = self.messenger.send_html(chat_id, GENERIC_ERROR).await;
        }
        true
    }

    async fn reply(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.messenger.send_html(chat_id, html).await?;
        Ok(())
    }

    /// Validate the single handle argument, replying with the reason when it
    /// is missing or malformed.
    async fn handle_arg(
        &self,
        chat_id: ChatId,
        arg: Option<&str>,
        missing: &str,
    ) -> Result<Option<Handle>> {
        let Some(raw) = arg else {
            self.reply(chat_id, missing).await?;
            return Ok(None);
        };
        match Handle::parse(&raw.to_lowercase()) {
            Ok(h) => Ok(Some(h)),
            Err(_) => {
                self.reply(chat_id, INVALID_FORMAT).await?;
                Ok(None)
            }
        }
    }

    async fn track(&self, chat_id: ChatId, arg: Option<&str>) -> Result<()> {
        let missing = "❌ Please provide an Instagram username to track.\n\
Example: /track instagram";
        let Some(handle) = self.handle_arg(chat_id, arg, missing).await? else {
            return Ok(());
        };

        if self.store.add(chat_id, handle.as_str()).await {
            self.reply(
                chat_id,
                &format!(
                    "✅ Now tracking {handle}!\nYou'll be notified when they post new stories. 🎭"
                ),
            )
            .await
        } else {
            self.reply(chat_id, &format!("ℹ️ You're already tracking {handle}!"))
                .await
        }
    }

    async fn untrack(&self, chat_id: ChatId, arg: Option<&str>) -> Result<()> {
        let missing = "❌ Please provide an Instagram username to stop tracking.\n\
Example: /untrack instagram";
        let Some(handle) = self.handle_arg(chat_id, arg, missing).await? else {
            return Ok(());
        };

        if self.store.remove(chat_id, handle.as_str()).await {
            self.reply(chat_id, &format!("✅ Stopped tracking {handle}."))
                .await
        } else {
            self.reply(chat_id, &format!("ℹ️ You weren't tracking {handle}."))
                .await
        }
    }

    async fn list(&self, chat_id: ChatId) -> Result<()> {
        let tracked = self.store.tracked(chat_id).await;
        if tracked.is_empty() {
            return self
                .reply(
                    chat_id,
                    "ℹ️ You're not tracking any Instagram accounts yet.\n\
Use /track username to start tracking.",
                )
                .await;
        }

        let html = format!(
            "📋 <b>You're tracking these Instagram accounts:</b>\n\n{}",
            bullet_list(&tracked)
        );
        self.reply(chat_id, &html).await
    }

    async fn download(&self, chat_id: ChatId, arg: Option<&str>) -> Result<()> {
        let missing = "❌ Please provide an Instagram username to download stories from.\n\
Example: /download kimkardashian";
        let Some(handle) = self.handle_arg(chat_id, arg, missing).await? else {
            return Ok(());
        };

        // The story check can be slow; acknowledge first.
        let ack = format!(
            "🔄 Checking stories for {handle}...\n\
This might take a moment while I do my sneaky business. 👀"
        );
        if let Err(e) = self.reply(chat_id, &ack).await {
            warn!(
                chat_id = %chat_id,
                handle = %handle,
                error = %e,
                "Failed to acknowledge download"
            );
        }

        let result = match self.stories.check_stories(&handle).await {
            Ok(r) => r,
            Err(e) => {
                error!(chat_id = %chat_id, handle = %handle, error = %e, "Error downloading story");
                return self
                    .reply(
                        chat_id,
                        &format!(
                            "❌ Error downloading story: {}\n\
Maybe try again later? Or maybe you should just... stop stalking? 🤷‍♂️",
                            escape_html(&e.to_string())
                        ),
                    )
                    .await;
            }
        };

        let count = result.active_count();
        if count == 0 {
            return self
                .reply(
                    chat_id,
                    &format!(
                        "😴 No active stories found for {handle}.\n\n\
Your collection of sadness is empty. Maybe they're:\n\
• Living their best life offline (unlike you)\n\
• Actually being productive (unlike you)\n\
• Just not interested in sharing their life with random stalkers (like you)\n\n\
Try again later when they're actually doing something interesting. Or maybe... get a life? 🤷‍♂️"
                    ),
                )
                .await;
        }

        info!(chat_id = %chat_id, handle = %handle, count, "Active stories found");
        // Media retrieval is not built yet; report the count only.
        self.reply(
            chat_id,
            &format!(
                "✅ Found {count} active {} for {handle}!\n\n\
🚧 Story download feature is coming soon.\n\
For now, we'll notify you when {handle} posts new stories.",
                stories_word(count)
            ),
        )
        .await
    }
}
