use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ssb_core::{
    commands::CommandRouter,
    config::{Config, UpdateMode},
    lifecycle::{wait_for_signal, Lifecycle},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    store::SubscriptionStore,
    stories::{StoryChecker, StorySource},
};
use ssb_stories::{HttpStorySource, UnconfiguredStorySource};
use ssb_telegram::{
    ingest::BotIdentity, polling::run_polling, webhook::run_webhook, Bot, TelegramMessenger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ssb_core::logging::init("ssb")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let source: Arc<dyn StorySource> = match &cfg.story_api_url {
        Some(url) => Arc::new(HttpStorySource::new(
            url.clone(),
            cfg.story_api_key.clone(),
            cfg.story_timeout,
        )),
        None => {
            info!("STORY_API_URL not set; /download will report the service as unavailable");
            Arc::new(UnconfiguredStorySource)
        }
    };
    let stories = Arc::new(StoryChecker::new(source));
    let store = Arc::new(SubscriptionStore::new(cfg.users_file.clone()));
    info!(path = %store.path().display(), "Using subscription store");

    let bot = Bot::new(cfg.bot_token.clone());
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));
    let router = Arc::new(CommandRouter::new(store, stories.clone(), messenger));

    let lifecycle = Arc::new(Lifecycle::new(stories));
    {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Received shutdown signal, cleaning up...");
            lifecycle.trigger();
        });
    }

    let outcome = run(bot, &cfg, router, lifecycle.token()).await;
    match &outcome {
        Err(e) => error!(error = %e, "Update ingestion failed"),
        Ok(()) if !lifecycle.is_shutting_down() => {
            warn!("Update ingestion stopped without a shutdown request")
        }
        Ok(()) => {}
    }

    lifecycle.finish().await;
    info!("Shutdown complete");
    outcome
}

async fn run(
    bot: Bot,
    cfg: &Config,
    router: Arc<CommandRouter>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let me = BotIdentity::fetch(&bot).await?;
    match cfg.mode() {
        UpdateMode::Polling => run_polling(bot, me, router, cancel).await,
        UpdateMode::Webhook { base_url } => {
            run_webhook(bot, me, cfg, &base_url, router, cancel).await
        }
    }
}
