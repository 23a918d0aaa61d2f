use std::{sync::Arc, time::Duration};

use anyhow::Context;
use teloxide::{
    dispatching::Dispatcher, dptree, error_handlers::LoggingErrorHandler, prelude::*,
    update_listeners::Polling,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ssb_core::commands::CommandRouter;

use crate::ingest::{command_from_message, BotIdentity};

/// Long-poll Telegram until `cancel` fires.
///
/// Any webhook is removed first and updates queued while the bot was down
/// are dropped instead of replayed.
pub async fn run_polling(
    bot: Bot,
    me: BotIdentity,
    router: Arc<CommandRouter>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    bot.delete_webhook()
        .drop_pending_updates(true)
        .await
        .context("deleteWebhook failed")?;
    info!("Webhook deleted, starting the bot in polling mode...");

    let listener = Polling::builder(bot.clone())
        .drop_pending_updates()
        .build();

    let handler = dptree::entry().branch(Update::filter_message().endpoint(on_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router, me])
        .default_handler(|upd| async move {
            debug!(update_id = ?upd.id, "Unhandled update");
        })
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        // The dispatcher refuses shutdown while it is still starting up.
        for _ in 0..50 {
            match shutdown.shutdown() {
                Ok(done) => {
                    info!("Stopping polling, waiting for in-flight updates");
                    done.await;
                    return;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
        warn!("Dispatcher did not accept shutdown request");
    });

    dispatcher
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;

    info!("Bot stopped.");
    Ok(())
}

async fn on_message(
    msg: Message,
    router: Arc<CommandRouter>,
    me: BotIdentity,
) -> ResponseResult<()> {
    if let Some(cmd) = command_from_message(&msg, &me) {
        router.dispatch(&cmd).await;
    }
    Ok(())
}
