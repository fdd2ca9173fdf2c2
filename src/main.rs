//! habibot — persistent Elko protocol client.

use clap::Parser;
use habibot::{Cli, EventKind, HabiBot, session};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("habibot=debug")
    } else {
        EnvFilter::new("habibot=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let bot = HabiBot::new(cli.host, cli.port);
    bot.set_reconnect(!cli.no_reconnect);
    if let Some(context) = cli.context {
        bot.set_default_context(context);
    }

    bot.on(EventKind::Connected, |bot, _| {
        let pending = bot.enter_context(None);
        tokio::spawn(async move {
            if let Err(e) = pending.await {
                warn!("entercontext failed: {e}");
            }
        });
        Ok(())
    });

    bot.on(EventKind::EnteredRegion, |bot, _| {
        info!("entered region as {:?}", bot.known_ref(session::ME));
        let bot = bot.clone();
        tokio::spawn(async move {
            if let Err(e) = bot.ensure_corporated().await {
                warn!("embodiment recovery failed: {e}");
            }
        });
        Ok(())
    });

    if let Err(e) = bot.connect().await {
        error!("{e}");
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("signal wait failed: {e}");
    }
    bot.disconnect().await;
}
