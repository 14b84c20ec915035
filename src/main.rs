use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use wechat_rust::bot::Bot;
use wechat_rust::config::{ClientConfig, ClientMode};
use wechat_rust::store::FileStore;

// A simple ping-pong bot.
//
// Usage:
//   cargo run                                   # scan the printed QR link
//   cargo run -- --session wechat.json          # keep the session for hot login
//   cargo run -- --desktop                      # log in as the desktop client
//   cargo run -- --ticket oZZsO0Qv8Q==          # reuse a ticket issued elsewhere

#[derive(Parser, Debug)]
#[command(about = "WeChat Web ping-pong bot")]
struct Args {
    /// File to save the session in, enabling hot login on restart.
    #[arg(short, long)]
    session: Option<PathBuf>,

    /// Log in as the desktop client.
    #[arg(long)]
    desktop: bool,

    /// Login ticket obtained elsewhere.
    #[arg(short, long)]
    ticket: Option<String>,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return;
        }
    };

    rt.block_on(async {
        let config = ClientConfig {
            mode: if args.desktop {
                ClientMode::Desktop
            } else {
                ClientMode::Normal
            },
            ..Default::default()
        };

        let mut builder = Bot::builder()
            .with_config(config)
            .on_login_challenge(|_ticket, qr_url| {
                info!("----------------------------------------");
                info!("Open this link and scan the QR code with WeChat:");
                info!("\n{qr_url}\n");
                info!("----------------------------------------");
            })
            .on_login_confirmed(|session| {
                info!(
                    "Logged in as {}",
                    session.self_user_name.as_deref().unwrap_or("?")
                );
            })
            .on_logout(|reason| info!("Logged out: {reason}"))
            .on_message(|ctx| async move {
                if ctx.message.text() == Some("ping") {
                    info!("Received ping from {}, sending pong...", ctx.chat());
                    ctx.reply_text("pong").await?;
                }
                Ok(())
            });

        if let Some(path) = &args.session {
            match FileStore::new(path).await {
                Ok(store) => builder = builder.with_storage(Arc::new(store)),
                Err(e) => warn!("Session file unavailable, hot login disabled: {e}"),
            }
        }
        if let Some(ticket) = args.ticket {
            builder = builder.with_ticket(ticket);
        }

        let bot = builder.build();
        if let Err(e) = bot.login().await {
            error!("Login failed: {e}");
            return;
        }

        let client = bot.client();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, logging out.");
                if let Err(e) = client.logout().await {
                    warn!("Logout failed: {e}");
                }
            }
        });

        let reason = bot.block().await;
        info!("Bot finished: {reason:?}");
    });
}
