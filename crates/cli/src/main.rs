use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use carelink::api::{AuthApi, MessagesApi};
use carelink::channel::{ConnectionState, RealtimeMessageChannel};
use carelink::config::Config;
use carelink::http::AuthenticatedRequestClient;
use carelink::messages::{InboundMessage, MessageStore};
use carelink::session::Session;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "carelink")]
#[command(about = "CareLink messaging client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone)]
struct Account {
    /// Config file path (default: CARELINK_CONFIG_PATH or ~/.carelink/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Login email
    #[arg(long, short, env = "CARELINK_EMAIL")]
    email: String,

    /// Login password
    #[arg(long, env = "CARELINK_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: CARELINK_CONFIG_PATH or ~/.carelink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Log in and print the session.
    Login {
        #[command(flatten)]
        account: Account,
    },

    /// List received messages and the unread count.
    Messages {
        #[command(flatten)]
        account: Account,
    },

    /// Mark a received message read.
    Read {
        #[command(flatten)]
        account: Account,

        /// Message id
        id: i64,
    },

    /// Send a message to another user.
    Send {
        #[command(flatten)]
        account: Account,

        /// Receiver user id
        #[arg(long)]
        to: i64,

        /// Message text
        content: String,
    },

    /// Stay connected and print doctor answers and connection changes until Ctrl-C.
    Listen {
        #[command(flatten)]
        account: Account,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("carelink {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Login { account }) => run_login(account).await,
        Some(Commands::Messages { account }) => run_messages(account).await,
        Some(Commands::Read { account, id }) => run_read(account, id).await,
        Some(Commands::Send {
            account,
            to,
            content,
        }) => run_send(account, to, content).await,
        Some(Commands::Listen { account }) => run_listen(account).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(carelink::config::default_config_path);
    carelink::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    Ok(())
}

/// Logged-in API handles. Cookies live in memory, so every command logs in first.
struct Connected {
    config: Config,
    auth: AuthApi,
    messages: MessagesApi,
    session: Session,
}

async fn connect(account: Account) -> anyhow::Result<Connected> {
    let (config, path) = carelink::config::load_config(account.config)?;
    log::debug!("using config {} (server {})", path.display(), config.server.base_url);
    let client = AuthenticatedRequestClient::with_reqwest(&config.server, config.auth.clone())
        .context("building HTTP client")?;
    let auth = AuthApi::new(client.clone(), config.server.clone());
    let messages = MessagesApi::new(client, config.server.clone());
    let session = auth
        .login(&account.email, &account.password)
        .await
        .context("login failed")?;
    Ok(Connected {
        config,
        auth,
        messages,
        session,
    })
}

fn print_message(m: &InboundMessage) {
    let marker = if m.read { " " } else { "*" };
    let when = m
        .timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{} #{:<6} {} {} ({}): {}",
        marker,
        m.id,
        when,
        m.sender_name,
        m.sender_role.name(),
        m.content
    );
}

async fn run_login(account: Account) -> anyhow::Result<()> {
    let c = connect(account).await?;
    println!("{}", serde_json::to_string_pretty(&c.session)?);
    Ok(())
}

async fn run_messages(account: Account) -> anyhow::Result<()> {
    let c = connect(account).await?;
    let list = c.messages.received(c.session.user_id).await?;
    for m in &list {
        print_message(m);
    }
    let unread = c.messages.unread_count(c.session.user_id).await?;
    println!("{} messages, {} unread", list.len(), unread);
    Ok(())
}

async fn run_read(account: Account, id: i64) -> anyhow::Result<()> {
    let c = connect(account).await?;
    let store = MessageStore::new();
    store
        .replace_all(c.messages.received(c.session.user_id).await?)
        .await;
    if store.snapshot().await.get(id).is_none() {
        anyhow::bail!("message {} is not in your received messages", id);
    }
    let confirm = c.messages.mark_read(&store, id).await;
    confirm.await.context("read confirmation task")?;
    println!("message {} marked read ({} unread)", id, store.unread_count().await);
    Ok(())
}

async fn run_send(account: Account, to: i64, content: String) -> anyhow::Result<()> {
    let c = connect(account).await?;
    let receipt = c.messages.send(c.session.user_id, to, &content).await?;
    println!("sent message {} ({})", receipt.message_id, receipt.status);
    Ok(())
}

async fn run_listen(account: Account) -> anyhow::Result<()> {
    let c = connect(account).await?;
    let store = MessageStore::new();
    let mut notifications = store.subscribe();
    store
        .replace_all(c.messages.received(c.session.user_id).await?)
        .await;
    println!(
        "{} messages, {} unread; listening as {} (Ctrl-C to stop)",
        store.messages().await.len(),
        store.unread_count().await,
        c.session.display_name
    );

    let mut channel = RealtimeMessageChannel::from_config(&c.config, store.clone())
        .with_history_loader(Arc::new(c.messages.clone()));
    let mut status = channel.watch_status();
    channel.set_session(Some(&c.session)).await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_state = ConnectionState::Disconnected;
    let mut last_printed = None;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            n = notifications.recv() => match n {
                Ok(n) => println!("answer from {}: {}", n.sender_name, n.content),
                Err(broadcast::error::RecvError::Lagged(k)) => {
                    log::warn!("missed {} notifications", k);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let s = status.borrow_and_update().clone();
                if s.state != last_state {
                    match &s.last_error {
                        Some(err) if s.state == ConnectionState::Reconnecting => {
                            println!("[{:?}] {}", s.state, err)
                        }
                        _ => println!("[{:?}]", s.state),
                    }
                    last_state = s.state;
                }
                if let Some(m) = s.last_message {
                    if last_printed != Some(m.id) {
                        last_printed = Some(m.id);
                        print_message(&m);
                    }
                }
            }
        }
    }

    channel.shutdown().await;
    if let Err(e) = c.auth.logout().await {
        log::warn!("logout failed: {}", e);
    }
    Ok(())
}
