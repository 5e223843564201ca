use clap::{Parser, Subcommand};
use pocket::config::Config;
use pocket::conversation::Conversation;
use pocket::llm::CompletionClient;
use pocket::session::ChatSession;
use pocket::store::{JsonSessionStore, SessionStore};
use pocket::stream::{ChatStreamer, ChunkKind, EventKind, StreamEvent};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pocket")]
#[command(about = "Pocket CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config, and the sessions directory.
    Init {
        /// Config file path (default: POCKET_CONFIG_PATH or ~/.pocket/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the assistant (interactive). Ctrl-C stops the reply being written; /exit quits.
    Chat {
        /// Config file path (default: POCKET_CONFIG_PATH or ~/.pocket/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Optional existing session id to continue.
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },

    /// Send one message in a new session and print the reply.
    Ask {
        /// Config file path (default: POCKET_CONFIG_PATH or ~/.pocket/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        message: String,
    },

    /// List, show, or delete stored sessions.
    Sessions {
        /// Config file path (default: POCKET_CONFIG_PATH or ~/.pocket/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: SessionsAction,
    },

    /// List, add, or remove favorite sessions.
    Favorites {
        /// Config file path (default: POCKET_CONFIG_PATH or ~/.pocket/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: FavoritesAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// Most recently modified first.
    List,
    /// Print every message of a session.
    Show { id: String },
    /// Delete a session (also drops it from favorites).
    Delete { id: String },
}

#[derive(Subcommand)]
enum FavoritesAction {
    List,
    Add { id: String },
    Remove { id: String },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("pocket {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, session }) => {
            if let Err(e) = run_chat(config, session).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Ask { config, message }) => {
            if let Err(e) = run_ask(config, message).await {
                log::error!("ask failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Sessions { config, action }) => {
            if let Err(e) = run_sessions(config, action).await {
                log::error!("sessions failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Favorites { config, action }) => {
            if let Err(e) = run_favorites(config, action).await {
                log::error!("favorites failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(pocket::config::default_config_path);
    let sessions = pocket::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    println!("sessions are stored in {}", sessions.display());
    Ok(())
}

/// Loaded config plus the store it points at.
struct App {
    config: Config,
    store: Arc<JsonSessionStore>,
}

impl App {
    fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (config, path) = pocket::config::load_config(config_path)?;
        let dir = pocket::config::resolve_sessions_dir(&config, &path);
        log::debug!("sessions directory: {}", dir.display());
        Ok(Self {
            config,
            store: Arc::new(JsonSessionStore::new(dir)),
        })
    }

    fn streamer(&self) -> anyhow::Result<Arc<ChatStreamer>> {
        let client = CompletionClient::from_config(&self.config)?;
        if !client.has_api_key() {
            anyhow::bail!("no API key: set gateway.apiKey in the config or POCKET_API_KEY");
        }
        log::info!("using {} at {}", client.model(), client.endpoint());
        Ok(Arc::new(ChatStreamer::from_config(
            &self.config,
            Arc::new(client),
        )))
    }

    async fn conversation(
        &self,
        streamer: Arc<ChatStreamer>,
        session: Option<String>,
    ) -> anyhow::Result<Conversation> {
        let debounce = self.config.storage.save_debounce();
        let store: Arc<dyn SessionStore> = self.store.clone();
        Ok(match session {
            Some(id) => Conversation::resume(streamer, store, &id, debounce).await?,
            None => Conversation::new(streamer, store, debounce),
        })
    }
}

/// Print chunks as they arrive. Headings carry no line break of their own.
fn print_chunks(streamer: &ChatStreamer) {
    streamer.on(EventKind::Chunk, |event| {
        if let StreamEvent::Chunk { content, kind } = event {
            let mut out = std::io::stdout();
            let _ = match kind {
                ChunkKind::Heading => writeln!(out, "{}", content),
                _ => write!(out, "{}", content),
            };
            let _ = out.flush();
        }
    });
}

async fn run_chat(config_path: Option<PathBuf>, session: Option<String>) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    let streamer = app.streamer()?;
    let conversation = app.conversation(streamer.clone(), session).await?;
    print_chunks(&streamer);

    let resumed = conversation.session();
    if !resumed.messages.is_empty() {
        println!("continuing \"{}\" ({} messages)", resumed.title, resumed.messages.len());
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        let turn = conversation.send(input);
        tokio::pin!(turn);
        let outcome = tokio::select! {
            outcome = &mut turn => outcome,
            _ = tokio::signal::ctrl_c() => {
                conversation.cancel();
                turn.await
            }
        };
        println!();
        match outcome {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => println!("[stopped]"),
            Err(e) => eprintln!("chat error: {}", e),
        }
    }

    let id = conversation.id();
    if app.store.get(&id).await?.is_some() {
        println!("session {}", id);
    }
    Ok(())
}

async fn run_ask(config_path: Option<PathBuf>, message: String) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    let streamer = app.streamer()?;
    let conversation = app.conversation(streamer.clone(), None).await?;
    print_chunks(&streamer);
    conversation.send(&message).await?;
    println!();
    log::info!("saved as session {}", conversation.id());
    Ok(())
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

fn print_session(session: &ChatSession) {
    println!("{} ({})", session.title, session.id);
    for message in &session.messages {
        let marker = if message.is_final { "" } else { " (unfinished)" };
        println!(
            "\n[{}] {}{}",
            format_time(message.timestamp),
            message.role.as_str(),
            marker
        );
        println!("{}", message.content.trim_end());
    }
}

async fn run_sessions(config_path: Option<PathBuf>, action: SessionsAction) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    let store = app.store.as_ref();
    match action {
        SessionsAction::List => {
            let favorites = store.get_favorites().await?;
            let sessions = store.list().await?;
            if sessions.is_empty() {
                println!("no sessions");
            }
            for s in sessions {
                let star = if favorites.contains(&s.id) { "*" } else { " " };
                println!(
                    "{} {}  {}  {:>3}  {}",
                    star,
                    s.id,
                    format_time(s.last_modified),
                    s.messages.len(),
                    s.title
                );
            }
        }
        SessionsAction::Show { id } => match store.get(&id).await? {
            Some(session) => print_session(&session),
            None => anyhow::bail!("session not found: {}", id),
        },
        SessionsAction::Delete { id } => {
            if pocket::store::delete_session(store, &id).await? {
                println!("deleted {}", id);
            } else {
                anyhow::bail!("session not found: {}", id);
            }
        }
    }
    Ok(())
}

async fn run_favorites(
    config_path: Option<PathBuf>,
    action: FavoritesAction,
) -> anyhow::Result<()> {
    let app = App::load(config_path)?;
    let store = app.store.as_ref();
    let favorites = store.get_favorites().await?;
    match action {
        FavoritesAction::List => {
            for id in favorites {
                match store.get(&id).await? {
                    Some(s) => println!("{}  {}", id, s.title),
                    None => println!("{}  (missing)", id),
                }
            }
        }
        FavoritesAction::Add { id } => {
            if store.get(&id).await?.is_none() {
                anyhow::bail!("session not found: {}", id);
            }
            if !favorites.contains(&id) {
                pocket::store::toggle_favorite(store, &id).await?;
            }
            println!("favorited {}", id);
        }
        FavoritesAction::Remove { id } => {
            if favorites.contains(&id) {
                pocket::store::toggle_favorite(store, &id).await?;
                println!("removed {}", id);
            } else {
                println!("{} is not a favorite", id);
            }
        }
    }
    Ok(())
}
