use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use rand::Rng;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use url::Url;

mod config;
mod utils;

use crate::utils::LogTarget;
use crate::config::{load_settings, save_settings, set_settings_path_override, Settings};
use hangout_sync::hangout::{HangoutClient, SessionEvent};
use hangout_sync::models::{ActionKind, Owner};
use hangout_sync::store::{file::set_data_dir_override, FileStore};
use hangout_sync::transport::{ChannelEvent, ChannelState, WebSocketChannel};

const BASE_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Command line arguments for hangout-sync
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "hangout-sync: a terminal client for hangout invitations and messages.",
    long_about = "hangout-sync keeps hangouts (invitations, acceptances, blocks and chat messages) \
    in sync with a relay server, queueing actions while offline and replaying them on reconnect.\n\n\
    Server, username, email and token fall back to HANGOUT_SERVER, HANGOUT_USERNAME, \
    HANGOUT_EMAIL and HANGOUT_TOKEN, then to the saved settings."
)]
struct Args {
    /// Relay WebSocket URL, e.g. ws://localhost:3000/hangouts
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    email: Option<String>,

    /// Relay token issued at sign-in
    #[arg(long)]
    token: Option<String>,

    /// Directory holding the per-owner hangout store
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Settings file to use instead of the one in the config directory
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log file, or `-` for stderr
    #[arg(long, value_name = "PATH", default_value = "hangout-sync.log")]
    log_file: PathBuf,

    #[arg(long, default_value = "info", help = "One of off, error, warn, info, debug, trace")]
    log_level: String,

    /// Give up after this many failed reconnects in a row
    #[arg(long, default_value_t = 5)]
    reconnect_attempts: u32,
}

/// Flag, then environment, then saved settings, then ask
fn pick(flag: &Option<String>, var: &str, saved: Option<&str>) -> Option<String> {
    flag.clone()
        .or_else(|| env::var(var).ok())
        .or_else(|| saved.map(str::to_string))
        .filter(|value| !value.trim().is_empty())
}

fn prompt(question: &str) -> Result<String> {
    eprintln!("{}", question);
    let answer = utils::read_line()?;
    if answer.is_empty() {
        return Err(anyhow!("No value entered"));
    }
    Ok(answer)
}

fn resolve_settings(args: &Args) -> Result<Settings> {
    let saved = load_settings()?;
    let saved_token = saved.as_ref().and_then(Settings::get_token);

    let server = match pick(&args.server, "HANGOUT_SERVER", saved.as_ref().map(|s| s.server.as_str())) {
        Some(server) => server,
        None => prompt("Enter relay server URL (e.g. ws://localhost:3000/hangouts):")?,
    };
    let username = match pick(&args.username, "HANGOUT_USERNAME", saved.as_ref().map(|s| s.username.as_str())) {
        Some(username) => username,
        None => prompt("Enter username:")?,
    };
    let email = pick(&args.email, "HANGOUT_EMAIL", saved.as_ref().and_then(|s| s.email.as_deref()));
    let token = pick(&args.token, "HANGOUT_TOKEN", saved_token.as_deref());

    let settings = Settings::new(&server, &username, email.as_deref(), token.as_deref());
    if saved.as_ref() != Some(&settings) {
        save_settings(&settings)?;
    }
    Ok(settings)
}

fn backoff(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(16));
    let jitter = rand::thread_rng().gen_range(0..=BASE_BACKOFF_MS / 2);
    Duration::from_millis(exp.min(MAX_BACKOFF_MS) + jitter)
}

fn print_help() {
    println!("Commands:");
    println!("  /focus <peer>           select a peer (creates the hangout locally if new)");
    println!("  /invite /accept /decline /block /unblock /msg [text]");
    println!("                          act on the focused peer, optionally with a message");
    println!("  /list                   all hangouts");
    println!("  /unread                 unread peer actions");
    println!("  /pending                actions queued while offline");
    println!("  /resend                 send undelivered actions again");
    println!("  /status                 connection state");
    println!("  /quit");
    println!("Any other line is sent as a message to the focused peer.");
}

/// Returns false when the user asked to quit
fn handle_line(client: &mut HangoutClient, line: &str) -> Result<bool> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(true);
    }

    if !line.starts_with('/') {
        client.set_pending_text(line);
        if client.initiate_focused(ActionKind::Message)?.is_none() {
            println!("❌ Focus a peer first: /focus <peer>");
        }
        return Ok(true);
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "/quit" | "/exit" => return Ok(false),
        "/help" => print_help(),
        "/focus" => {
            let Some(peer_id) = rest.split_whitespace().next() else {
                println!("❌ Usage: /focus <peer>");
                return Ok(true);
            };
            let selected = client.select_peer(peer_id)?;
            println!("Focused on {} ({})", selected.peer_id, selected.state);
            for message in client.session().messages() {
                println!("  {}", utils::format_message(message, &client.owner().username));
            }
        }
        "/list" => {
            for hangout in client.session().hangouts() {
                println!("{}", utils::format_hangout(hangout));
            }
        }
        "/unread" => {
            for hangout in client.session().unread() {
                println!("{}", utils::format_hangout(hangout));
            }
        }
        "/pending" => {
            for hangout in client.session().offline_hangouts() {
                println!("{}", utils::format_hangout(hangout));
            }
        }
        "/resend" => {
            let sent = client.resend_pending()?;
            println!("Resent {} undelivered actions", sent);
        }
        "/status" => {
            println!("Channel: {:?}", client.channel_state());
            if let Some(reason) = client.session().last_error() {
                println!("Last error: {}", reason);
            }
        }
        other => match ActionKind::from_command(other.trim_start_matches('/')) {
            Some(action) => {
                client.set_pending_text(rest);
                match client.initiate_focused(action)? {
                    Some(snapshot) => println!("{} {} sent", snapshot.state, snapshot.peer_id),
                    None => println!("❌ Focus a peer first: /focus <peer>"),
                }
            }
            None => println!("❌ Unknown command {}; try /help", other),
        },
    }
    Ok(true)
}

fn print_session_event(event: &SessionEvent, owner: &str) {
    match event {
        SessionEvent::Navigate { peer_id, state } => println!("→ {} with {}", state, peer_id),
        SessionEvent::HangoutUpdated(hangout) if hangout.delivered => {
            debug!("{} with {} delivered", hangout.state, hangout.peer_id)
        }
        SessionEvent::MessagesUpdated { peer_id, messages } => {
            if let Some(last) = messages.last() {
                println!("[{}] {}", peer_id, utils::format_message(last, owner));
            }
        }
        SessionEvent::UnreadUpdated(unread) => {
            if let Some(latest) = unread.last() {
                println!("✉ {} unread, latest: {}", unread.len(), utils::format_hangout(latest));
            }
        }
        SessionEvent::Connectivity(state) => println!("Channel {:?}", state),
        SessionEvent::TransportError(reason) => println!("❌ {}", reason),
        _ => {}
    }
}

fn drain_session_events(events: &mut mpsc::UnboundedReceiver<SessionEvent>, owner: &str) {
    while let Ok(event) = events.try_recv() {
        print_session_event(&event, owner);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level: LevelFilter = args
        .log_level
        .parse()
        .map_err(|_| anyhow!("Invalid log level {}", args.log_level))?;
    let target = if args.log_file.as_os_str() == "-" {
        LogTarget::Stderr
    } else {
        LogTarget::File(&args.log_file)
    };
    utils::setup_logging(target, level)?;
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);

    if let Some(path) = &args.config {
        set_settings_path_override(path.clone());
    }
    if let Some(dir) = &args.data_dir {
        set_data_dir_override(dir.clone());
        info!("Data directory overridden to: {}", dir.display());
    }

    let settings = resolve_settings(&args)?;
    let mut owner = Owner::new(&settings.username);
    if let Some(email) = &settings.email {
        owner = owner.with_email(email);
    }

    let store = FileStore::open_default(&owner.username).context("Cannot open hangout store")?;
    info!("Hangout store at {}", store.dir().display());

    let url: Url = WebSocketChannel::channel_url(&settings.server, &owner.username, settings.get_token().as_deref())?;
    println!("Connecting to {} as {}... please wait...\n", settings.server, owner.username);

    let (channel, channel_events) = WebSocketChannel::connect(url.clone());
    let (mut client, mut session_events) =
        HangoutClient::new(owner, Box::new(store), Box::new(channel), channel_events)?;

    print_help();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut failures: u32 = 0;
    let username = client.owner().username.clone();

    loop {
        tokio::select! {
            event = client.next_channel_event() => {
                let Some(event) = event else {
                    warn!("Channel event stream ended");
                    break;
                };
                let closed = matches!(event, ChannelEvent::Close);
                if matches!(event, ChannelEvent::Open) {
                    failures = 0;
                }
                if let Err(e) = client.handle_channel_event(event) {
                    warn!("{}", e);
                }
                drain_session_events(&mut session_events, &username);

                if closed {
                    if failures >= args.reconnect_attempts {
                        error!("Giving up after {} reconnect attempts", failures);
                        println!("❌ Relay unreachable; actions stay queued until the next start");
                        break;
                    }
                    let delay = backoff(failures);
                    failures += 1;
                    println!("Reconnecting in {:.1}s (attempt {}/{})", delay.as_secs_f32(), failures, args.reconnect_attempts);
                    tokio::time::sleep(delay).await;

                    let (channel, channel_events) = WebSocketChannel::connect(url.clone());
                    client.replace_transport(Box::new(channel), channel_events);
                }
            }
            line = stdin.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                match handle_line(&mut client, &line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("❌ {}", e),
                }
                // Picks up an offline replay that failed when the channel opened
                if let Err(e) = client.retry_replay() {
                    warn!("Offline replay still failing: {}", e);
                }
                drain_session_events(&mut session_events, &username);
            }
        }
    }

    if client.channel_state() == ChannelState::Open {
        client.shutdown();
    }
    info!("hangout-sync exiting");
    Ok(())
}
