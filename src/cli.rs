use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use log::{info, warn};
use tokio::time::{sleep, Duration};

use crate::bus::EventBus;
use crate::companion::Companion;
use crate::config::io::{get_history_path, get_profile_path, SettingsIO};
use crate::device::adapter::DeviceAdapter;
use crate::device::connection::{ConnectionSession, SessionConfig};
use crate::device::registry::DeviceRegistry;
use crate::device::simulated::SimulatedAdapter;
use crate::device::types::{Device, SessionState};
use crate::error::{AppRunError, StoreError};
use crate::feedback::types::LogFeedbackSink;
use crate::history::store::HistoryStore;
use crate::history::transcript::format_entry;
use crate::history::types::Conversation;
use crate::profile::store::ProfileStore;
use crate::profile::types::{language_name, UserProfile};
use crate::translation::recognizer::SimulatedRecognizer;

/**
 * How often (milliseconds) `translate` checks whether the session is still connected.
 */
const TRANSLATE_POLL_DELAY: u64 = 250;

#[derive(Parser, Debug)]
#[command(name = "signlink", author, version)]
#[command(about = "Companion for sign language translator devices: discover, connect, and follow translations.", long_about = None)]
pub struct Cli {
    /// Use the platform bluetooth stack instead of the simulated demo devices
    #[cfg(feature = "ble")]
    #[arg(long, global = true)]
    pub ble: bool,

    /// Settings file. Defaults to signlink.json next to the executable if it exists, otherwise
    /// the user config directory.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Conversation history file. Defaults to the user data directory.
    #[arg(long, global = true)]
    pub history: Option<PathBuf>,

    /// User profile file. Defaults to the user data directory.
    #[arg(long, global = true)]
    pub profile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan for nearby devices
    Scan(ScanArgs),
    /// Connect to a device and print translations as they arrive
    Translate(TranslateArgs),
    /// Saved conversations
    #[command(subcommand)]
    History(HistoryCommand),
    /// Application settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// User profile
    #[command(subcommand)]
    Profile(ProfileCommand),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Scan window in seconds
    #[arg(long, default_value_t = 10)]
    pub seconds: u64,
}

#[derive(Args, Debug)]
pub struct TranslateArgs {
    /// Device id to connect to. Defaults to the first device discovered.
    pub device: Option<String>,

    /// How long to look for the device, in seconds
    #[arg(long, default_value_t = 10)]
    pub scan_seconds: u64,

    /// How long to stay connected, in seconds
    #[arg(long, default_value_t = 60)]
    pub seconds: u64,

    /// Do not save the transcript to history, regardless of the autoSave setting
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List conversations, newest first
    List,
    /// Find conversations containing the text, or dated with the given prefix (2026-10-19)
    Search { query: String },
    /// Print one conversation
    Show { id: u64 },
    /// Write one conversation as plain text
    Export {
        id: u64,
        /// Output file. Defaults to conversation_<date>.txt in the current directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete one conversation
    Delete { id: u64 },
    /// Delete all conversations
    Clear,
    /// Totals and most used words
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print the current settings
    Show,
    /// Change one setting, by its file name (e.g. confidenceThreshold 80)
    Set { key: String, value: String },
    /// Restore the defaults
    Reset,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Print the profile, creating it on first use
    Show,
    /// Change name, email or preferredLanguage (en, es, fr, de, it, pt)
    Set { key: String, value: String },
}

impl Cli {
    fn settings_io(&self) -> Result<SettingsIO, StoreError> {
        match &self.settings {
            Some(path) => SettingsIO::open(path.clone()),
            None => SettingsIO::new_sync(),
        }
    }

    fn history_store(&self) -> Result<HistoryStore, StoreError> {
        let path = match &self.history {
            Some(path) => path.clone(),
            None => get_history_path()?,
        };
        Ok(HistoryStore::new(path))
    }

    fn profile_store(&self) -> Result<ProfileStore, StoreError> {
        let path = match &self.profile {
            Some(path) => path.clone(),
            None => get_profile_path()?,
        };
        Ok(ProfileStore::new(path))
    }

    #[cfg(feature = "ble")]
    async fn adapter(&self) -> Result<Arc<dyn DeviceAdapter>, AppRunError> {
        if self.ble {
            let adapter = crate::device::btle::BtleAdapter::new().await?;
            return Ok(Arc::new(adapter));
        }
        Ok(Arc::new(SimulatedAdapter::new()))
    }

    #[cfg(not(feature = "ble"))]
    async fn adapter(&self) -> Result<Arc<dyn DeviceAdapter>, AppRunError> {
        Ok(Arc::new(SimulatedAdapter::new()))
    }
}

fn describe(device: &Device) -> String {
    let name = if device.name.is_empty() { "(unnamed)" } else { device.name.as_str() };
    format!(
        "{:<24} {:<20} {:>4} dBm  {:>3}%  {}",
        device.id,
        name,
        device.rssi.map(|rssi| rssi.to_string()).unwrap_or_else(|| "?".to_string()),
        device.signal_percent(),
        device.signal_quality,
    )
}

fn summarize(conversation: &Conversation) -> String {
    let preview = conversation.messages.first().map(String::as_str).unwrap_or("");
    format!(
        "{}  {}  {:>3} message(s)  {}",
        conversation.id,
        conversation.date,
        conversation.messages.len(),
        preview,
    )
}

pub async fn execute(cli: Cli) -> Result<(), AppRunError> {
    match &cli.command {
        Command::Scan(args) => scan(&cli, args).await,
        Command::Translate(args) => translate(&cli, args).await,
        Command::History(command) => history(&cli, command).await,
        Command::Settings(command) => settings(&cli, command).await,
        Command::Profile(command) => profile(&cli, command).await,
    }
}

async fn scan(cli: &Cli, args: &ScanArgs) -> Result<(), AppRunError> {
    let registry = DeviceRegistry::new(cli.adapter().await?, EventBus::new());
    let mut discovered = registry.start_scan(Duration::from_secs(args.seconds)).await?;

    println!("Scanning for {} second(s)...", args.seconds);
    while let Some(device) = discovered.next().await {
        println!("{}", describe(&device));
    }

    let devices = registry.devices();
    println!("{} device(s) found", devices.len());
    Ok(())
}

async fn find_device(registry: &DeviceRegistry, args: &TranslateArgs) -> Result<Device, AppRunError> {
    let mut discovered = registry.start_scan(Duration::from_secs(args.scan_seconds)).await?;

    let mut found = None;
    while let Some(device) = discovered.next().await {
        let wanted = match &args.device {
            Some(id) => &device.id == id,
            None => device.is_connectable,
        };
        if wanted {
            found = Some(device);
            break;
        }
    }
    registry.stop_scan().await;

    found.ok_or_else(|| match &args.device {
        Some(id) => AppRunError::Usage(format!("device {} was not found", id)),
        None => AppRunError::Usage("no connectable device found".to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Elapsed,
    LinkLost,
    Interrupted,
}

async fn wait_while_connected<F: Future<Output = ()>>(session: &ConnectionSession, duration: Duration, interrupt: F) -> SessionEnd {
    let deadline = sleep(duration);
    tokio::pin!(deadline);
    tokio::pin!(interrupt);

    loop {
        if session.state() != SessionState::Connected {
            warn!("Connection lost");
            return SessionEnd::LinkLost;
        }

        tokio::select! {
            _ = &mut interrupt => return SessionEnd::Interrupted,
            _ = &mut deadline => return SessionEnd::Elapsed,
            _ = sleep(Duration::from_millis(TRANSLATE_POLL_DELAY)) => {},
        }
    }
}

async fn translate(cli: &Cli, args: &TranslateArgs) -> Result<(), AppRunError> {
    let settings_io = cli.settings_io()?;
    let mut locker = settings_io.locker()?;
    let _lock = locker.lock()?;

    let mut settings = settings_io.read().await?;
    if args.no_save {
        settings.auto_save = false;
    }

    let companion = Companion::new(
        cli.adapter().await?,
        Arc::new(SimulatedRecognizer::default()),
        settings,
        cli.history_store()?,
        Arc::new(LogFeedbackSink),
        SessionConfig::default(),
    );

    println!("Looking for a device...");
    let device = match find_device(companion.registry(), args).await {
        Ok(device) => device,
        Err(err) => {
            companion.shutdown().await;
            return Err(err);
        },
    };

    let _printer = companion.session().translations().subscribe(|event| {
        println!("{}", format_entry(event));
        Ok(())
    });

    println!("Connecting to {}...", describe(&device));
    if let Err(err) = companion.session().connect(device).await {
        companion.shutdown().await;
        return Err(err.into());
    }
    println!("Connected. Translating for {} second(s)...", args.seconds);

    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
            futures::future::pending::<()>().await;
        }
    };

    match wait_while_connected(companion.session(), Duration::from_secs(args.seconds), interrupt).await {
        SessionEnd::Elapsed => {},
        SessionEnd::LinkLost => println!("Connection lost"),
        SessionEnd::Interrupted => println!("Interrupted, disconnecting..."),
    }

    let saved = companion.end_session().await;
    companion.shutdown().await;

    match saved? {
        Some(conversation) => println!("Saved conversation {} ({} message(s))", conversation.id, conversation.messages.len()),
        None => info!("Transcript not saved"),
    }
    Ok(())
}

async fn history(cli: &Cli, command: &HistoryCommand) -> Result<(), AppRunError> {
    let store = cli.history_store()?;

    match command {
        HistoryCommand::List => {
            let conversations = store.list().await?;
            if conversations.is_empty() {
                println!("No saved conversations");
            }
            for conversation in &conversations {
                println!("{}", summarize(conversation));
            }
        },
        HistoryCommand::Search { query } => {
            for conversation in &store.search(query).await? {
                println!("{}", summarize(conversation));
            }
        },
        HistoryCommand::Show { id } => {
            let conversation = store.get(*id).await?
                .ok_or_else(|| AppRunError::Usage(format!("no conversation with id {}", id)))?;
            println!("{}", conversation.export_text());
        },
        HistoryCommand::Export { id, output } => {
            let conversation = store.get(*id).await?
                .ok_or_else(|| AppRunError::Usage(format!("no conversation with id {}", id)))?;
            let output = output.clone().unwrap_or_else(|| PathBuf::from(conversation.export_file_name()));
            tokio::fs::write(&output, conversation.export_text()).await.map_err(StoreError::from)?;
            println!("Exported to {}", output.to_string_lossy());
        },
        HistoryCommand::Delete { id } => {
            if !store.delete(*id).await? {
                return Err(AppRunError::Usage(format!("no conversation with id {}", id)));
            }
            println!("Deleted conversation {}", id);
        },
        HistoryCommand::Clear => {
            store.clear().await?;
            println!("History cleared");
        },
        HistoryCommand::Stats => {
            let stats = store.stats().await?;
            println!("Conversations:             {}", stats.total_conversations);
            println!("Messages:                  {}", stats.total_messages);
            println!("Messages per conversation: {:.1}", stats.average_messages_per_conversation);
            for word in &stats.most_used_words {
                println!("  {:<20} {}", word.word, word.count);
            }
        },
    }

    Ok(())
}

async fn settings(cli: &Cli, command: &SettingsCommand) -> Result<(), AppRunError> {
    let settings_io = cli.settings_io()?;

    let settings = match command {
        SettingsCommand::Show => settings_io.read().await?,
        SettingsCommand::Set { key, value } => {
            let mut locker = settings_io.locker()?;
            let _lock = locker.lock()?;

            let mut settings = settings_io.read().await?;
            settings.set(key, value).map_err(AppRunError::Usage)?;
            settings_io.save(&settings).await?;
            settings
        },
        SettingsCommand::Reset => {
            let mut locker = settings_io.locker()?;
            let _lock = locker.lock()?;
            settings_io.reset().await?
        },
    };

    let content = serde_json::to_string_pretty(&settings).map_err(StoreError::from)?;
    println!("{}", content);
    Ok(())
}

async fn profile(cli: &Cli, command: &ProfileCommand) -> Result<(), AppRunError> {
    let store = cli.profile_store()?;

    let profile: UserProfile = match command {
        ProfileCommand::Show => store.load().await?,
        ProfileCommand::Set { key, value } => store
            .update(|profile| profile.set(key, value))
            .await?
            .map_err(AppRunError::Usage)?,
    };

    let content = serde_json::to_string_pretty(&profile).map_err(StoreError::from)?;
    println!("{}", content);
    if let Some(language) = language_name(&profile.preferred_language) {
        println!("Translating to {}", language);
    }
    Ok(())
}
