use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;
use vaquerama_common::{ConversationId, MessageId, UserId};
use vaquerama_sync::{
    config::Settings,
    storage::{set_sidebar_collapsed, sidebar_collapsed},
    stream::{Delivery, LogEntry},
    view::Route,
    LiveSession, Services, SyncSnapshot,
};

const APP_TITLE: &str = "Vaquerama";

#[derive(Parser, Debug)]
#[command(name = "vaquerama-watch", about = "Live sync client for Vaquerama")]
struct Cli {
    /// Config file (defaults to vaquerama.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the credential
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored credential
    Logout,
    /// Follow conversations and notifications until interrupted
    Watch {
        /// Open the conversation with this participant
        #[arg(long = "with")]
        participant: Option<UserId>,
        /// Start on the notifications page, marking everything read
        #[arg(long, conflicts_with = "participant")]
        notifications: bool,
    },
    /// Show or change the sidebar preference
    Sidebar {
        #[arg(long)]
        collapsed: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Settings::load().context("Failed to load config")?,
    };
    init_tracing(&settings.log_level, cli.json_logs);

    let services = Services::new(settings)?;

    match cli.command {
        Command::Login { email, password } => {
            let user = services.auth.login(&email, &password).await?;
            println!("Signed in as {} ({})", user.username, user.id);
        },
        Command::Logout => {
            services.auth.logout().await?;
            println!("Signed out");
        },
        Command::Sidebar { collapsed } => {
            if let Some(collapsed) = collapsed {
                set_sidebar_collapsed(services.storage.as_ref(), collapsed).await?;
            }
            let collapsed = sidebar_collapsed(services.storage.as_ref()).await?;
            println!("Sidebar {}", if collapsed { "collapsed" } else { "expanded" });
        },
        Command::Watch {
            participant,
            notifications,
        } => {
            let route = if notifications {
                Route::Notifications
            } else {
                Route::Messages {
                    target_participant: participant,
                }
            };
            watch(&services, route).await?;
        },
    }

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn watch(services: &Services, route: Route) -> anyhow::Result<()> {
    let Some(user) = services.auth.restore().await? else {
        bail!("Not signed in; run `vaquerama-watch login` first");
    };

    let session = LiveSession::start(services, user).await?;
    let handle = session.handle().clone();
    if let Err(e) = handle.navigate(route).await {
        warn!("Navigation failed: {}", e);
    }

    let mut updates = handle.watch();
    let mut printed = Printed::default();
    printed.show(&updates.borrow_and_update(), &services.settings);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Sync session ended");
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.auth_required {
                    warn!("Credential rejected; sign in again");
                    break;
                }
                printed.show(&snapshot, &services.settings);
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            },
        }
    }

    session.shutdown().await?;
    Ok(())
}

/// Identity of a log entry across snapshots
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum EntryKey {
    Local(Uuid),
    Server(MessageId),
    Anonymous(UserId, i64),
}

impl EntryKey {
    fn of(entry: &LogEntry) -> Self {
        match (entry.local_id, entry.message.id) {
            (Some(local_id), _) => EntryKey::Local(local_id),
            (None, Some(id)) => EntryKey::Server(id),
            (None, None) => EntryKey::Anonymous(
                entry.message.sender_id,
                entry.message.created_at.timestamp_millis(),
            ),
        }
    }
}

/// What has already been written to stdout
#[derive(Default)]
struct Printed {
    title: String,
    connected: Option<bool>,
    /// Delivery state last shown for each entry of the open conversation
    entries: HashMap<EntryKey, Delivery>,
    active: Option<ConversationId>,
    history_error: Option<String>,
}

impl Printed {
    fn show(&mut self, snapshot: &SyncSnapshot, settings: &Settings) {
        for line in self.render(snapshot, settings) {
            println!("{line}");
        }
    }

    /// Lines describing what changed since the last call
    fn render(&mut self, snapshot: &SyncSnapshot, settings: &Settings) -> Vec<String> {
        let mut lines = Vec::new();

        if self.connected != Some(snapshot.connected) {
            self.connected = Some(snapshot.connected);
            lines.push(format!("[{}]", if snapshot.connected { "online" } else { "offline" }));
        }

        let title = snapshot.badge.title(APP_TITLE);
        if title != self.title {
            lines.push(title.clone());
            self.title = title;
        }

        if self.active != snapshot.active {
            self.active = snapshot.active;
            self.entries.clear();
            if let Some(id) = snapshot.active {
                let name = snapshot
                    .conversations
                    .iter()
                    .find(|c| c.conversation_id == id)
                    .map_or("?", |c| c.participant_name.as_str());
                lines.push(format!("== conversation with {name} =="));
            }
        }
        if snapshot.loading_history {
            return lines;
        }
        if self.history_error != snapshot.history_error {
            self.history_error = snapshot.history_error.clone();
            if let Some(e) = &self.history_error {
                lines.push(format!("history unavailable: {e}"));
            }
        }

        // Entries can be merged away or change delivery state in place
        for entry in &snapshot.log {
            let key = EntryKey::of(entry);
            let marker = match self.entries.get(&key) {
                None => match &entry.delivery {
                    Delivery::Confirmed => "",
                    Delivery::Pending => " (sending)",
                    Delivery::Failed(_) => " (not delivered)",
                },
                Some(shown) if *shown == entry.delivery => continue,
                Some(_) => match &entry.delivery {
                    Delivery::Confirmed => " (delivered)",
                    Delivery::Pending => " (retrying)",
                    Delivery::Failed(_) => " (not delivered)",
                },
            };
            lines.push(format_entry(entry, marker, settings));
            self.entries.insert(key, entry.delivery.clone());
        }

        lines
    }
}

fn format_entry(entry: &LogEntry, marker: &str, settings: &Settings) -> String {
    let mut text = entry.message.content.clone().unwrap_or_default();
    if let Some(media) = &entry.message.media_url {
        text = format!("{text} [{}]", settings.media_url(media));
    }
    format!(
        "{} #{}: {}{}",
        entry.message.created_at.format("%H:%M"),
        entry.message.sender_id,
        text,
        marker
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use vaquerama_common::Message;

    fn entry(
        local_id: Option<Uuid>,
        id: Option<MessageId>,
        content: &str,
        delivery: Delivery,
    ) -> LogEntry {
        LogEntry {
            local_id,
            message: Message {
                id,
                conversation_id: 1,
                sender_id: 7,
                content: Some(content.to_string()),
                media_url: None,
                created_at: DateTime::from_timestamp(3_600, 0).unwrap(),
            },
            delivery,
        }
    }

    fn open_snapshot(log: Vec<LogEntry>) -> SyncSnapshot {
        SyncSnapshot {
            connected: true,
            active: Some(1),
            log,
            ..SyncSnapshot::default()
        }
    }

    fn log_lines(printed: &mut Printed, snapshot: &SyncSnapshot) -> Vec<String> {
        printed
            .render(snapshot, &Settings::default())
            .into_iter()
            .filter(|l| l.contains(" #7: "))
            .collect()
    }

    #[test]
    fn test_failed_send_is_reported_after_pending() {
        let local_id = Uuid::new_v4();
        let mut printed = Printed::default();

        let pending = open_snapshot(vec![entry(Some(local_id), None, "oi", Delivery::Pending)]);
        assert_eq!(log_lines(&mut printed, &pending), vec!["01:00 #7: oi (sending)"]);
        assert!(log_lines(&mut printed, &pending).is_empty());

        let failed = open_snapshot(vec![entry(
            Some(local_id),
            None,
            "oi",
            Delivery::Failed("offline".to_string()),
        )]);
        assert_eq!(log_lines(&mut printed, &failed), vec!["01:00 #7: oi (not delivered)"]);

        let delivered =
            open_snapshot(vec![entry(Some(local_id), Some(9), "oi", Delivery::Confirmed)]);
        assert_eq!(log_lines(&mut printed, &delivered), vec!["01:00 #7: oi (delivered)"]);
    }

    #[test]
    fn test_merged_entry_does_not_hide_later_messages() {
        let local_id = Uuid::new_v4();
        let mut printed = Printed::default();

        // Optimistic entry, then the echo lands beside it
        let before = open_snapshot(vec![
            entry(None, Some(1), "history", Delivery::Confirmed),
            entry(Some(local_id), None, "oi", Delivery::Pending),
            entry(None, Some(2), "oi", Delivery::Confirmed),
        ]);
        assert_eq!(log_lines(&mut printed, &before).len(), 3);

        // The send confirms and the optimistic entry is merged away; then a reply arrives
        let after = open_snapshot(vec![
            entry(None, Some(1), "history", Delivery::Confirmed),
            entry(None, Some(2), "oi", Delivery::Confirmed),
            entry(None, Some(3), "tudo bem?", Delivery::Confirmed),
        ]);
        assert_eq!(log_lines(&mut printed, &after), vec!["01:00 #7: tudo bem?"]);
    }

    #[test]
    fn test_switching_conversation_prints_its_log_again() {
        let mut printed = Printed::default();
        let snapshot = open_snapshot(vec![entry(None, Some(1), "history", Delivery::Confirmed)]);
        assert_eq!(log_lines(&mut printed, &snapshot).len(), 1);

        let closed = SyncSnapshot {
            active: None,
            log: Vec::new(),
            ..snapshot.clone()
        };
        assert!(log_lines(&mut printed, &closed).is_empty());
        assert_eq!(log_lines(&mut printed, &snapshot), vec!["01:00 #7: history"]);
    }
}
