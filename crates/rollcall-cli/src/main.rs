use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use zbus::{proxy, Connection};

#[proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn enroll(&self, name: &str, images: Vec<Vec<u8>>) -> zbus::Result<String>;
    fn recognize(&self, image: Vec<u8>) -> zbus::Result<String>;
    fn recognize_all(&self, image: Vec<u8>) -> zbus::Result<String>;
    fn mark_attendance(&self, identity_id: &str) -> zbus::Result<String>;
    fn manual_attendance(
        &self,
        identity_id: &str,
        status: &str,
        timestamp: &str,
    ) -> zbus::Result<String>;
    fn list_attendance(&self) -> zbus::Result<String>;
    fn update_attendance(
        &self,
        record_id: &str,
        status: &str,
        timestamp: &str,
    ) -> zbus::Result<String>;
    fn delete_attendance(&self, record_id: &str) -> zbus::Result<String>;
    fn clear_attendance(&self) -> zbus::Result<String>;
    fn deduplicate_attendance(&self) -> zbus::Result<String>;
    fn list_identities(&self) -> zbus::Result<String>;
    fn delete_identity(&self, identity_id: &str, confirm: bool) -> zbus::Result<String>;
    fn list_alerts(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from five image files
    Enroll {
        /// Display name for the new identity
        #[arg(short, long)]
        name: String,
        /// Enrollment image files
        #[arg(value_name = "IMAGE", num_args = 1..)]
        images: Vec<PathBuf>,
    },
    /// Recognize the face in an image
    Recognize {
        image: PathBuf,
        /// Match every detected face independently
        #[arg(long)]
        all: bool,
    },
    /// Identity operations
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// Attendance ledger operations
    #[command(subcommand)]
    Attendance(AttendanceCommand),
    /// Show recent alerts
    Alerts,
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum IdentityCommand {
    /// List enrolled identities
    List,
    /// Soft-delete an identity into the trash directory
    Remove {
        id: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AttendanceCommand {
    /// Record a present mark (recognition source)
    Mark { id: String },
    /// Manually record a status
    Set {
        id: String,
        /// present, absent or excused
        #[arg(short, long)]
        status: String,
        /// RFC 3339 timestamp (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
    /// List all records, newest first
    List,
    /// Patch a record's status and/or timestamp
    Update {
        record_id: String,
        #[arg(short, long)]
        status: Option<String>,
        #[arg(long)]
        at: Option<String>,
    },
    /// Delete a single record
    Delete { record_id: String },
    /// Delete every record — irreversible
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Remove same-minute duplicates and orphaned records
    Dedup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = Connection::session()
        .await
        .context("connecting to the session bus")?;
    let daemon = AttendanceProxy::new(&connection)
        .await
        .context("connecting to rollcalld")?;

    let payload = match cli.command {
        Commands::Enroll { name, images } => {
            let mut bytes = Vec::with_capacity(images.len());
            for path in &images {
                bytes.push(
                    fs::read(path).with_context(|| format!("reading {}", path.display()))?,
                );
            }
            daemon.enroll(&name, bytes).await?
        }
        Commands::Recognize { image, all } => {
            let bytes =
                fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            if all {
                daemon.recognize_all(bytes).await?
            } else {
                daemon.recognize(bytes).await?
            }
        }
        Commands::Identity(IdentityCommand::List) => daemon.list_identities().await?,
        Commands::Identity(IdentityCommand::Remove { id, yes }) => {
            daemon.delete_identity(&id, yes).await?
        }
        Commands::Attendance(AttendanceCommand::Mark { id }) => {
            daemon.mark_attendance(&id).await?
        }
        Commands::Attendance(AttendanceCommand::Set { id, status, at }) => {
            daemon
                .manual_attendance(&id, &status, at.as_deref().unwrap_or(""))
                .await?
        }
        Commands::Attendance(AttendanceCommand::List) => daemon.list_attendance().await?,
        Commands::Attendance(AttendanceCommand::Update {
            record_id,
            status,
            at,
        }) => {
            daemon
                .update_attendance(
                    &record_id,
                    status.as_deref().unwrap_or(""),
                    at.as_deref().unwrap_or(""),
                )
                .await?
        }
        Commands::Attendance(AttendanceCommand::Delete { record_id }) => {
            daemon.delete_attendance(&record_id).await?
        }
        Commands::Attendance(AttendanceCommand::Clear { yes }) => {
            anyhow::ensure!(yes, "refusing to clear the ledger without --yes");
            daemon.clear_attendance().await?
        }
        Commands::Attendance(AttendanceCommand::Dedup) => {
            daemon.deduplicate_attendance().await?
        }
        Commands::Alerts => daemon.list_alerts().await?,
        Commands::Status => daemon.status().await?,
    };

    let failed = print_payload(&payload);
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Pretty-print a daemon payload; returns true when it reports an error.
fn print_payload(raw: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => {
            let pretty =
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string());
            println!("{pretty}");
            value.get("status").and_then(|s| s.as_str()) == Some("error")
        }
        Err(_) => {
            println!("{raw}");
            false
        }
    }
}
