use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use netdisk::config::{ArchiverKind, Config};
use netdisk::source::{Ed2kLink, SourceDescriptor, TorrentMeta};
use netdisk::state::AppState;
use netdisk::storage::progress::{format_bytes, ProgressFormatter};
use netdisk::storage::validation::ValidationManager;
use netdisk::{AccountId, JobId, JobState, QuotaSummary};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "netdisk")]
#[command(about = "Personal cloud storage with quota-checked background jobs", long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage root, overrides the configuration file
    #[arg(short, long, global = true)]
    pub storage: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    pub archiver: Option<ArchiverArg>,

    /// Pause between placeholder transfer chunks
    #[arg(long, global = true)]
    pub chunk_delay_ms: Option<u64>,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ArchiverArg {
    #[value(name = "7z")]
    SevenZip,
    Zip,
}

impl From<ArchiverArg> for ArchiverKind {
    fn from(arg: ArchiverArg) -> Self {
        match arg {
            ArchiverArg::SevenZip => ArchiverKind::SevenZip,
            ArchiverArg::Zip => ArchiverKind::Zip,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage accounts and quotas
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Archive a local file into an account
    Upload {
        #[arg(short, long)]
        owner: u64,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Fetch a payload from an ed2k link or a torrent file
    Fetch {
        #[arg(short, long)]
        owner: u64,

        #[arg(short, long, conflicts_with = "torrent", required_unless_present = "torrent")]
        link: Option<String>,

        #[arg(short, long)]
        torrent: Option<PathBuf>,
    },

    /// List stored files of an account
    Files {
        #[arg(short, long)]
        owner: u64,

        /// Check every artifact against its recorded size and checksum
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Subcommand)]
pub enum AccountAction {
    Create {
        #[arg(short, long)]
        id: u64,

        /// Capacity in bytes
        #[arg(short, long)]
        limit: Option<u64>,
    },
    Show {
        #[arg(short, long)]
        id: u64,
    },
    SetLimit {
        #[arg(short, long)]
        id: u64,

        #[arg(short, long)]
        limit: u64,
    },
    Delete {
        #[arg(short, long)]
        id: u64,
    },
}

pub async fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(root) = &cli.storage {
        config = config.with_storage_root(root);
    }
    if let Some(archiver) = cli.archiver {
        config = config.with_archiver(archiver.into());
    }
    if let Some(delay) = cli.chunk_delay_ms {
        config = config.with_chunk_delay(Duration::from_millis(delay));
    }
    Ok(config)
}

pub async fn execute_command(state: &AppState, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Account { action } => match action {
            AccountAction::Create { id, limit } => {
                let summary = state.create_account(AccountId(id), limit).await?;
                print_summary(&summary);
            }
            AccountAction::Show { id } => {
                let summary = state.quota(AccountId(id)).await?;
                print_summary(&summary);
            }
            AccountAction::SetLimit { id, limit } => {
                let summary = state.set_limit(AccountId(id), limit).await?;
                print_summary(&summary);
            }
            AccountAction::Delete { id } => {
                state.delete_account(AccountId(id)).await?;
                println!("account {} deleted", id);
            }
        },
        Commands::Upload { owner, file } => {
            let owner = AccountId(owner);
            let job = state.create_upload_job(owner, &file).await?;
            follow_job(state, owner, job).await?;
        }
        Commands::Fetch { owner, link, torrent } => {
            let owner = AccountId(owner);
            let descriptor = match (link, torrent) {
                (Some(link), _) => SourceDescriptor::from(Ed2kLink::parse(&link)?),
                (None, Some(path)) => SourceDescriptor::from(TorrentMeta::from_file(&path).await?),
                (None, None) => bail!("either --link or --torrent must be provided"),
            };
            let job = state.create_fetch_job(owner, descriptor).await?;
            follow_job(state, owner, job).await?;
        }
        Commands::Files { owner, verify } => {
            for record in state.files(AccountId(owner)).await? {
                let status = if verify {
                    match ValidationManager::verify(&record).await {
                        Ok(()) => " ok".to_string(),
                        Err(e) => format!(" BROKEN: {}", e),
                    }
                } else {
                    String::new()
                };
                println!(
                    "{}: {} ({} -> {}) {}{}",
                    record.id,
                    record.filename,
                    format_bytes(record.original_size),
                    format_bytes(record.stored_size),
                    record.stored_path.display(),
                    status
                );
            }
        }
    }

    Ok(())
}

/// Polls the job until it is finished, printing each progress change.
async fn follow_job(state: &AppState, owner: AccountId, id: JobId) -> anyhow::Result<()> {
    let mut last = None;
    loop {
        let job = state
            .job_status(owner, &id)
            .await
            .with_context(|| format!("job {} disappeared", id))?;

        if last != Some((job.state, job.progress)) {
            eprintln!("{}", job.format_progress());
            last = Some((job.state, job.progress));
        }

        if job.state.is_terminal() {
            println!("{}", serde_json::to_string_pretty(&job)?);
            if job.state == JobState::Failed {
                bail!(job.error_detail.unwrap_or_else(|| "job failed".to_string()));
            }
            return Ok(());
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_summary(summary: &QuotaSummary) {
    println!(
        "account {}: {} used, {} reserved, {} limit ({:.1}%)",
        summary.account,
        format_bytes(summary.used_bytes),
        format_bytes(summary.reserved_bytes),
        format_bytes(summary.limit_bytes),
        summary.usage_percentage
    );
}
