use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jotpay_core::platform;
use jotpay_core::{
    JobStatus, Ledger, LedgerConfig, LinkCode, LinkStrategy, Nature, Record, SyncHandle,
};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// JotPay - an encrypted, multi-device money log
#[derive(Parser)]
#[command(name = "jotpay")]
#[command(about = "Encrypted money log that syncs across devices", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum NatureArg {
    Normal,
    Asset,
    Liability,
}

impl From<NatureArg> for Nature {
    fn from(arg: NatureArg) -> Self {
        match arg {
            NatureArg::Normal => Nature::Normal,
            NatureArg::Asset => Nature::Asset,
            NatureArg::Liability => Nature::Liability,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add an entry, e.g. `jotpay add "-50 Coffee"`
    Add {
        /// Amount followed by a description
        text: String,

        /// Mark as a receivable or payable
        #[arg(long, value_enum, default_value = "normal")]
        nature: NatureArg,
    },

    /// Replace the text of an existing entry
    Edit {
        /// Entry timestamp as shown by `list`
        timestamp: i64,

        /// New amount and description
        text: String,

        #[arg(long, value_enum)]
        nature: Option<NatureArg>,
    },

    /// Delete an entry
    Delete {
        /// Entry timestamp as shown by `list`
        timestamp: i64,
    },

    /// List entries, newest first
    List {
        /// Only entries whose description contains this text
        #[arg(long)]
        search: Option<String>,
    },

    /// Show balance, receivables and payables
    Totals,

    /// Sync with the vault now
    Sync {
        /// Let local content win every conflict
        #[arg(long)]
        force: bool,
    },

    /// Print the code another device uses to join this vault
    LinkCode,

    /// Join the vault of another device
    Link {
        /// Link code printed by `link-code` on the other device
        code: String,

        /// Discard local entries instead of merging them
        #[arg(long)]
        overwrite: bool,
    },

    /// Leave the shared vault and start a fresh one
    Unlink,

    /// List devices linked to this vault
    Devices,
}

/// Split `"-50 Coffee"` into amount and description.
fn parse_entry(text: &str) -> Result<(f64, String)> {
    let text = text.trim();
    let (amount, description) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let amount: f64 = amount
        .parse()
        .with_context(|| format!("'{}' does not start with an amount", text))?;
    if !amount.is_finite() {
        bail!("Amount must be a finite number");
    }
    Ok((amount, description.trim().to_string()))
}

fn print_record(record: &Record) {
    let marker = match record.nature {
        Nature::Normal => "",
        Nature::Asset => " [receivable]",
        Nature::Liability => " [payable]",
    };
    println!("{:>15}  {:>12.2}  {}{}", record.timestamp, record.amount, record.description, marker);
}

async fn report(handle: SyncHandle) {
    match handle.wait().await {
        JobStatus::Finished(outcome) => println!("{}", outcome.message()),
        other => println!("Sync {:?}", other),
    }
}

fn find(ledger: &Ledger, timestamp: i64) -> Result<Record> {
    ledger
        .record_at(timestamp)?
        .ok_or_else(|| anyhow!("No entry with timestamp {}", timestamp))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config_path = cli.config.unwrap_or_else(platform::get_default_config_path);
    let config = LedgerConfig::load_or_default(&config_path)?;
    debug!(
        database = %config.database_path.display(),
        remote = %config.remote_path.display(),
        "Opening ledger"
    );
    let ledger = Ledger::open(&config)?;

    match cli.command {
        Commands::Add { text, nature } => {
            let (amount, description) = parse_entry(&text)?;
            let (record, handle) = ledger.add_record(&text, amount, &description, nature.into())?;
            print_record(&record);
            report(handle).await;
        }
        Commands::Edit {
            timestamp,
            text,
            nature,
        } => {
            let mut record = find(&ledger, timestamp)?;
            let (amount, description) = parse_entry(&text)?;
            record.original_text = text;
            record.amount = amount;
            record.description = description;
            if let Some(nature) = nature {
                record.nature = nature.into();
            }
            let handle = ledger.update_record(&record)?;
            report(handle).await;
        }
        Commands::Delete { timestamp } => {
            let record = find(&ledger, timestamp)?;
            let handle = ledger.delete_record(&record)?;
            report(handle).await;
        }
        Commands::List { search } => {
            let records = match search {
                Some(keyword) => ledger.search(&keyword)?,
                None => ledger.records()?,
            };
            if records.is_empty() {
                println!("No entries.");
            }
            for record in &records {
                print_record(record);
            }
        }
        Commands::Totals => {
            let totals = ledger.totals()?;
            println!("Balance:    {:.2}", totals.balance);
            println!("Receivable: {:.2}", totals.receivable);
            println!("Payable:    {:.2}", totals.payable);
        }
        Commands::Sync { force } => match ledger.sync_now(force).await? {
            JobStatus::Finished(outcome) => println!("{}", outcome.message()),
            other => println!("Sync {:?}", other),
        },
        Commands::LinkCode => {
            println!("{}", ledger.link_code()?.encode());
        }
        Commands::Link { code, overwrite } => {
            let code = LinkCode::parse(&code)?;
            let strategy = if overwrite {
                LinkStrategy::Overwrite
            } else {
                LinkStrategy::Merge
            };
            if ledger.needs_link_decision()? && !overwrite {
                println!("Merging existing entries into the linked vault.");
            }
            let handle = ledger.link(&code, strategy).await?;
            println!("Linked to vault {}", code.vault_id);
            report(handle).await;
        }
        Commands::Unlink => {
            let fresh = ledger.unlink().await?;
            println!("Unlinked. Now on fresh vault {}", fresh.vault_id);
        }
        Commands::Devices => {
            for device in ledger.devices().list().await? {
                let marker = if device.is_current { " (this device)" } else { "" };
                println!("{}  {}{}", device.installation_id, device.device_name, marker);
            }
            if let Some(message) = ledger.snapshot()?.last_sync_message {
                println!("Last sync: {}", message);
            }
        }
    }

    Ok(())
}
