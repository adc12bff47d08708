mod wallet;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shroud_config::ShroudConfig;
use shroud_core::{AccountantError, StoreError};
use shroud_privacy::{ErrorClass, PrivacyError};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "shroud")]
#[command(about = "Shielded pool wallet tool", long_about = None)]
struct Args {
    /// Config file (defaults to the usual search path)
    #[arg(long, global = true, env = "SHROUD_CONFIG")]
    config: Option<PathBuf>,

    /// Wallet database directory
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Passphrase that seals the wallet's stealth keys
    #[arg(long, global = true, env = "SHROUD_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate stealth scan and spend keys
    Keygen {
        /// Replace existing keys
        #[arg(long)]
        force: bool,
        /// Derive the keys from a new 24-word backup phrase and print it
        #[arg(long)]
        mnemonic: bool,
    },
    /// Rebuild stealth keys from a backup phrase
    Restore {
        /// BIP-39 phrase, quoted
        phrase: String,
        /// Optional BIP-39 passphrase used when the phrase was created
        #[arg(long, default_value = "")]
        bip39_passphrase: String,
        /// Replace existing keys
        #[arg(long)]
        force: bool,
    },
    /// Print this wallet's stealth meta-address
    Address,
    /// Print a scan-only key for watching incoming payments
    ExportViewKey,
    /// Derive a one-time payment address for a meta-address
    Derive {
        /// `stealth:<base58>`
        meta: String,
    },
    /// Check whether a payment belongs to this wallet
    Scan {
        /// Ephemeral public key (base58)
        ephemeral: String,
        /// Payment address (base58)
        address: String,
        /// Scan with an exported view key instead of this wallet's keys
        #[arg(long)]
        view_key: Option<String>,
    },
    /// Create a deposit note and add it to the local tree
    Note {
        /// Amount in base units
        denomination: u64,
    },
    /// Pending-batch commands
    Batch {
        #[command(subcommand)]
        command: BatchCommand,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum BatchCommand {
    /// Show the open batch and its readiness
    Status,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print a sample config file
    Sample,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shroud=info,shroud_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if let Command::Config {
        command: ConfigCommand::Sample,
    } = args.command
    {
        print!("{}", ShroudConfig::generate_sample());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => ShroudConfig::load_from(path)?,
        None => ShroudConfig::load()?,
    };
    if let Some(path) = args.db_path {
        config.database.path = path.display().to_string();
    }

    if let Command::Scan {
        ephemeral,
        address,
        view_key: Some(view_key),
    } = &args.command
    {
        return wallet::scan_with_view_key(view_key, ephemeral, address).map(|_| ());
    }

    let wallet = wallet::open(&config)?;
    let passphrase = args.passphrase.as_deref();
    match args.command {
        Command::Keygen { force, mnemonic } => {
            wallet::keygen(&wallet, require_passphrase(passphrase)?, force, mnemonic)
        }
        Command::Restore {
            phrase,
            bip39_passphrase,
            force,
        } => wallet::restore(
            &wallet,
            require_passphrase(passphrase)?,
            &phrase,
            &bip39_passphrase,
            force,
        ),
        Command::Address => wallet::address(&wallet),
        Command::ExportViewKey => wallet::export_view_key(&wallet, require_passphrase(passphrase)?),
        Command::Derive { meta } => wallet::derive(&meta),
        Command::Scan {
            ephemeral, address, ..
        } => wallet::scan(&wallet, require_passphrase(passphrase)?, &ephemeral, &address),
        Command::Note { denomination } => wallet::note(&wallet, &config, denomination),
        Command::Batch {
            command: BatchCommand::Status,
        } => wallet::batch_status(&wallet, &config),
        Command::Config { .. } => Ok(()),
    }
}

fn require_passphrase(passphrase: Option<&str>) -> anyhow::Result<&str> {
    match passphrase {
        Some(p) if !p.is_empty() => Ok(p),
        _ => anyhow::bail!("this command needs --passphrase or SHROUD_PASSPHRASE"),
    }
}

/// Error class of the first typed error in the chain.
fn classify(err: &anyhow::Error) -> Option<ErrorClass> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<PrivacyError>() {
            return Some(e.class());
        }
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return Some(e.class());
        }
        cause.downcast_ref::<AccountantError>().map(|e| e.class())
    })
}

fn report(err: &anyhow::Error) {
    match classify(err) {
        Some(class) if class.is_opaque() => {
            eprintln!("error[{}]: {}", class.code(), class.public_message());
        }
        Some(class) => eprintln!("error[{}]: {:#}", class.code(), err),
        None => eprintln!("error: {:#}", err),
    }
}
