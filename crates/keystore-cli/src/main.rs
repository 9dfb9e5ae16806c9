//! keystore - command-line front end for the sealed keystore
//!
//! Each subcommand maps onto one store operation. Logs go to stderr;
//! stdout carries only command output.

mod commands;
mod prompt;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::debug;

use keystore_core::settings::{default_data_dir, DEFAULT_WALLET_FILE};
use keystore_core::{RecipientSpec, RecordRef, SettingsManager, Store};

/// Encrypted account key-store
#[derive(Parser, Debug)]
#[command(name = "keystore")]
#[command(version)]
#[command(about = "Encrypted account key-store with passphrase and public-key protection")]
struct Args {
    /// Store file (default: wallet.json in the data directory)
    #[arg(long, env = "KEYSTORE_WALLET", global = true)]
    wallet: Option<PathBuf>,

    /// Directory holding settings.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// How a new wallet is protected. Without any flag a passphrase is used.
#[derive(ClapArgs, Debug)]
struct ProtectionArgs {
    /// Seal to a recipient (age1..., ssh-ed25519 ..., ssh-rsa ...)
    #[arg(long, conflicts_with_all = ["recipients_file", "identity"])]
    recipient: Option<String>,

    /// Seal to every recipient listed in a file
    #[arg(long, conflicts_with = "identity")]
    recipients_file: Option<PathBuf>,

    /// Seal to the public keys of an identity file
    #[arg(long)]
    identity: Option<PathBuf>,
}

impl ProtectionArgs {
    fn recipient_spec(self) -> Option<RecipientSpec> {
        if let Some(recipient) = self.recipient {
            Some(RecipientSpec::Literal(recipient))
        } else if let Some(path) = self.recipients_file {
            Some(RecipientSpec::RecipientsFile(path))
        } else {
            self.identity.map(RecipientSpec::IdentityFile)
        }
    }
}

/// Picks one wallet by id or by alias
#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
struct Selector {
    /// Wallet id
    #[arg(short, long)]
    id: Option<u64>,
    /// Wallet alias
    #[arg(short, long)]
    alias: Option<String>,
}

impl Selector {
    fn target(self) -> RecordRef {
        match (self.id, self.alias) {
            (Some(id), _) => RecordRef::Id(id),
            (None, alias) => RecordRef::Alias(alias.unwrap_or_default()),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a wallet with a fresh seed
    Create {
        #[arg(long)]
        alias: Option<String>,
        #[command(flatten)]
        protection: ProtectionArgs,
    },
    /// Add a wallet from an existing seed
    Restore {
        /// Seed as hex; asked for without echo when omitted
        #[arg(long)]
        seed: Option<String>,
        #[arg(long)]
        alias: Option<String>,
        #[command(flatten)]
        protection: ProtectionArgs,
    },
    /// Change the passphrase of a passphrase-protected wallet
    Passwd {
        #[command(flatten)]
        wallet: Selector,
    },
    /// Set or clear (with an empty string) a wallet alias
    Rename {
        #[command(flatten)]
        wallet: Selector,
        /// New alias
        #[arg(long, visible_alias = "newalias")]
        new_alias: String,
    },
    /// Delete wallets by id or alias
    Delete {
        #[command(flatten)]
        wallet: Selector,
    },
    /// List stored wallets
    List,
    /// Decrypt a wallet and print its keys
    Show {
        #[command(flatten)]
        wallet: Selector,
        /// Identity file(s) for key-protected wallets
        #[arg(long)]
        identity: Vec<PathBuf>,
    },
    /// Generate an X25519 identity
    Keygen {
        /// Write the identity to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Protect the identity file with a passphrase
        #[arg(long, requires = "output")]
        protect: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let config_dir = match args.config_dir {
        Some(dir) => dir,
        None => default_data_dir().context("Failed to locate the data directory")?,
    };
    let settings = SettingsManager::load(&config_dir)
        .with_context(|| format!("Failed to load settings from {:?}", config_dir))?;

    let wallet = args
        .wallet
        .unwrap_or_else(|| config_dir.join(DEFAULT_WALLET_FILE));
    debug!("Using store {:?}", wallet);

    let command = args.command;
    if let Command::Keygen { output, protect } = &command {
        return commands::keygen(output.as_deref(), *protect, settings.get());
    }

    let mut store = Store::load_with(
        &wallet,
        Box::new(keystore_core::Ed25519Deriver),
        settings.get().clone(),
    )
    .with_context(|| format!("Failed to load store {:?}", wallet))?;

    match command {
        Command::Create { alias, protection } => {
            commands::create(&mut store, None, alias, protection.recipient_spec())
        }
        Command::Restore {
            seed,
            alias,
            protection,
        } => commands::restore(&mut store, seed, alias, protection.recipient_spec()),
        Command::Passwd { wallet } => commands::passwd(&mut store, wallet.target()),
        Command::Rename { wallet, new_alias } => {
            commands::rename(&mut store, wallet.target(), &new_alias)
        }
        Command::Delete { wallet } => commands::delete(&mut store, wallet.target()),
        Command::List => commands::list(&store),
        Command::Show { wallet, identity } => commands::show(&store, wallet.target(), &identity),
        Command::Keygen { .. } => Ok(()),
    }
}
