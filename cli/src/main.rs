//! Warden CLI
//!
//! Thin front end over `warden-core`. Chains live in JSON Lines files, one
//! serialized link per line, in insertion order.
//!
//! Commands:
//! - warden chain genesis <identifier>
//! - warden chain keygen
//! - warden chain append --file audit.jsonl --payload "..." [--meta k=v] [--signing-key <hex>]
//! - warden chain verify --file audit.jsonl --genesis <hash> [--public-key <hex>]
//! - warden chain stats|forks --file audit.jsonl
//! - warden totp secret|code|verify|uri|backup-codes

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use warden_core::hash_chain::format_hash_short;
use warden_core::totp::{self, current_unix_time, seconds_remaining};
use warden_core::{
    generate_keypair, hash_backup_code, signing_key_from_hex, verifying_key_from_hex,
    ChainConfig, HashChain, Metadata, NewLink, TotpEngine, WardenConfig,
};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Tamper-evident audit chains and TOTP second-factor tooling")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.warden/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash chain operations
    Chain {
        #[command(subcommand)]
        command: ChainCommands,
    },

    /// One-time password operations
    Totp {
        #[command(subcommand)]
        command: TotpCommands,
    },
}

#[derive(Subcommand)]
enum ChainCommands {
    /// Derive a genesis hash for a new chain
    Genesis {
        /// Identifier mixed into the genesis hash (e.g. tenant or log name)
        identifier: String,

        /// Fixed timestamp in ms (default: now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Generate an Ed25519 key pair for signing links
    Keygen,

    /// Append a link to a chain file
    Append {
        /// Chain file (JSON Lines)
        #[arg(long)]
        file: PathBuf,

        /// Link payload
        #[arg(long)]
        payload: String,

        /// Predecessor hash (default: latest link in the file)
        #[arg(long)]
        previous: Option<String>,

        /// Timestamp in ms (default: now)
        #[arg(long)]
        timestamp: Option<i64>,

        /// Externally produced signature
        #[arg(long, conflicts_with = "signing_key")]
        signature: Option<String>,

        /// Sign the link with this hex Ed25519 secret key
        #[arg(long)]
        signing_key: Option<String>,

        /// Metadata entry as key=value (value parsed as JSON when possible)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Verify a chain file back to its genesis hash
    Verify {
        /// Chain file (JSON Lines)
        #[arg(long)]
        file: PathBuf,

        /// Genesis hash the chain is anchored to
        #[arg(long)]
        genesis: String,

        /// Also require every link to carry a valid signature for this hex public key
        #[arg(long)]
        public_key: Option<String>,

        /// Print the full verification result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show chain statistics
    Stats {
        /// Chain file (JSON Lines)
        #[arg(long)]
        file: PathBuf,
    },

    /// List predecessors claimed by more than one link
    Forks {
        /// Chain file (JSON Lines)
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum TotpCommands {
    /// Generate a new base32 secret
    Secret,

    /// Print the code for a secret
    Code {
        /// Base32 secret
        #[arg(long)]
        secret: String,

        /// Unix time in seconds (default: now)
        #[arg(long)]
        time: Option<u64>,
    },

    /// Check a code against a secret
    Verify {
        /// Base32 secret
        #[arg(long)]
        secret: String,

        /// Code to check
        #[arg(long)]
        token: String,

        /// Accepted drift in 30-second steps (default: from config)
        #[arg(long)]
        window: Option<u32>,
    },

    /// Build an otpauth:// provisioning URI
    Uri {
        /// Account email
        #[arg(long)]
        email: String,

        /// Base32 secret
        #[arg(long)]
        secret: String,
    },

    /// Generate backup codes and their storage hashes
    BackupCodes {
        /// Number of codes (default: from config)
        #[arg(long)]
        count: Option<usize>,
    },
}

fn load_chain(path: &Path, config: &ChainConfig) -> Result<HashChain> {
    if !path.exists() {
        debug!("Chain file {} not found, starting empty", path.display());
        return Ok(HashChain::new(config.clone()));
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chain file {:?}", path))?;
    HashChain::from_json_lines(config.clone(), &content)
        .with_context(|| format!("Failed to parse chain file {:?}", path))
}

fn parse_metadata(entries: &[String]) -> Result<Option<Metadata>> {
    if entries.is_empty() {
        return Ok(None);
    }
    let mut metadata = Metadata::new();
    for entry in entries {
        let Some((key, raw)) = entry.split_once('=') else {
            bail!("Invalid metadata entry {:?}, expected KEY=VALUE", entry);
        };
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(Some(metadata))
}

fn run_chain(command: ChainCommands, config: &WardenConfig) -> Result<()> {
    match command {
        ChainCommands::Genesis {
            identifier,
            timestamp,
        } => {
            let chain = HashChain::new(config.chain.clone());
            let hash = match timestamp {
                Some(ts) => chain.genesis_hash_at(&identifier, ts),
                None => chain.genesis_hash(&identifier),
            };
            println!("{}", hash);
        }

        ChainCommands::Keygen => {
            let pair = generate_keypair();
            println!("{}", serde_json::to_string_pretty(&pair)?);
        }

        ChainCommands::Append {
            file,
            payload,
            previous,
            timestamp,
            signature,
            signing_key,
            meta,
        } => {
            let mut chain = load_chain(&file, &config.chain)?;
            let previous = match previous {
                Some(hash) => hash,
                None => match chain.latest_link() {
                    Some(link) => link.hash.clone(),
                    None => bail!("Chain is empty; pass --previous <genesis hash>"),
                },
            };

            let new_link = NewLink {
                previous_hash: previous,
                payload,
                timestamp,
                signature,
                metadata: parse_metadata(&meta)?,
            };
            let link = match signing_key {
                Some(hex) => {
                    let key = signing_key_from_hex(&hex).context("Invalid signing key")?;
                    chain.create_signed_link(new_link, &key)?
                }
                None => chain.create_link(new_link)?,
            };

            std::fs::write(&file, chain.to_json_lines()?)
                .with_context(|| format!("Failed to write chain file {:?}", file))?;
            info!("Appended link {} ({} total)", format_hash_short(&link.hash), chain.len());
            println!("{}", link.hash);
        }

        ChainCommands::Verify {
            file,
            genesis,
            public_key,
            json,
        } => {
            let chain = load_chain(&file, &config.chain)?;
            let result = chain.verify_entire_chain(&genesis);
            let check_signatures = public_key.is_some();
            let unverified = match public_key {
                Some(hex) => {
                    let key = verifying_key_from_hex(&hex).context("Invalid public key")?;
                    chain.find_unverified_signatures(&key)
                }
                None => Vec::new(),
            };

            if json && check_signatures {
                let report = serde_json::json!({
                    "verification": result,
                    "unverifiedSignatures": unverified,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.valid {
                println!(
                    "Chain valid: {}/{} links verified",
                    result.verified_links, result.total_links
                );
            } else {
                println!(
                    "Chain INVALID: broken at {}",
                    result.broken_at.as_deref().unwrap_or("-")
                );
                for issue in &result.issues {
                    println!("  - {}", issue);
                }
            }

            if !json && !unverified.is_empty() {
                println!("Signature check FAILED for {} links:", unverified.len());
                for hash in &unverified {
                    println!("  - {}", format_hash_short(hash));
                }
            }

            if !result.valid || !unverified.is_empty() {
                std::process::exit(1);
            }
        }

        ChainCommands::Stats { file } => {
            let chain = load_chain(&file, &config.chain)?;
            println!("{}", serde_json::to_string_pretty(&chain.stats())?);
        }

        ChainCommands::Forks { file } => {
            let chain = load_chain(&file, &config.chain)?;
            let forks = chain.find_forks();
            if forks.is_empty() {
                println!("No forks found");
            } else {
                for fork in forks {
                    println!(
                        "{} -> {}",
                        format_hash_short(&fork.previous_hash),
                        fork.successors
                            .iter()
                            .map(|hash| format_hash_short(hash))
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
            }
        }
    }
    Ok(())
}

fn run_totp(command: TotpCommands, config: &WardenConfig) -> Result<()> {
    let engine = TotpEngine::new(config.totp.clone());

    match command {
        TotpCommands::Secret => {
            println!("{}", engine.generate_secret());
        }

        TotpCommands::Code { secret, time } => {
            let time = time.unwrap_or_else(current_unix_time);
            let code = totp::generate_totp(&secret, time).context("Invalid secret")?;
            println!("{} ({}s remaining)", code, seconds_remaining(time));
        }

        TotpCommands::Verify {
            secret,
            token,
            window,
        } => {
            let window = window.unwrap_or(engine.config().window);
            if totp::verify_totp(&secret, &token, window).context("Invalid secret")? {
                println!("valid");
            } else {
                println!("invalid");
                std::process::exit(1);
            }
        }

        TotpCommands::Uri { email, secret } => {
            println!("{}", engine.otpauth_uri(&email, &secret));
        }

        TotpCommands::BackupCodes { count } => {
            let count = count.unwrap_or(engine.config().backup_code_count);
            for code in engine.generate_backup_codes(count) {
                println!("{}  {}", code, hash_backup_code(&code));
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warden=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = WardenConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Chain { command } => run_chain(command, &config),
        Commands::Totp { command } => run_totp(command, &config),
    }
}
