//! PaaS SSH Key Agent
//!
//! Manages the SSH public keys registered with a broker account.
//!
//! # Usage
//! ```bash
//! # List keys
//! paas-ssh-keys --username dev@lornu.ai list
//!
//! # Register a public key
//! paas-ssh-keys add laptop --key-file ~/.ssh/id_rsa.pub
//!
//! # Generate a key pair and register its public half
//! paas-ssh-keys keygen --type rsa --private ./id_rsa --public ./id_rsa.pub --upload laptop
//!
//! # Delete a key
//! paas-ssh-keys delete laptop
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use paas_ssh_keys::{
    Credentials, KeyGenerator, KeyPair, KeyRecord, NativeKeygen, PublicKey, SessionConfig, SshKey,
    SshKeyType, SshKeygen, UserSession,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "paas-ssh-keys")]
#[command(about = "Manage the SSH keys of a PaaS broker account", long_about = None)]
#[command(version)]
struct Cli {
    /// Broker REST endpoint
    #[arg(long, env = "PAAS_BROKER_URL", default_value = paas_ssh_keys::session::DEFAULT_BROKER_URL)]
    broker_url: String,

    /// Account login (HTTP basic auth)
    #[arg(long, env = "PAAS_USERNAME", requires = "password", conflicts_with = "token")]
    username: Option<String>,

    /// Account password
    #[arg(long, env = "PAAS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// API token (bearer auth)
    #[arg(long, env = "PAAS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all keys
    List,

    /// Show one key
    Show {
        /// Key name
        name: String,
    },

    /// Register a new key (fails if the name is taken)
    Add {
        /// Key name
        name: String,

        /// OpenSSH public key file
        #[arg(long)]
        key_file: PathBuf,
    },

    /// Create or replace a key with PUT
    Put {
        /// Key name
        name: String,

        /// OpenSSH public key file
        #[arg(long)]
        key_file: PathBuf,
    },

    /// Replace the public key of an existing key
    Update {
        /// Key name
        name: String,

        /// OpenSSH public key file
        #[arg(long)]
        key_file: PathBuf,
    },

    /// Delete a key
    Delete {
        /// Key name
        name: String,
    },

    /// Generate a key pair on disk
    Keygen {
        /// Key type
        #[arg(long = "type", value_enum, default_value = "rsa")]
        key_type: KeyTypeArg,

        /// Private key output path
        #[arg(long)]
        private: PathBuf,

        /// Public key output path
        #[arg(long)]
        public: PathBuf,

        /// Passphrase for the private key (empty for none)
        #[arg(long, default_value = "")]
        passphrase: String,

        /// Use the system ssh-keygen instead of the built-in generator
        #[arg(long)]
        external: bool,

        /// Register the new public key under this name
        #[arg(long)]
        upload: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyTypeArg {
    Rsa,
    Dsa,
}

impl From<KeyTypeArg> for SshKeyType {
    fn from(arg: KeyTypeArg) -> Self {
        match arg {
            KeyTypeArg::Rsa => SshKeyType::Rsa,
            KeyTypeArg::Dsa => SshKeyType::Dsa,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
}

impl Cli {
    fn session(&self) -> Result<UserSession> {
        let credentials = match (&self.username, &self.password, &self.token) {
            (_, _, Some(token)) => Credentials::token(token),
            (Some(username), Some(password), None) => Credentials::basic(username, password),
            _ => {
                warn!("No credentials given, requests will be unauthenticated");
                Credentials::None
            }
        };

        let config = SessionConfig::new(&self.broker_url, credentials)
            .timeout(Duration::from_secs(self.timeout_secs))
            .accept_invalid_certs(self.insecure);

        UserSession::new(config).context("Failed to create broker session")
    }
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::List => {
            let session = cli.session()?;
            let keys = session.get_ssh_keys().await.context("Failed to list SSH keys")?;
            print_keys(cli.output, &keys)?;
            info!("Listed {} keys", keys.len());
        }

        Commands::Show { name } => {
            let session = cli.session()?;
            let key = session
                .get_ssh_key_by_name(name)
                .await?
                .with_context(|| format!("No SSH key named {name}"))?;
            print_keys(cli.output, &[key])?;
        }

        Commands::Add { name, key_file } => {
            let public_key = PublicKey::from_file(key_file)?;
            let key = cli.session()?.add_ssh_key(name, public_key).await?;
            print_keys(cli.output, &[key])?;
        }

        Commands::Put { name, key_file } => {
            let public_key = PublicKey::from_file(key_file)?;
            let key = cli.session()?.put_ssh_key(name, &public_key).await?;
            print_keys(cli.output, &[key])?;
        }

        Commands::Update { name, key_file } => {
            let public_key = PublicKey::from_file(key_file)?;
            let session = cli.session()?;
            let key = session
                .get_ssh_key_by_name(name)
                .await?
                .with_context(|| format!("No SSH key named {name}"))?;
            key.update(public_key).await?;
            print_keys(cli.output, &[key])?;
        }

        Commands::Delete { name } => {
            warn!("Deleting SSH key: {}", name);
            cli.session()?.delete_key(name).await?;
            println!("Deleted key: {name}");
        }

        Commands::Keygen {
            key_type,
            private,
            public,
            passphrase,
            external,
            upload,
        } => {
            let generator: Box<dyn KeyGenerator> = if *external {
                Box::new(SshKeygen::new())
            } else {
                Box::new(NativeKeygen::new())
            };
            let pair = KeyPair::create(
                generator.as_ref(),
                (*key_type).into(),
                passphrase,
                private,
                public,
            )?;
            info!(
                key_type = %pair.key_type(),
                public_key = %pair.public_key_path().display(),
                "Key pair generated"
            );

            match upload {
                Some(name) => {
                    let key = cli.session()?.add_ssh_key(name, pair).await?;
                    print_keys(cli.output, &[key])?;
                }
                None => println!("{}", pair.public_key()),
            }
        }
    }

    Ok(())
}

fn print_keys(format: OutputFormat, keys: &[SshKey]) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{:<24} {:<8} {:<40}", "NAME", "TYPE", "PUBLIC KEY");
            println!("{}", "-".repeat(74));
            for key in keys {
                println!(
                    "{:<24} {:<8} {:<40}",
                    key.name(),
                    key.key_type(),
                    truncate(&key.public_key(), 40)
                );
            }
        }
        OutputFormat::Json => {
            let records: Vec<KeyRecord> = keys
                .iter()
                .map(|key| KeyRecord {
                    name: key.name().to_string(),
                    key_type: key.key_type(),
                    content: key.public_key(),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&records).context("Failed to serialize keys")?
            );
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max - 3])
    } else {
        s.to_string()
    }
}
