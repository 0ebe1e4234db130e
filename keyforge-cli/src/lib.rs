//! Command-line front end for keyforge.
//!
//! Usage:
//!   keyforge keygen
//!   keyforge --config keyforge.toml issue --plugin reverb-pro --tier pro \
//!       --user-id 42 --email user@example.com
//!   keyforge install --plugin reverb-pro KFL1-...
//!
//! Commands return their output as text so they can be driven from tests;
//! the binary only parses arguments, sets up logging and prints.

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use keyforge_crypto::{Ed25519Provider, SignatureAlgorithm, SignatureProvider};
use keyforge_license::{
    decode, key_fingerprint, FileLedger, KeyforgeConfig, LicenseIssuer, LicenseRequest,
    MetadataValue, OfflineLedger, ValidationEngine,
};
use keyforge_store::{
    default_store_dir, JsonFileBackend, LicenseSource, LicenseStore, StorePaths,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Name of the configuration file looked up in the store directory.
pub const CONFIG_FILE: &str = "keyforge.toml";

#[derive(Parser, Debug)]
#[command(name = "keyforge")]
#[command(about = "Issue, validate and manage plugin licenses", version)]
pub struct Cli {
    /// License configuration file (TOML). Defaults to keyforge.toml in the store directory
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the license store and offline ledger
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate an Ed25519 signing key pair
    Keygen,

    /// Issue a signed license (requires a private key in the config)
    Issue {
        #[arg(long)]
        plugin: String,
        #[arg(long)]
        tier: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: String,
        /// Replace the tier's feature set (repeatable)
        #[arg(long = "feature")]
        features: Vec<String>,
        #[arg(long)]
        max_users: Option<u32>,
        /// Attach metadata as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_meta)]
        metadata: Vec<(String, String)>,
    },

    /// Decode a license key without verifying it
    Inspect { key: String },

    /// Validate a license key for a plugin
    Validate {
        #[arg(long)]
        plugin: String,
        key: String,
    },

    /// Validate and install a license for a plugin
    Install {
        #[arg(long)]
        plugin: String,
        key: String,
        #[arg(long, default_value = "manual")]
        source: LicenseSource,
        #[arg(long)]
        email: Option<String>,
    },

    /// Stack an add-on license onto a plugin's installed license
    Stack {
        #[arg(long)]
        plugin: String,
        key: String,
        #[arg(long, default_value = "purchase")]
        source: LicenseSource,
    },

    /// Remove a plugin's license
    Remove {
        #[arg(long)]
        plugin: String,
    },

    /// Re-validate one plugin's license, or all of them
    Refresh {
        #[arg(long)]
        plugin: Option<String>,
    },

    /// Revoke a plugin's license on the license server
    Revoke {
        #[arg(long)]
        plugin: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// List installed licenses
    List,

    /// Show the features currently enabled for a plugin
    Features {
        #[arg(long)]
        plugin: String,
    },

    /// Export installed licenses as JSON
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Import licenses from an export file
    Import { file: PathBuf },
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err("metadata key must not be empty".to_string());
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn metadata_value(raw: &str) -> MetadataValue {
    if let Ok(n) = raw.parse::<i64>() {
        return MetadataValue::Integer(n);
    }
    if let Ok(b) = raw.parse::<bool>() {
        return MetadataValue::Bool(b);
    }
    MetadataValue::from(raw)
}

/// Resolved paths and configuration for one invocation.
pub struct Context {
    pub store_dir: PathBuf,
    pub config: KeyforgeConfig,
}

impl Context {
    /// Resolves the store directory and loads the configuration.
    ///
    /// An explicit config path must exist; the default location may be
    /// absent, in which case no plugins are registered.
    pub fn resolve(config: Option<&Path>, store: Option<&Path>) -> Result<Self> {
        let store_dir = match store {
            Some(dir) => dir.to_path_buf(),
            None => default_store_dir()
                .context("cannot determine the local data directory; pass --store")?,
        };

        let config = match config {
            Some(path) => KeyforgeConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => {
                let path = store_dir.join(CONFIG_FILE);
                if path.exists() {
                    KeyforgeConfig::load(&path)
                        .with_context(|| format!("failed to load config {}", path.display()))?
                } else {
                    debug!(path = %path.display(), "No config file, no plugins registered");
                    KeyforgeConfig::default()
                }
            }
        };

        Ok(Self { store_dir, config })
    }

    fn paths(&self) -> StorePaths {
        StorePaths::in_dir(&self.store_dir)
    }

    fn ledger(&self) -> Result<Arc<dyn OfflineLedger>> {
        let path = self.paths().ledger;
        let ledger = FileLedger::open(&path)
            .with_context(|| format!("failed to open offline ledger {}", path.display()))?;
        Ok(Arc::new(ledger))
    }

    fn engine(&self) -> Result<ValidationEngine> {
        let engine = ValidationEngine::new(Arc::new(Ed25519Provider::new()), self.ledger()?);
        attach_remote(engine, &self.config)
    }

    async fn open_store(&self) -> Result<LicenseStore> {
        let backend = JsonFileBackend::new(self.paths().licenses);
        let store = LicenseStore::open(self.engine()?, Arc::new(backend))
            .context("failed to open license store")?;
        store.register_all(&self.config).await;
        Ok(store)
    }
}

#[cfg(feature = "online")]
fn attach_remote(engine: ValidationEngine, config: &KeyforgeConfig) -> Result<ValidationEngine> {
    let server = config
        .plugins
        .values()
        .filter(|p| p.remote.enabled)
        .find_map(|p| p.remote.server_url.clone().map(|url| (url, p.remote.timeout())));

    match server {
        Some((url, timeout)) => {
            let client = keyforge_license::HttpRemoteClient::new(url.as_str(), timeout)
                .with_context(|| format!("failed to create license server client for {url}"))?;
            debug!(server = %url, "Using remote license server");
            Ok(engine.with_remote(Arc::new(client)))
        }
        None => Ok(engine),
    }
}

#[cfg(not(feature = "online"))]
fn attach_remote(engine: ValidationEngine, config: &KeyforgeConfig) -> Result<ValidationEngine> {
    if config.plugins.values().any(|p| p.remote.enabled) {
        tracing::warn!("Remote validation is configured but keyforge was built without the `online` feature");
    }
    Ok(engine)
}

fn pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize output")
}

/// Runs one command and returns what should be printed.
pub async fn run(cli: Cli) -> Result<String> {
    let Cli {
        config,
        store,
        command,
        ..
    } = cli;

    match command {
        Command::Keygen => keygen(),

        Command::Inspect { key } => inspect(&key),

        Command::Issue {
            plugin,
            tier,
            user_id,
            email,
            features,
            max_users,
            metadata,
        } => {
            let ctx = Context::resolve(config.as_deref(), store.as_deref())?;
            let config = ctx.config.plugin(&plugin)?;
            let issuer = LicenseIssuer::new(Arc::new(Ed25519Provider::new()), config.crypto.clone())?;
            let mut request = LicenseRequest::new(plugin, tier, user_id, email);
            if !features.is_empty() {
                request = request.with_features(features);
            }
            request.max_users = max_users;
            for (key, value) in metadata {
                request = request.with_metadata(key, metadata_value(&value));
            }
            let license = issuer.generate(&request, &config.tiers)?;
            pretty(&license)
        }

        Command::Validate { plugin, key } => {
            let ctx = Context::resolve(config.as_deref(), store.as_deref())?;
            let config = ctx.config.plugin(&plugin)?;
            let result = ctx.engine()?.validate(&key, &plugin, config).await?;
            pretty(&result)
        }

        command => {
            let ctx = Context::resolve(config.as_deref(), store.as_deref())?;
            with_store(&ctx, command).await
        }
    }
}

async fn with_store(ctx: &Context, command: Command) -> Result<String> {
    let store = ctx.open_store().await?;
    let output = match command {
        Command::Install {
            plugin,
            key,
            source,
            email,
        } => pretty(&store.install(&plugin, &key, source, email).await?)?,

        Command::Stack {
            plugin,
            key,
            source,
        } => pretty(&store.stack(&plugin, &key, source).await?)?,

        Command::Remove { plugin } => {
            if store.remove(&plugin).await? {
                format!("removed license for {plugin}")
            } else {
                format!("no license installed for {plugin}")
            }
        }

        Command::Refresh { plugin: Some(plugin) } => match store.refresh(&plugin).await? {
            Some(entry) => pretty(&entry)?,
            None => format!("no license installed for {plugin}"),
        },

        Command::Refresh { plugin: None } => pretty(&store.refresh_all().await?)?,

        Command::Revoke { plugin, reason } => {
            if store.revoke(&plugin, reason.as_deref()).await? {
                format!("license for {plugin} revoked")
            } else {
                bail!("license server refused to revoke the license for {plugin}")
            }
        }

        Command::List => list(&store).await,

        Command::Features { plugin } => {
            let features = store.effective_features(&plugin).await;
            pretty(&json!({ "plugin_id": plugin, "features": features }))?
        }

        Command::Export { out } => {
            let exported = store.export().await?;
            match out {
                Some(path) => {
                    write_file(&path, &exported)?;
                    format!("exported {} license(s) to {}", store.list().await.len(), path.display())
                }
                None => exported,
            }
        }

        Command::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            pretty(&store.import(&json).await?)?
        }

        other => bail!("{other:?} does not use the license store"),
    };
    store.shutdown().await?;
    Ok(output)
}

async fn list(store: &LicenseStore) -> String {
    let entries = store.list().await;
    if entries.is_empty() {
        return "no licenses installed".to_string();
    }
    entries
        .iter()
        .map(|e| {
            format!(
                "{:<24} {:<12} {:<8} {:<9} stacked={} checked={}",
                e.plugin_id,
                e.tier_id,
                if e.is_valid() { "valid" } else { "INVALID" },
                e.source,
                e.stacked.len(),
                e.last_validated.format("%Y-%m-%d %H:%M"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn keygen() -> Result<String> {
    let pair = Ed25519Provider::new()
        .generate_key_pair(SignatureAlgorithm::Ed25519, SignatureAlgorithm::Ed25519.key_size_bits())
        .context("key generation failed")?;
    pretty(&json!({
        "algorithm": SignatureAlgorithm::Ed25519,
        "public_key": pair.public_key,
        "private_key": pair.private_key,
    }))
}

fn inspect(key: &str) -> Result<String> {
    let decoded = decode(key)?;
    let fingerprint = key_fingerprint(key);
    pretty(&json!({
        "version": decoded.version,
        "algorithm": decoded.algorithm,
        "fingerprint": fingerprint.get(..12).unwrap_or(&fingerprint),
        "verified": false,
        "payload": decoded.payload,
    }))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
