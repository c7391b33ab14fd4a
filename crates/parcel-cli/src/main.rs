//! parcel: message and attachment crypto from the command line
//!
//! Commands:
//!   master-key new | check <file>    - create or validate a master key
//!   derive-key                       - derive a sub-key from a master key
//!   encrypt / decrypt                - one-shot AES-256/GCM of a file
//!   decrypt-attachments              - stream-decrypt and split an attachment blob
//!   hash <file>                      - SHA-512 (or SHA-256) of a file
//!   config show                      - display current configuration

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use parcel_core::{AttachmentEntry, AttachmentManifest, MessageId, ParcelConfig, ReleasePolicy};
use parcel_crypto::{
    AttachmentPipeline, Hasher, KeyHierarchy, MasterKey, PipelineOptions, PrependIv, Sink,
    SymmetricCryptor, SymmetricKey, VerifiedStreamFactory, WriterSink, ATTACHMENTS_IV, CONTENT_IV,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "parcel",
    version,
    about = "Message and attachment encryption toolkit",
    long_about = "parcel: derive keys, encrypt message content and stream-decrypt attachments"
)]
struct Cli {
    /// Path to parcel.toml configuration file
    #[arg(long, short = 'c', env = "PARCEL_CONFIG", default_value = "parcel.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "PARCEL_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "PARCEL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Master key management
    #[command(name = "master-key")]
    MasterKey {
        #[command(subcommand)]
        action: MasterKeyAction,
    },

    /// Derive a sub-key from a master key file
    #[command(name = "derive-key")]
    DeriveKey {
        /// Master key file (armoured text form)
        #[arg(long, short = 'm')]
        master: PathBuf,
        #[command(flatten)]
        purpose: Purpose,
        /// Output length in bits (default: from config for the purpose)
        #[arg(long)]
        bits: Option<usize>,
    },

    /// Encrypt a file with AES-256/GCM
    Encrypt {
        #[command(flatten)]
        key: KeyArg,
        /// Use a fixed IV instead of a random prepended one
        #[arg(long)]
        fixed_iv: Option<FixedIv>,
        input: PathBuf,
        output: PathBuf,
    },

    /// Decrypt a file encrypted by `encrypt`
    Decrypt {
        #[command(flatten)]
        key: KeyArg,
        /// The IV the file was encrypted with; omit when it is prepended
        #[arg(long)]
        fixed_iv: Option<FixedIv>,
        input: PathBuf,
        output: PathBuf,
    },

    /// Stream-decrypt an attachment blob into one file per attachment
    #[command(name = "decrypt-attachments")]
    DecryptAttachments {
        #[command(flatten)]
        key: KeyArg,
        /// Attachment manifest (JSON)
        #[arg(long)]
        manifest: PathBuf,
        /// Directory receiving <message_id>-<index>.bin files
        #[arg(long, short = 'o')]
        out_dir: PathBuf,
        /// Expected SHA-512 of the whole decrypted stream (hex)
        #[arg(long)]
        stream_hash: Option<String>,
        /// Overrides pipeline.release_policy
        #[arg(long)]
        release_policy: Option<Policy>,
        /// Inflate the decrypted blob before splitting (sets pipeline.gzip)
        #[arg(long)]
        gzip: bool,
        input: PathBuf,
    },

    /// Print the digest of a file
    Hash {
        /// SHA-256 instead of SHA-512
        #[arg(long)]
        sha256: bool,
        input: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum MasterKeyAction {
    /// Generate a new random master key
    New {
        /// Write to this file instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Validate a master key file
    Check { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Purpose {
    /// Login key for this address
    #[arg(long)]
    login: Option<String>,
    /// Private-data key
    #[arg(long)]
    private_data: bool,
    /// Message key for this message id
    #[arg(long)]
    message: Option<MessageId>,
    /// Raw HKDF info string
    #[arg(long)]
    info: Option<String>,
}

#[derive(Args, Debug)]
struct KeyArg {
    /// Symmetric key (hex)
    #[arg(long, short = 'k', env = "PARCEL_KEY", hide_env_values = true)]
    key: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FixedIv {
    Content,
    Attachments,
}

impl FixedIv {
    fn bytes(self) -> &'static [u8] {
        match self {
            FixedIv::Content => CONTENT_IV,
            FixedIv::Attachments => ATTACHMENTS_IV,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Streaming,
    Authenticated,
}

impl From<Policy> for ReleasePolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Streaming => ReleasePolicy::Streaming,
            Policy::Authenticated => ReleasePolicy::Authenticated,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ParcelConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "parcel starting"
    );

    match cli.command {
        Commands::MasterKey { action: MasterKeyAction::New { out } } => {
            cmd_master_key_new(out.as_deref())
        }
        Commands::MasterKey { action: MasterKeyAction::Check { path } } => {
            cmd_master_key_check(&path)
        }
        Commands::DeriveKey { master, purpose, bits } => {
            cmd_derive_key(&config, &master, &purpose, bits)
        }
        Commands::Encrypt { key, fixed_iv, input, output } => {
            cmd_encrypt(&config, &key, fixed_iv, &input, &output)
        }
        Commands::Decrypt { key, fixed_iv, input, output } => {
            cmd_decrypt(&config, &key, fixed_iv, &input, &output)
        }
        Commands::DecryptAttachments {
            key,
            manifest,
            out_dir,
            stream_hash,
            release_policy,
            gzip,
            input,
        } => cmd_decrypt_attachments(
            &config,
            &key,
            &manifest,
            &out_dir,
            stream_hash.as_deref(),
            release_policy,
            gzip,
            &input,
        ),
        Commands::Hash { sha256, input } => cmd_hash(sha256, &input),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // logs go to stderr so command output stays pipeable
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_key(arg: &KeyArg) -> Result<SymmetricKey> {
    let secret = SecretString::from(arg.key.clone());
    SymmetricKey::from_hex(secret.expose_secret()).context("parsing --key")
}

fn read_master_key(path: &Path) -> Result<MasterKey> {
    let pem = SecretString::from(
        std::fs::read_to_string(path)
            .with_context(|| format!("reading master key: {}", path.display()))?,
    );
    MasterKey::from_pem(pem.expose_secret())
        .with_context(|| format!("parsing master key: {}", path.display()))
}

// ── `parcel master-key` ───────────────────────────────────────────────────────

fn cmd_master_key_new(out: Option<&Path>) -> Result<()> {
    let key = MasterKey::make_random()?;
    let pem = SecretString::from(key.to_pem());
    match out {
        Some(path) => {
            if path.exists() {
                bail!("refusing to overwrite existing file: {}", path.display());
            }
            std::fs::write(path, pem.expose_secret())
                .with_context(|| format!("writing master key: {}", path.display()))?;
            println!("master key written to {}", path.display());
        }
        None => print!("{}", pem.expose_secret()),
    }
    Ok(())
}

fn cmd_master_key_check(path: &Path) -> Result<()> {
    let key = read_master_key(path)?;
    println!("valid master key (version {})", key.version());
    Ok(())
}

// ── `parcel derive-key` ───────────────────────────────────────────────────────

fn cmd_derive_key(
    config: &ParcelConfig,
    master_path: &Path,
    purpose: &Purpose,
    bits: Option<usize>,
) -> Result<()> {
    let master = read_master_key(master_path)?;
    let hierarchy = KeyHierarchy::new();
    let keys = &config.keys;

    let derived = if let Some(address) = &purpose.login {
        hierarchy.login_key(&master, address, bits.unwrap_or(keys.login_key_bits))?
    } else if purpose.private_data {
        hierarchy.private_data_key(&master, bits.unwrap_or(keys.private_data_key_bits))?
    } else if let Some(id) = purpose.message {
        hierarchy.message_key(&master, id, bits.unwrap_or(keys.message_key_bits))?
    } else if let Some(info) = &purpose.info {
        hierarchy.expand(&master.to_symmetric_key(), info, bits.unwrap_or(256))?
    } else {
        bail!("one of --login, --private-data, --message or --info is required");
    };

    println!("{}", derived.to_hex());
    Ok(())
}

// ── `parcel encrypt` / `parcel decrypt` ───────────────────────────────────────

fn cmd_encrypt(
    config: &ParcelConfig,
    key: &KeyArg,
    fixed_iv: Option<FixedIv>,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let key = parse_key(key)?;
    let plaintext =
        std::fs::read(input).with_context(|| format!("reading input: {}", input.display()))?;

    let cryptor = SymmetricCryptor::new();
    let ciphertext = match fixed_iv {
        Some(iv) => cryptor.encrypt(&plaintext, &key, iv.bytes(), PrependIv::DontPrepend)?,
        None => {
            let iv = parcel_crypto::generate_iv(config.keys.random_iv_bytes);
            cryptor.encrypt(&plaintext, &key, &iv, PrependIv::Prepend)?
        }
    };

    std::fs::write(output, &ciphertext)
        .with_context(|| format!("writing output: {}", output.display()))?;
    tracing::info!(
        input = %input.display(),
        plaintext = plaintext.len(),
        ciphertext = ciphertext.len(),
        "encrypted"
    );
    Ok(())
}

fn cmd_decrypt(
    config: &ParcelConfig,
    key: &KeyArg,
    fixed_iv: Option<FixedIv>,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let key = parse_key(key)?;
    let ciphertext =
        std::fs::read(input).with_context(|| format!("reading input: {}", input.display()))?;

    let cryptor = SymmetricCryptor::new();
    let plaintext = match fixed_iv {
        Some(iv) => cryptor.decrypt(&ciphertext, &key, iv.bytes()),
        None => cryptor.decrypt_with_iv_prefix(&ciphertext, &key, config.keys.random_iv_bytes),
    }
    .with_context(|| format!("decrypting {}", input.display()))?;

    std::fs::write(output, &plaintext)
        .with_context(|| format!("writing output: {}", output.display()))?;
    tracing::info!(input = %input.display(), plaintext = plaintext.len(), "decrypted");
    Ok(())
}

// ── `parcel decrypt-attachments` ──────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn cmd_decrypt_attachments(
    config: &ParcelConfig,
    key: &KeyArg,
    manifest_path: &Path,
    out_dir: &Path,
    stream_hash: Option<&str>,
    release_policy: Option<Policy>,
    gzip: bool,
    input: &Path,
) -> Result<()> {
    let key = parse_key(key)?;
    let manifest_bytes = std::fs::read(manifest_path)
        .with_context(|| format!("reading manifest: {}", manifest_path.display()))?;
    let manifest = AttachmentManifest::from_bytes(&manifest_bytes)?;
    let count = manifest.len();

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory: {}", out_dir.display()))?;

    let mut options = PipelineOptions::from_config(&config.pipeline);
    if let Some(policy) = release_policy {
        options.release_policy = policy.into();
    }
    options.gzip |= gzip;
    if let Some(hash) = stream_hash {
        options = options.with_stream_hash(hex::decode(hash).context("parsing --stream-hash")?);
    }

    let dir = out_dir.to_path_buf();
    let factory = VerifiedStreamFactory::new(move |message_id, entry: &AttachmentEntry| {
        let path = dir.join(format!("{message_id}-{}.bin", entry.index));
        let file = File::create(&path)?;
        Ok(Box::new(WriterSink::new(std::io::BufWriter::new(file))) as Box<dyn Sink>)
    });

    let mut pipeline = AttachmentPipeline::from_manifest(&key, manifest, factory, &options)?;
    let file = File::open(input).with_context(|| format!("opening input: {}", input.display()))?;
    let fed = pipeline
        .feed(BufReader::new(file), config.pipeline.io_buffer_size)
        .with_context(|| format!("decrypting {}", input.display()))?;
    pipeline
        .close()
        .with_context(|| format!("finishing {}", input.display()))?;

    println!("{count} attachment(s) written to {} ({fed} bytes read)", out_dir.display());
    Ok(())
}

// ── `parcel hash` ─────────────────────────────────────────────────────────────

fn cmd_hash(sha256: bool, input: &Path) -> Result<()> {
    let digest = if sha256 {
        let data =
            std::fs::read(input).with_context(|| format!("reading input: {}", input.display()))?;
        Hasher::sha256_hex(&data)
    } else {
        let file =
            File::open(input).with_context(|| format!("opening input: {}", input.display()))?;
        Hasher::sha512_hex_reader(BufReader::new(file))?
    };
    println!("{digest}  {}", input.display());
    Ok(())
}

// ── `parcel config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &ParcelConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
