//! pifs - the π filesystem
//!
//! Mounts a directory whose files are stored as offsets into π, and offers a
//! few offline tools around the codec.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pifs_config::{ConfigFile, MountConfig};
use pifs_core::{bbp, PiCodec, PiEncoder};
use pifs_fs::Passthrough;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "pifs=info";

#[derive(Parser)]
#[command(name = "pifs")]
#[command(about = "A filesystem that stores every byte as its position in π")]
#[command(version)]
struct Cli {
    /// Log filter, e.g. `debug` or `pifs_fs=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a pifs filesystem in the foreground
    Mount {
        /// Where to mount
        mountpoint: PathBuf,

        /// Mount options, e.g. `-o rootdir=/srv/pi,allow_other`
        #[arg(short = 'o', value_name = "OPTIONS")]
        options: Vec<String>,

        /// YAML file with rootdir, options and log_level
        #[arg(long)]
        config: Option<PathBuf>,

        /// Rebuild the encoder table from π instead of using the built-in one
        #[arg(long)]
        derive_table: bool,
    },

    /// Print the byte → π offset table
    Table {
        /// Derive the table with BBP and compare it to the built-in one
        #[arg(long)]
        derive: bool,
    },

    /// Print hexadecimal digits of π after the point
    Digits {
        /// Zero-based index of the first digit
        start: u16,

        /// How many digits to print
        count: u16,
    },

    /// Convert a plain file into the backing format
    Encode { input: PathBuf, output: PathBuf },

    /// Convert a backing file back into plain bytes
    Decode { input: PathBuf, output: PathBuf },

    /// Check the built-in table against π
    Verify,
}

fn main() -> Result<()> {
    let Cli { log_level, command } = Cli::parse();

    // mount reads its log level from the config file as well
    if !matches!(command, Commands::Mount { .. }) {
        init_tracing(log_level.as_deref())?;
    }

    match command {
        Commands::Mount {
            mountpoint,
            options,
            config,
            derive_table,
        } => run_mount(mountpoint, options, config, derive_table, log_level),
        Commands::Table { derive } => print_table(derive),
        Commands::Digits { start, count } => print_digits(start, count),
        Commands::Encode { input, output } => encode_file(input, output),
        Commands::Decode { input, output } => decode_file(input, output),
        Commands::Verify => verify(),
    }
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log filter '{}'", level))?,
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_codec(derive: bool) -> Result<PiCodec> {
    let codec = if derive {
        info!("deriving encoder table from π");
        PiCodec::derive()
    } else {
        PiCodec::precomputed()
    };
    codec.context("encoder table failed its self-test")
}

fn run_mount(
    mountpoint: PathBuf,
    options: Vec<String>,
    config_path: Option<PathBuf>,
    derive_table: bool,
    log_level: Option<String>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => {
            let file = ConfigFile::load(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            MountConfig::from_file(file)?
        }
        None => MountConfig::default(),
    };
    for list in &options {
        config.apply_option_list(list)?;
    }

    init_tracing(log_level.as_deref().or(config.log_level.as_deref()))?;

    let rootdir = config.validated_rootdir()?;
    MountConfig::validate_mountpoint(&mountpoint)?;

    let codec = Arc::new(build_codec(derive_table)?);
    let fs = Passthrough::new(rootdir, codec);

    pifs_fs::mount(fs, &mountpoint, &config.options)
        .with_context(|| format!("failed to mount at {}", mountpoint.display()))?;

    info!(mountpoint = %mountpoint.display(), "unmounted");
    Ok(())
}

fn print_table(derive: bool) -> Result<()> {
    let builtin = PiEncoder::precomputed();
    let encoder = if derive {
        let derived = PiEncoder::derive()?;
        if derived.table() != builtin.table() {
            bail!("derived table differs from the built-in one");
        }
        info!("derived table matches the built-in one");
        derived
    } else {
        builtin
    };

    for (row, chunk) in encoder.table().chunks(16).enumerate() {
        let line: Vec<String> = chunk.iter().map(|offset| format!("{:5}", offset)).collect();
        println!("0x{:02X}:{}", row * 16, line.join(""));
    }
    Ok(())
}

fn print_digits(start: u16, count: u16) -> Result<()> {
    let digits = bbp::pi_hex_digits(start, count);
    if digits.len() < count as usize {
        warn!(
            requested = count,
            printed = digits.len(),
            "digit positions end at {}",
            u16::MAX
        );
    }
    let text: String = digits.iter().map(|d| format!("{:X}", d)).collect();
    println!("{}", text);
    Ok(())
}

fn encode_file(input: PathBuf, output: PathBuf) -> Result<()> {
    let plain = fs::read(&input).with_context(|| format!("failed to read {}", input.display()))?;
    let codec = build_codec(false)?;
    let raw = codec.encode(&plain);
    fs::write(&output, &raw).with_context(|| format!("failed to write {}", output.display()))?;
    info!(bytes = plain.len(), backing = raw.len(), "encoded");
    Ok(())
}

fn decode_file(input: PathBuf, output: PathBuf) -> Result<()> {
    let raw = fs::read(&input).with_context(|| format!("failed to read {}", input.display()))?;
    if raw.len() % 2 == 1 {
        warn!(path = %input.display(), "ignoring trailing half index");
    }
    let codec = build_codec(false)?;
    let plain = codec
        .decode(&raw)
        .with_context(|| format!("{} is not a valid backing file", input.display()))?;
    fs::write(&output, &plain).with_context(|| format!("failed to write {}", output.display()))?;
    info!(backing = raw.len(), bytes = plain.len(), "decoded");
    Ok(())
}

fn verify() -> Result<()> {
    // round trip, full coverage and distinct offsets
    let codec = build_codec(false)?;
    println!("self-test: ok");

    codec
        .encoder()
        .verify_windows()
        .context("built-in table disagrees with π")?;
    println!("windows: ok");

    let derived = PiEncoder::derive()?;
    if derived.table() != codec.encoder().table() {
        bail!("derived table differs from the built-in one");
    }
    println!("derivation: ok");
    Ok(())
}
