//! rootfs-forge: build a reproducible image layer from an apk manifest.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rootfs_forge::build::{parse_source_date_epoch, source_date_epoch_from_env, SOURCE_DATE_EPOCH_ENV};
use rootfs_forge::{ApkCli, Architecture, BuildContext, BuildOptions, ImageConfiguration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the image filesystem and write it as a gzip'd tar layer
    Build {
        /// Image manifest (YAML)
        config: PathBuf,

        /// Where to write the layer
        output: PathBuf,

        /// Build in this directory instead of a temporary one
        #[arg(long, value_name = "DIR")]
        work_dir: Option<PathBuf>,

        /// Also write a CycloneDX SBOM here
        #[arg(long, value_name = "FILE")]
        sbom_path: Option<PathBuf>,

        /// Target architecture (apk or OCI naming); defaults to the host
        #[arg(long, value_name = "ARCH")]
        arch: Option<String>,

        /// Run in-image commands under proot
        #[arg(long)]
        use_proot: bool,

        /// Timestamp for every archive entry, in seconds since the epoch
        #[arg(long, value_name = "SECONDS", env = SOURCE_DATE_EPOCH_ENV)]
        source_date_epoch: Option<String>,
    },

    /// Load, normalize and validate a manifest, then print its summary
    ShowConfig {
        /// Image manifest (YAML)
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            config,
            output,
            work_dir,
            sbom_path,
            arch,
            use_proot,
            source_date_epoch,
        } => {
            let epoch = match source_date_epoch {
                Some(value) => parse_source_date_epoch(&value)?,
                None => source_date_epoch_from_env()?,
            };
            build(BuildArgs {
                config,
                output,
                work_dir,
                sbom_path,
                arch,
                use_proot,
                epoch,
            })
        }
        Commands::ShowConfig { config } => show_config(config),
    }
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

struct BuildArgs {
    config: PathBuf,
    output: PathBuf,
    work_dir: Option<PathBuf>,
    sbom_path: Option<PathBuf>,
    arch: Option<String>,
    use_proot: bool,
    epoch: time::OffsetDateTime,
}

fn build(args: BuildArgs) -> Result<()> {
    let config = ImageConfiguration::load(&args.config)?;

    let arch = match args.arch.as_deref() {
        Some(raw) => Architecture::parse(raw),
        None => Architecture::host().context("unknown host architecture; pass --arch")?,
    };
    if !config.archs.is_empty() && !config.architectures().contains(&arch) {
        bail!(
            "{} is not one of the architectures configured in {}",
            arch,
            args.config.display()
        );
    }

    // A temporary working directory lives until the layer is written.
    let temp_dir;
    let work_dir = match args.work_dir {
        Some(dir) => dir,
        None => {
            temp_dir = tempfile::Builder::new()
                .prefix("rootfs-forge-")
                .tempdir()
                .context("Failed to create temporary working directory")?;
            temp_dir.path().join("rootfs")
        }
    };

    let mut options = BuildOptions::new(work_dir);
    options.sbom_path = args.sbom_path;
    options.source_date_epoch = args.epoch;
    options.arch = arch;
    options.use_proot = args.use_proot;

    let mut ctx = BuildContext::new(config, options, Box::new(ApkCli::new()?));
    ctx.build_image()?;

    let layer = ctx.write_layer(&args.output)?;
    println!("{}", layer.path.display());
    println!("  digest: {}", layer.digest);
    println!("  size:   {} bytes", layer.size);
    Ok(())
}

fn show_config(path: PathBuf) -> Result<()> {
    let mut config = ImageConfiguration::load(&path)?;
    config.normalize();
    config.validate()?;

    for line in config.summary_lines() {
        println!("{}", line);
    }
    Ok(())
}
