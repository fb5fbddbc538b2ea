use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use mystorage::diff::run_scenario;
use mystorage::{
    CleanupPolicy, Config, ConfigError, DiffHarness, FileInfo, Provider, WebdavProvider,
};

#[derive(Parser, Debug)]
#[command(name = "mystorage")]
#[command(about = "One file API over local directories and WebDAV servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $MYSTORAGE_CONFIG or <config dir>/mystorage/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend to run the command against
    #[arg(short, long, global = true, value_enum, default_value_t = Backend::Local)]
    backend: Backend,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Local,
    Webdav,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print whether a path exists
    Exists { path: String },

    /// Print the resource type of a path
    Type { path: String },

    /// Print the metadata of a path
    Info { path: String },

    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,

        /// Show size and modification time
        #[arg(short, long)]
        long: bool,
    },

    /// Read a file to stdout or to a local file
    Get {
        path: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a local file to a path, overwriting it
    Put { path: String, file: PathBuf },

    /// Write a local file to a path that must not exist yet
    Create { path: String, file: PathBuf },

    /// Create an empty file
    Touch { path: String },

    /// Create a directory
    Mkdir { path: String },

    /// Delete a file or a directory tree
    Rm { path: String },

    /// Move a resource
    Mv { src: String, dest: String },

    /// Copy a resource
    Cp { src: String, dest: String },

    /// Rename a resource inside its directory
    Rename { src: String, name: String },

    /// Mirror a remote resource into a local path
    Download { remote: String, local: PathBuf },

    /// Mirror a local path into a remote resource
    Upload { local: PathBuf, remote: String },

    /// Check WebDAV credentials
    Login,

    /// Print the free space reported by the WebDAV server
    Free,

    /// Run the conformance scenario over every configured backend
    Check {
        /// Scratch directory created on every backend
        #[arg(short, long, default_value = "mystorage-check")]
        root: String,

        /// Keep the scratch directory when done
        #[arg(short, long)]
        keep: bool,
    },
}

fn open_provider(config: &Config, backend: Backend) -> Result<Box<dyn Provider>> {
    let provider: Box<dyn Provider> = match backend {
        Backend::Local => {
            let local = config.local.as_ref().ok_or(ConfigError::Missing("local"))?;
            Box::new(local.provider()?)
        }
        Backend::Webdav => Box::new(open_webdav(config)?),
    };
    info!("Using {} backend", provider.name());
    Ok(provider)
}

fn open_webdav(config: &Config) -> Result<WebdavProvider> {
    let webdav = config.webdav.as_ref().ok_or(ConfigError::Missing("webdav"))?;
    info!("Connecting to {}", webdav.url());
    Ok(webdav.provider()?)
}

fn print_long(entry: &FileInfo) {
    let kind = if entry.is_dir { 'd' } else { '-' };
    println!(
        "{} {:>10} {} {}",
        kind,
        entry.size,
        entry.modified.format("%Y-%m-%d %H:%M:%S"),
        entry.name
    );
}

fn print_info(entry: &FileInfo) {
    println!("path: {}", entry.path);
    println!("name: {}", entry.name);
    println!("type: {:?}", entry.resource_type());
    println!("size: {}", entry.size);
    println!("created: {}", entry.created.to_rfc3339());
    println!("modified: {}", entry.modified.to_rfc3339());
    if !entry.etag.is_empty() {
        println!("etag: {}", entry.etag);
    }
    if !entry.content_type.is_empty() {
        println!("content-type: {}", entry.content_type);
    }
}

fn get_command(provider: &dyn Provider, path: &str, output: Option<&Path>) -> Result<()> {
    let written = match output {
        Some(file) => {
            let mut out = File::create(file)
                .with_context(|| format!("Failed to create {}", file.display()))?;
            provider.read(path, &mut out)?
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let n = provider.read(path, &mut out)?;
            out.flush()?;
            n
        }
    };
    info!("Read {} bytes from {}", written, path);
    Ok(())
}

fn write_command(provider: &dyn Provider, path: &str, file: &Path, create: bool) -> Result<()> {
    let mut input =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let entry = if create {
        provider.create(path, &mut input)?
    } else {
        provider.put(path, &mut input)?
    };
    println!("{} ({} bytes)", entry.path, entry.size);
    Ok(())
}

fn check_command(config: &Config, root: String, keep: bool) -> Result<()> {
    let providers = config.providers()?;
    let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
    let policy = if keep {
        CleanupPolicy::EnterOnly
    } else {
        CleanupPolicy::EnterAndExit
    };

    let harness = DiffHarness::new(root, providers)
        .context("The check command needs two configured backends")?
        .policy(policy);

    println!("Checking backends: {}", names.join(", "));
    println!("  Root: {}", harness.root());
    println!();

    let scope = harness.enter();
    let checks = run_scenario(&scope).context("Backends diverged")?;

    println!("All {} checks passed", checks);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::discover(cli.config.as_deref()).context("Failed to load config")?;
    let backend = cli.backend;
    let open = || open_provider(&config, backend);

    match cli.command {
        Commands::Exists { path } => println!("{}", open()?.exists(&path)?),
        Commands::Type { path } => println!("{:?}", open()?.resource_type(&path)?),
        Commands::Info { path } => print_info(&open()?.info(&path)?),
        Commands::Ls { path, long: true } => {
            for entry in open()?.ll(&path)? {
                print_long(&entry);
            }
        }
        Commands::Ls { path, long: false } => {
            for name in open()?.ls(&path)? {
                println!("{}", name);
            }
        }
        Commands::Get { path, output } => get_command(open()?.as_ref(), &path, output.as_deref())?,
        Commands::Put { path, file } => write_command(open()?.as_ref(), &path, &file, false)?,
        Commands::Create { path, file } => write_command(open()?.as_ref(), &path, &file, true)?,
        Commands::Touch { path } => {
            open()?.touch(&path)?;
        }
        Commands::Mkdir { path } => {
            open()?.mkdir(&path)?;
        }
        Commands::Rm { path } => open()?.delete(&path)?,
        Commands::Mv { src, dest } => open()?.move_to(&src, &dest)?,
        Commands::Cp { src, dest } => open()?.copy(&src, &dest)?,
        Commands::Rename { src, name } => open()?.rename(&src, &name)?,
        Commands::Download { remote, local } => {
            open()?.download(&remote, &local)?;
            println!("Downloaded {} to {}", remote, local.display());
        }
        Commands::Upload { local, remote } => {
            open()?.upload(&local, &remote)?;
            println!("Uploaded {} to {}", local.display(), remote);
        }
        Commands::Login => println!("{}", open_webdav(&config)?.login()?),
        Commands::Free => match open_webdav(&config)?.free()? {
            Some(bytes) => println!("{}", bytes),
            None => println!("unknown"),
        },
        Commands::Check { root, keep } => check_command(&config, root, keep)?,
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.verbose { "info" } else { "warn" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .target(env_logger::Target::Stderr)
        .init();

    run(cli)
}
