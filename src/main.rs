use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::{config, AccessControl, CommandVerifier, Decision, Registration};
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "facegate")]
#[command(
    version,
    about = "Grant or deny access by matching a photo against registered faces"
)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a photo for access. On an empty store the submitter becomes Admin
    Access {
        /// Photo to check (jpg, jpeg or png)
        image: PathBuf,
        /// Admin name, required only when registering the first Admin
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Register a new user (Admin only)
    Register {
        /// Name of the registering Admin
        #[arg(long)]
        admin: String,
        /// Current photo of the registering Admin
        #[arg(long)]
        admin_image: PathBuf,
        /// Name of the new user
        #[arg(short, long)]
        name: String,
        /// Reference photo of the new user
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List registered users
    List,
    /// Open config file in editor
    Config,
}

fn main() -> Result<ExitCode> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Config => open_config(config_path).map(|()| ExitCode::SUCCESS),
        command => run(command, config_path),
    };

    match result {
        Err(err) => match err.downcast_ref::<facegate::Error>() {
            Some(facegate::Error::Validation(v)) => {
                warn!("{} ({})", v.hint(), v);
                Ok(ExitCode::from(2))
            }
            _ => Err(err),
        },
        ok => ok,
    }
}

fn run(command: Commands, config_path: Option<&Path>) -> Result<ExitCode> {
    let cfg = config::load_config(config_path)?;
    let control = AccessControl::from_config(&cfg, CommandVerifier::new(cfg.verifier.clone()));

    match command {
        Commands::Access { image, name } => access(&control, &image, name.as_deref()),
        Commands::Register {
            admin,
            admin_image,
            name,
            image,
        } => register(&control, &admin, &admin_image, &name, &image),
        Commands::List => list(&control),
        Commands::Config => open_config(config_path).map(|()| ExitCode::SUCCESS),
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

fn access(
    control: &AccessControl<CommandVerifier>,
    image: &Path,
    name: Option<&str>,
) -> Result<ExitCode> {
    let bytes = read_image(image)?;
    let outcome = control.submit(&bytes, name)?;

    for skipped in &outcome.skipped {
        warn!("Could not compare against {}: {}", skipped.name, skipped.reason);
    }

    match outcome.decision {
        Decision::Bootstrapped { name } => {
            info!("No users found. You are registered as Admin.");
            info!("✓ Admin Registered Successfully: {}", name);
            Ok(ExitCode::SUCCESS)
        }
        Decision::Granted { name } => {
            info!("✓ Access Granted. Welcome {}", name);
            Ok(ExitCode::SUCCESS)
        }
        Decision::Denied => {
            error!("Access Denied! Ask admin or registered members to give you access.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn register(
    control: &AccessControl<CommandVerifier>,
    admin: &str,
    admin_image: &Path,
    name: &str,
    image: &Path,
) -> Result<ExitCode> {
    let admin_image = read_image(admin_image)?;
    let image = read_image(image)?;

    let identity = control.register(&Registration {
        admin,
        admin_image: &admin_image,
        name,
        image: &image,
    })?;

    info!("✓ User Registered Successfully: {}", identity.name);
    Ok(ExitCode::SUCCESS)
}

fn list(control: &AccessControl<CommandVerifier>) -> Result<ExitCode> {
    let members = control.members().context("Failed to load registered users")?;

    if members.is_empty() {
        warn!("No users registered.");
        return Ok(ExitCode::SUCCESS);
    }

    info!("Registered Users: {}", members.len());
    for member in &members {
        println!(
            "{:<24} {:<6} {}",
            member.name,
            member.role.to_string(),
            member.image_path.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(&config::Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
