use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use automount::commands;
use automount::config::{default_config_path, read_options};
use automount::daemon::{self, client::ControlClient};
use automount::logging::{self, LogFormat};
use clap::{Parser, Subcommand};
use daemonize::Daemonize;

#[derive(Parser)]
#[command(name = "automount")]
#[command(about = "Keep bookmarked network locations mounted and aliased", long_about = None)]
struct Cli {
    /// Config file, defaults to ~/.config/automount/config.yaml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the mount daemon")]
    Daemon {
        #[arg(long, help = "Detach from the terminal")]
        detach: bool,
        #[arg(long, help = "Also log to the systemd journal")]
        journald: bool,
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },
    #[command(about = "Show the daemon's status and its locations")]
    Status,
    #[command(about = "Ask the daemon for a check of all locations")]
    Check,
    #[command(about = "Mount a bookmarked location using ./automount mount smb://host/share")]
    Mount {
        #[arg(value_name = "URI")]
        uri: String,
    },
    #[command(about = "Unmount a location using ./automount unmount smb://host/share")]
    Unmount {
        #[arg(value_name = "URI")]
        uri: String,
    },
    #[command(about = "Mount all enabled locations")]
    MountAll,
    #[command(about = "Unmount all mounted locations")]
    UnmountAll,
    #[command(about = "List bookmarked locations and their settings")]
    List,
    #[command(about = "Enable automatic mounting of a location")]
    Enable {
        #[arg(value_name = "URI")]
        uri: String,
    },
    #[command(about = "Disable automatic mounting of a location")]
    Disable {
        #[arg(value_name = "URI")]
        uri: String,
    },
    #[command(about = "Set the alias name of a location, or reset it when NAME is omitted")]
    Alias {
        #[arg(value_name = "URI")]
        uri: String,
        #[arg(value_name = "NAME")]
        name: Option<String>,
    },
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    let config_path = std::path::absolute(cli.config.unwrap_or_else(default_config_path))
        .context("failed to resolve config path")?;

    match cli.command {
        Commands::Daemon {
            detach,
            journald,
            log_format,
        } => {
            if detach {
                detach_process()?;
            }
            logging::init(log_format, journald)?;
            daemon::start(config_path)
        }
        command => {
            logging::init(LogFormat::Text, false)?;
            run_command(command, config_path)
        }
    }
}

/// Fork into the background, logging to files under the state directory.
fn detach_process() -> Result<(), anyhow::Error> {
    let log_dir = dirs::state_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("automount");
    fs::create_dir_all(&log_dir).with_context(|| format!("failed to create {log_dir:?}"))?;
    let pid = dirs::runtime_dir()
        .unwrap_or_else(|| log_dir.clone())
        .join("automount.pid");
    let out = open_log(&log_dir.join("automount.out"))?;
    let err = open_log(&log_dir.join("automount.err"))?;
    Daemonize::new()
        .pid_file(pid)
        .stdout(out)
        .stderr(err)
        .start()
        .context("failed to detach")?;
    Ok(())
}

fn open_log(path: &Path) -> io::Result<File> {
    File::options().create(true).append(true).open(path)
}

#[tokio::main]
async fn run_command(command: Commands, config_path: PathBuf) -> Result<(), anyhow::Error> {
    match &command {
        Commands::List => return commands::list(&config_path).await,
        Commands::Enable { uri } => return commands::set_enabled(&config_path, uri, true).await,
        Commands::Disable { uri } => return commands::set_enabled(&config_path, uri, false).await,
        Commands::Alias { uri, name } => {
            return commands::set_alias(&config_path, uri, name.clone()).await;
        }
        _ => {}
    }

    let client = connect(&config_path).await?;
    match command {
        Commands::Status => {
            let reply = client.status().await?;
            println!("{}", reply.summary);
            let locations = client.locations().await?;
            commands::write_location_statuses(io::stdout(), &locations)?;
        }
        Commands::Check => println!("{}", client.check().await?),
        Commands::Mount { uri } => println!("{uri}: {}", client.mount(&uri).await?),
        Commands::Unmount { uri } => println!("{uri}: {}", client.unmount(&uri).await?),
        Commands::MountAll => println!("{}", client.mount_all().await?),
        Commands::UnmountAll => println!("{}", client.unmount_all().await?),
        Commands::Daemon { .. }
        | Commands::List
        | Commands::Enable { .. }
        | Commands::Disable { .. }
        | Commands::Alias { .. } => {}
    }
    Ok(())
}

async fn connect(config_path: &Path) -> Result<ControlClient, anyhow::Error> {
    let options = read_options(config_path).await?;
    let Some(addr) = options.control_addr else {
        bail!("the control API is disabled in {config_path:?}");
    };
    ControlClient::new(addr)
}
