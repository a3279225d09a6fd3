use clap::{Parser, Subcommand};
use std::path::PathBuf;

use guardian_sync::app::App;
use guardian_sync::config::{load_config, AppConfig};
use guardian_sync::models::Role;
use guardian_sync::parent::{media_view, MediaSort};
use guardian_sync::pairing::derive_pairing_code;
use guardian_sync::serve::serve_relay;
use guardian_sync::sync::SyncOutcome;
use guardian_sync::tracking::{StartOutcome, TaskRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about = "Pair parent and child devices and sync child telemetry")]
struct Args {
    /// Path to config file (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend relay URL (overrides config file)
    #[arg(long, global = true)]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Device(DeviceCommand),
    /// Run the in-memory reference relay
    Serve {
        /// Port to listen on (default: [relay] port from config, or 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

/// Commands that act on this device's identity and data
#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// Register this device as a parent or as a child of a parent
    Setup {
        #[arg(value_enum)]
        role: Role,
        /// Human-readable device name
        #[arg(short, long)]
        name: String,
        /// Parent device id (required for child)
        #[arg(short, long)]
        parent: Option<String>,
    },
    /// Show this device's id, role and pairing code
    Identity,
    /// Change this device's name
    Rename { name: String },
    /// Run one sync pass now
    Sync,
    /// Start background tracking and keep it running until Ctrl-C
    Track,
    /// List the children paired with a parent (default: this device)
    Children { parent: Option<String> },
    /// Show a child's location, contacts and media
    Child {
        child_id: String,
        /// Number of history samples to show
        #[arg(long)]
        history: Option<usize>,
        /// Only list geotagged media
        #[arg(long)]
        geotagged: bool,
    },
    /// Stop tracking and forget this device's identity
    Logout,
}

fn resolve_config(args: &Args) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match (&args.config, &args.backend_url) {
        (Some(path), _) => load_config(path)?,
        (None, Some(url)) => AppConfig::with_backend(url),
        (None, None) => return Err("either --config or --backend-url is required".into()),
    };
    if let Some(url) = &args.backend_url {
        config.backend_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    // One thread per context: foreground commands here, background firings as spawned tasks
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match &args.command {
        Command::Serve { port } => {
            let port = match port {
                Some(port) => *port,
                None => match &args.config {
                    Some(path) => load_config(path)?.relay.port,
                    None => 3000,
                },
            };
            rt.block_on(serve_relay(port))
        }
        Command::Device(command) => {
            let config = resolve_config(&args)?;
            let registry = TaskRegistry::init_global();
            rt.block_on(run_command(command, &config, registry))
        }
    }
}

async fn run_command(
    command: &DeviceCommand,
    config: &AppConfig,
    registry: std::sync::Arc<TaskRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::from_config(config, registry)?;

    match command {
        DeviceCommand::Setup { role, name, parent } => {
            let device = app.identity.setup(*role, name, parent.as_deref()).await?;
            println!("Registered {} device '{}'", device.role, device.device_name);
            println!("Device id:    {}", device.device_id);
            if let Some(parent) = &device.parent_device_id {
                println!("Paired with:  {}", parent);
            } else {
                println!("Pairing code: {}", derive_pairing_code(&device.device_id));
                println!("Share the device id with the child device to pair it");
            }
        }
        DeviceCommand::Identity => {
            let device_id = app.identity.ensure_device_id()?;
            println!("Device id:    {}", device_id);
            println!("Pairing code: {}", derive_pairing_code(&device_id));
            match app.identity.device()? {
                Some(device) => {
                    println!("Name:         {}", device.device_name);
                    println!("Role:         {}", device.role);
                    if let Some(parent) = device.parent_device_id {
                        println!("Parent:       {}", parent);
                    }
                }
                None => println!("Role:         (not set up)"),
            }
        }
        DeviceCommand::Rename { name } => {
            let device = app.identity.rename(name).await?;
            println!("Renamed device to '{}'", device.device_name);
        }
        DeviceCommand::Sync => match app.pipeline.sync_stored_device().await? {
            Some(report) => {
                for (domain, outcome) in report.domains() {
                    println!("  {:<9} {}", domain.as_str(), outcome);
                }
                if let SyncOutcome::PartialFailure(_) = report.outcome() {
                    report.into_result()?;
                }
            }
            None => println!("Device is not set up; nothing to sync"),
        },
        DeviceCommand::Track => {
            if app.identity.current_role()? != Some(Role::Child) {
                return Err("only a child device shares its location".into());
            }
            match app.tracking.start().await {
                StartOutcome::Started => {}
                StartOutcome::Denied(capability) => {
                    return Err(format!("{} permission is required to track", capability).into())
                }
                StartOutcome::Failed(reason) => {
                    return Err(format!("Could not start tracking: {}", reason).into())
                }
            }
            println!("Tracking status: {:?}", app.tracking.status().await);
            println!("Press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            app.tracking.stop().await;
            println!("Tracking status: {:?}", app.tracking.status().await);
        }
        DeviceCommand::Children { parent } => {
            let parent_id = match parent {
                Some(id) => id.clone(),
                None => app
                    .identity
                    .device()?
                    .filter(|d| d.role == Role::Parent)
                    .map(|d| d.device_id)
                    .ok_or("this device is not set up as a parent; pass a parent id")?,
            };
            let children = app.parent.list_children(&parent_id).await?;
            if children.is_empty() {
                println!("No child devices paired yet");
            }
            for child in children {
                let last_active = child
                    .last_active
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {}  (last active: {})",
                    child.device_id, child.device_name, last_active
                );
            }
        }
        DeviceCommand::Child {
            child_id,
            history,
            geotagged,
        } => {
            let history_limit = history.unwrap_or(config.sync.history_limit);
            match app.parent.latest_location(child_id).await? {
                Some(sample) => println!(
                    "Latest location: {:.6}, {:.6} at {}",
                    sample.latitude,
                    sample.longitude,
                    sample.captured_at.to_rfc3339()
                ),
                None => println!("Latest location: none synced yet"),
            }
            let samples = app.parent.location_history(child_id, history_limit).await?;
            println!("History ({} sample(s)):", samples.len());
            for sample in samples {
                println!(
                    "  {}  {:.6}, {:.6}",
                    sample.captured_at.to_rfc3339(),
                    sample.latitude,
                    sample.longitude
                );
            }

            let contacts = app.parent.contacts(child_id).await?;
            println!("Contacts ({}):", contacts.len());
            for contact in contacts {
                println!(
                    "  {}  {}  {}",
                    contact.name,
                    contact.phone_numbers.join(", "),
                    contact.emails.join(", ")
                );
            }

            let sort = if *geotagged {
                MediaSort::Geotagged
            } else {
                MediaSort::Recent
            };
            let media = media_view(&app.parent.media(child_id).await?, sort);
            println!("Media ({}):", media.len());
            for item in media {
                let place = item
                    .location
                    .map(|p| format!("  @ {:.5}, {:.5}", p.latitude, p.longitude))
                    .unwrap_or_default();
                println!("  {:?}  {}{}", item.media_type, item.filename, place);
            }
        }
        DeviceCommand::Logout => {
            app.tracking.stop().await;
            app.identity.reset()?;
            println!("Logged out");
        }
    }
    Ok(())
}
