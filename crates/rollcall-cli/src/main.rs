use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance check-in CLI")]
struct Cli {
    /// Talk to rollcalld on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a check-in: stage the token, start a visit and confirm once
    Checkin {
        /// Token from the classroom code
        #[arg(short, long)]
        token: String,
        /// User agent recorded with the attendance row
        #[arg(long, default_value = concat!("rollcall-cli/", env!("CARGO_PKG_VERSION")))]
        user_agent: String,
    },
    /// Show daemon status
    Status,
    /// Abandon the current visit and release the camera
    Cancel,
    /// Show recent attendance for the signed-in student
    History {
        /// Maximum rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// List local camera devices
    Devices,
    /// Capture one frame directly from a camera (bypasses the daemon)
    CameraTest {
        /// Device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the captured frame as an image (format from extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// `#[zbus::proxy]` generates `RollcallProxy` (async) from this trait.
#[zbus::proxy(
    interface = "org.freedesktop.Rollcall1",
    default_service = "org.freedesktop.Rollcall1",
    default_path = "/org/freedesktop/Rollcall1"
)]
trait Rollcall {
    async fn start_session(&self, token: &str, user_agent: &str) -> zbus::Result<String>;
    async fn confirm(&self) -> zbus::Result<String>;
    async fn cancel(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn history(&self, limit: u32) -> zbus::Result<String>;
}

async fn connect(session_bus: bool) -> Result<RollcallProxy<'static>> {
    let connection = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus (is rollcalld running?)")?;
    Ok(RollcallProxy::new(&connection).await?)
}

fn print_payload(payload: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Checkin { token, user_agent } => {
            let proxy = connect(cli.session).await?;

            let payload = proxy.start_session(&token, &user_agent).await?;
            let started: serde_json::Value = serde_json::from_str(&payload)?;
            print_payload(&payload)?;
            if started["state"] != "camera-ready" {
                anyhow::bail!(
                    "visit did not reach the camera: {}",
                    started["message"].as_str().unwrap_or("unknown failure")
                );
            }

            let payload = proxy.confirm().await?;
            let outcome: serde_json::Value = serde_json::from_str(&payload)?;
            print_payload(&payload)?;
            if outcome["state"] != "success" {
                anyhow::bail!(
                    "check-in did not succeed: {}",
                    outcome["message"].as_str().unwrap_or("unknown failure")
                );
            }
        }
        Commands::Status => {
            let proxy = connect(cli.session).await?;
            print_payload(&proxy.status().await?)?;
        }
        Commands::Cancel => {
            let proxy = connect(cli.session).await?;
            proxy.cancel().await?;
            println!("session cancelled");
        }
        Commands::History { limit } => {
            let proxy = connect(cli.session).await?;
            let payload = proxy.history(limit).await?;
            let rows: serde_json::Value = serde_json::from_str(&payload)?;
            match rows.as_array() {
                Some(list) if !list.is_empty() => {
                    for row in list {
                        println!(
                            "{}  {}  {}  {}/{}",
                            row["recorded_at"].as_str().unwrap_or("-"),
                            row["class_session"].as_str().unwrap_or("-"),
                            row["location"].as_str().unwrap_or("-"),
                            row["device"].as_str().unwrap_or("-"),
                            row["browser"].as_str().unwrap_or("-"),
                        );
                    }
                }
                _ => println!("no attendance records"),
            }
        }
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("no camera devices found");
            }
            for device in devices {
                println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
            }
        }
        Commands::CameraTest { device, output } => {
            let camera = rollcall_hw::Camera::open(&device)?;
            let frame = camera.capture_frame()?;
            println!(
                "captured {}x{} frame, brightness {:.1}{}",
                frame.width,
                frame.height,
                frame.avg_brightness(),
                if frame.is_dark { " (dark)" } else { "" }
            );
            if let Some(path) = output {
                let img =
                    image::GrayImage::from_raw(frame.width, frame.height, frame.data)
                        .context("frame buffer does not match its dimensions")?;
                img.save(&path)
                    .with_context(|| format!("saving {}", path.display()))?;
                println!("saved {}", path.display());
            }
        }
    }

    Ok(())
}
