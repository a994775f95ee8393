//! Sensor monitor example
//!
//! Reconnects to the last sensor if one is remembered, otherwise scans and
//! connects to the first sensor found, then prints every update.
//!
//! Run with: cargo run --example monitor [--forget] [path/to/last_device.json]
//!
//! `--forget` drops the remembered sensor and starts with a fresh scan.

use rtemp_ble::{
    JsonFileStore, LogSnapshot, Result, SensorEvent, SensorState, Session, SessionConfig,
};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rtemp_ble=info".into()),
        )
        .init();

    let mut forget = false;
    let mut path = None;
    for arg in std::env::args().skip(1) {
        if arg == "--forget" {
            forget = true;
        } else {
            path = Some(PathBuf::from(arg));
        }
    }
    let path = path
        .unwrap_or_else(|| std::env::temp_dir().join("rtemp-ble").join("last_device.json"));

    println!("RTemp Monitor");
    println!("=============\n");
    println!("Last device file: {}\n", path.display());

    let session = Session::start(SessionConfig::default(), Box::new(JsonFileStore::new(path))).await?;
    let mut events = session.subscribe();

    if forget {
        session.forget_last_device().await?;
        println!("Forgot the last sensor.");
    }

    if session.reconnect_last_device().await? {
        println!("Reconnecting to the last sensor...");
    } else if session.begin_scan().await? {
        println!("Scanning for sensors...");
    } else {
        println!("Bluetooth is not available ({})", session.state());
    }

    println!("Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(event) => handle_event(&session, event).await?,
                    Err(RecvError::Lagged(n)) => println!("(missed {} events)", n),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    session.shutdown().await?;
    Ok(())
}

async fn handle_event(session: &Session, event: SensorEvent) -> Result<()> {
    match event {
        SensorEvent::DeviceDiscovered(device) => {
            println!("Found sensor: {}", device.name());
            if session.state() == SensorState::Scanning {
                println!("Connecting to {}...", device.name());
                if let Err(e) = session.connect(device).await {
                    println!("Connect skipped: {}", e);
                }
            }
        }
        SensorEvent::ScanComplete { .. } => {
            if session.discovered_devices().await?.is_empty() {
                println!("No sensors found.");
            }
        }
        SensorEvent::StateChanged(state) => println!("[{}]", state),
        SensorEvent::Ready { device } => println!("Connected to {}", device.name()),
        SensorEvent::TemperatureUpdated(celsius) => println!("Temperature: {:6.1}°C", celsius),
        SensorEvent::HumidityUpdated(percent) => println!("Humidity:    {:4}%", percent),
        SensorEvent::BatteryUpdated(percent) => println!("Battery:     {:4}%", percent),
        SensorEvent::TemperatureLogUpdated(log) => print_log("Temperature log", &log),
        SensorEvent::HumidityLogUpdated(log) => print_log("Humidity log", &log),
        SensorEvent::ConnectFailed { reason } | SensorEvent::DiscoveryFailed { reason } => {
            println!("Connection failed: {}", reason);
        }
    }
    Ok(())
}

fn print_log(title: &str, log: &LogSnapshot) {
    println!("\n{} ({} samples)", title, log.len());
    println!("{}", "-".repeat(title.len()));

    if let Some((min, max)) = log.range() {
        println!("  Range:  {:.1} .. {:.1}", min, max);
    }
    if let Some(latest) = log.latest() {
        println!("  Latest: {:.1}", latest);
    }
    println!();
}
