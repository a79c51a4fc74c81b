use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod service;

use config::Config;
use dbus_interface::AttendanceInterface;
use service::Service;

const BUS_NAME: &str = "org.rollcall.Attendance1";
const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        threshold = config.match_threshold,
        "rollcalld starting"
    );

    let provider = Box::new(rollcall_embed::GradientEmbedder::new());
    let service = Service::new(config, provider)?;

    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceInterface::new(service))?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
