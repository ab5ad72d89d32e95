//! Probe CLI
//!
//! Diagnostic tool for talking to one player directly: resolves its
//! db-service port, opens a session, and fetches metadata for a track.
//!
//! Usage:
//!   prolink-probe <address> <track-id> [slot] [target-player] [posing-as]
//!
//! Slots: usb (default), sd, cd, collection

// Dev tool - allow unwrap for CLI simplicity
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::env;
use std::net::IpAddr;
use std::process;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prolink_metadata::config;
use prolink_metadata::dbserver::{Client, PortCache, PortResolution};
use prolink_metadata::fetch::fetch_with_client;
use prolink_metadata::status::{DeviceRecord, TrackSlot};

fn parse_slot(name: &str) -> Result<TrackSlot> {
    match name {
        "usb" => Ok(TrackSlot::Usb),
        "sd" => Ok(TrackSlot::SdCard),
        "cd" => Ok(TrackSlot::Cd),
        "collection" => Ok(TrackSlot::Collection),
        other => Err(anyhow!("unknown slot '{other}' (usb, sd, cd, collection)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prolink_metadata=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <address> <track-id> [slot] [target-player] [posing-as]", args[0]);
        eprintln!("version {} ({})", env!("PROLINK_VERSION"), env!("PROLINK_GIT_SHA"));
        process::exit(2);
    }
    let address: IpAddr = args[1].parse().context("bad player address")?;
    let track_id: u32 = args[2].parse().context("bad track id")?;
    let slot = parse_slot(args.get(3).map(String::as_str).unwrap_or("usb"))?;
    let target_player: u8 = args.get(4).map(|s| s.parse()).transpose()?.unwrap_or(1);
    let posing_as: u8 = args.get(5).map(|s| s.parse()).transpose()?.unwrap_or(2);

    let config = config::load_config()?;

    let ports = PortCache::with_query_port(
        config.connect_timeout(),
        config.read_timeout(),
        config.port_query_port,
    );
    let device = DeviceRecord {
        number: target_player,
        name: "probe target".into(),
        address,
    };
    let port = match ports.resolve(&device).await {
        PortResolution::Resolved(port) => port,
        PortResolution::Unknown => {
            return Err(anyhow!("player at {address} does not expose a db service"));
        }
    };
    println!("db service of player {target_player} listens on port {port}");

    let mut client = Client::connect(
        address,
        port,
        target_player,
        posing_as,
        config.connect_timeout(),
        config.read_timeout(),
    )
    .await?;
    let result = fetch_with_client(&mut client, slot, track_id).await;
    client.close().await;

    match result? {
        Some(metadata) => {
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        None => println!("no track with id {track_id} in {slot:?}"),
    }
    Ok(())
}
