//! Monitor - connect to a running simulator and print everything it reports.
//!
//! Connects to a telemetry server, starts every periodic poll with
//! follow-nearest station tracking, prints each published event as JSON for
//! thirty seconds and shuts down.
//!
//! # Running
//!
//! ```sh
//! cargo run --example monitor -- [host]
//! ```
//!
//! The host defaults to `localhost`; the port is the protocol default
//! (15151).

use std::time::Duration;

use ridewire::{ClientBuilder, ClientEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "localhost".to_string());

    println!("Connecting to {host}...");
    let client = ClientBuilder::new(host)
        .station_state_follows_nearest(true)
        .connect()
        .await?;

    let version = client.version().await?;
    println!("Connected to simulator version {version}");

    let mut events = client.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                ClientEvent::Error(record) => eprintln!("[error] {}", record.message),
                event => match serde_json::to_string(event) {
                    Ok(json) => println!("{json}"),
                    Err(e) => eprintln!("[error] event not serializable: {e}"),
                },
            }
        }
    });

    client.start_nearest_station(Duration::from_millis(2000));
    client.start_telemetry(Duration::from_millis(500));
    client.start_station_state(Duration::from_millis(1000), 0, 0);

    for remaining in (1..=30).rev() {
        println!("Closing connection in {remaining} seconds.");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    client.shutdown().await;
    printer.abort();
    Ok(())
}
