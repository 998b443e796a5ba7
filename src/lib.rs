//! # ridewire
//!
//! Async client for the binary telemetry and control protocol of a coaster
//! ride simulator, spoken over a persistent TCP connection (default port
//! 15151).
//!
//! ## Architecture
//!
//! - **Protocol layer**: frame scanning and message (de)serialization over a
//!   marker-delimited, big-endian wire format
//! - **Correlation**: responses matched to in-flight requests by request id
//! - **Workers**: one writer task and one reader task per connection; the
//!   socket is never touched from anywhere else
//! - **Polling**: optional interval tasks for heartbeat, telemetry, station
//!   state and nearest-station tracking, publishing results as events
//!
//! ## Example
//!
//! ```ignore
//! use ridewire::ClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> ridewire::Result<()> {
//!     let client = ClientBuilder::new("localhost")
//!         .station_state_follows_nearest(true)
//!         .connect()
//!         .await?;
//!
//!     let mut events = client.subscribe();
//!     client.start_telemetry(std::time::Duration::from_millis(500));
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod data;
pub mod error;
pub mod events;
pub mod protocol;
pub mod registry;

mod pending;
mod writer;

pub use client::{ClientBuilder, TelemetryClient, DEFAULT_PORT};
pub use data::{CoasterAndStation, StationState, Telemetry, Version};
pub use error::{ClientError, Result};
pub use events::{ClientEvent, ErrorEvent, ErrorKind};
pub use registry::ClientRegistry;
