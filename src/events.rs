//! Events published to client subscribers.
//!
//! Every completed operation and every failure is broadcast as a
//! [`ClientEvent`]; subscribers receive them through the channel returned by
//! [`TelemetryClient::subscribe`](crate::TelemetryClient::subscribe).
//! Delivery ordering across multiple subscribers is not guaranteed.

use serde::Serialize;

use crate::data::{CoasterAndStation, StationState, Telemetry, Version};

/// Where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Error raised by the client itself (socket failure, timeout, bad
    /// response).
    Client,
    /// Server replied with an Error message.
    Server,
}

/// One recorded error, also retrievable via
/// [`TelemetryClient::last_error`](crate::TelemetryClient::last_error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    /// Request the error belongs to, when one exists.
    pub request_id: Option<u32>,
    pub kind: ErrorKind,
    pub message: String,
}

/// Event published on the client's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ClientEvent {
    /// An operation failed; see the carried record.
    Error(ErrorEvent),
    /// A telemetry snapshot arrived.
    TelemetryReceived {
        request_id: u32,
        telemetry: Telemetry,
    },
    /// A station state arrived for the polled or requested pair.
    StationStateReceived {
        request_id: u32,
        coaster: i32,
        station: i32,
        state: StationState,
    },
    /// An explicit current-coaster/nearest-station query completed.
    CurrentCoasterAndStationReceived {
        request_id: u32,
        pair: CoasterAndStation,
    },
    /// The nearest-station poll detected a different coaster/station pair.
    /// Carries the coaster name and a fresh telemetry snapshot when those
    /// follow-up requests succeed.
    CurrentCoasterOrStationChanged {
        pair: CoasterAndStation,
        coaster_name: Option<String>,
        telemetry: Option<Telemetry>,
    },
    /// A command was acknowledged with an Ok message.
    OkReceived { request_id: u32 },
    /// The server version arrived.
    VersionReceived { request_id: u32, version: Version },
    /// The coaster count arrived.
    CoasterCountReceived { request_id: u32, count: i32 },
    /// A coaster name arrived.
    CoasterNameReceived {
        request_id: u32,
        index: i32,
        name: String,
    },
}
