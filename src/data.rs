//! Domain snapshots decoded from response payloads.
//!
//! All types here are immutable value objects built from a fixed big-endian
//! byte layout; they have no lifecycle beyond the decode call that produced
//! them. They derive `Serialize` so the notification layer can fan them out
//! as JSON without re-mapping.

use serde::Serialize;

use crate::error::{ClientError, Result};
use crate::protocol::{read_f32, read_i32, read_u32};

/// Exact length of a Telemetry message payload.
pub const TELEMETRY_PAYLOAD_LEN: usize = 76;

/// One snapshot of the simulator's common telemetry data.
///
/// 76-byte fixed layout, all fields big-endian: eight i32 (state, frame,
/// view mode, current coaster, coaster style, train, car, seat) followed by
/// eleven f32 (speed, position, rotation quaternion, g-force).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Telemetry {
    /// State bit flags, see [`Telemetry::STATE_IN_PLAY_MODE`].
    pub state: i32,
    /// Rendered frame number.
    pub frame: i32,
    /// Active view mode.
    pub view_mode: i32,
    /// Index of the current coaster.
    pub current_coaster: i32,
    /// Style identifier of the current coaster, raw.
    pub coaster_style: i32,
    /// Index of the current train.
    pub current_train: i32,
    /// Index of the current car.
    pub current_car: i32,
    /// Index of the current seat.
    pub current_seat: i32,
    /// Vehicle speed in m/s.
    pub speed: f32,
    pub position_x: f32,
    pub position_y: f32,
    pub position_z: f32,
    pub rotation_x: f32,
    pub rotation_y: f32,
    pub rotation_z: f32,
    pub rotation_w: f32,
    pub g_force_x: f32,
    pub g_force_y: f32,
    pub g_force_z: f32,
}

impl Telemetry {
    /// Simulator is in play mode.
    pub const STATE_IN_PLAY_MODE: i32 = 1;
    /// Vehicle brakes are engaged.
    pub const STATE_BRAKING: i32 = 2;

    /// Decode from a Telemetry message payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != TELEMETRY_PAYLOAD_LEN {
            return Err(ClientError::Protocol(format!(
                "telemetry payload is {} bytes, expected {TELEMETRY_PAYLOAD_LEN}",
                payload.len()
            )));
        }
        Ok(Self {
            state: read_i32(payload, 0),
            frame: read_i32(payload, 4),
            view_mode: read_i32(payload, 8),
            current_coaster: read_i32(payload, 12),
            coaster_style: read_i32(payload, 16),
            current_train: read_i32(payload, 20),
            current_car: read_i32(payload, 24),
            current_seat: read_i32(payload, 28),
            speed: read_f32(payload, 32),
            position_x: read_f32(payload, 36),
            position_y: read_f32(payload, 40),
            position_z: read_f32(payload, 44),
            rotation_x: read_f32(payload, 48),
            rotation_y: read_f32(payload, 52),
            rotation_z: read_f32(payload, 56),
            rotation_w: read_f32(payload, 60),
            g_force_x: read_f32(payload, 64),
            g_force_y: read_f32(payload, 68),
            g_force_z: read_f32(payload, 72),
        })
    }

    pub fn is_in_play_mode(&self) -> bool {
        self.state & Self::STATE_IN_PLAY_MODE != 0
    }

    pub fn is_braking(&self) -> bool {
        self.state & Self::STATE_BRAKING != 0
    }
}

/// Bitmask of manual operations currently permitted at a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StationState(u32);

impl StationState {
    pub const EMERGENCY_STOP: u32 = 1;
    pub const MANUAL_DISPATCH: u32 = 2;
    pub const CAN_DISPATCH: u32 = 4;
    pub const CAN_CLOSE_GATES: u32 = 8;
    pub const CAN_OPEN_GATES: u32 = 16;
    pub const CAN_CLOSE_HARNESS: u32 = 32;
    pub const CAN_OPEN_HARNESS: u32 = 64;
    pub const CAN_RAISE_PLATFORM: u32 = 128;
    pub const CAN_LOWER_PLATFORM: u32 = 256;
    pub const CAN_LOCK_FLYER_CAR: u32 = 512;
    pub const CAN_UNLOCK_FLYER_CAR: u32 = 1024;

    /// Wrap a raw flag word.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Decode from a StationState message payload (one big-endian u32).
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != 4 {
            return Err(ClientError::Protocol(format!(
                "station state payload is {} bytes, expected 4",
                payload.len()
            )));
        }
        Ok(Self(read_u32(payload, 0)))
    }

    /// Raw flag word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Check whether every flag in `flags` is set.
    pub fn contains(self, flags: u32) -> bool {
        self.0 & flags == flags
    }

    pub fn is_emergency_stop(self) -> bool {
        self.contains(Self::EMERGENCY_STOP)
    }

    pub fn is_manual_dispatch(self) -> bool {
        self.contains(Self::MANUAL_DISPATCH)
    }

    pub fn can_dispatch(self) -> bool {
        self.contains(Self::CAN_DISPATCH)
    }
}

/// Current coaster index and nearest station index, as reported by the
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoasterAndStation {
    pub coaster: i32,
    pub station: i32,
}

impl CoasterAndStation {
    pub fn new(coaster: i32, station: i32) -> Self {
        Self { coaster, station }
    }
}

/// Server application version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u8,
}

impl Version {
    /// Decode from a Version message payload (4 raw bytes).
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != 4 {
            return Err(ClientError::Protocol(format!(
                "version payload is {} bytes, expected 4",
                payload.len()
            )));
        }
        Ok(Self {
            major: payload[0],
            minor: payload[1],
            patch: payload[2],
            build: payload[3],
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}
