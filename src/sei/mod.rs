// SEI telemetry extraction
//
// The recorder embeds per-frame vehicle state as a protobuf message inside
// H.264 SEI user-data-unregistered NAL units. `extract` walks a single MP4
// and returns every frame it can decode, in stream order. A corrupt outer
// atom is fatal; everything below that is skipped and the walk continues.

mod mp4;
mod payload;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use prost::Message;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use payload::strip_emulation_prevention;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum GearState {
    GearUnknown = 0,
    Park = 1,
    Reverse = 2,
    Neutral = 3,
    Drive = 4,
}

impl GearState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GearState::GearUnknown => "UNKNOWN",
            GearState::Park => "PARK",
            GearState::Reverse => "REVERSE",
            GearState::Neutral => "NEUTRAL",
            GearState::Drive => "DRIVE",
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration, Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum AutopilotState {
    ApUnknown = 0,
    Off = 1,
    Available = 2,
    Active = 3,
    SelfDriving = 4,
}

impl AutopilotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutopilotState::ApUnknown => "UNKNOWN",
            AutopilotState::Off => "OFF",
            AutopilotState::Available => "AVAILABLE",
            AutopilotState::Active => "ACTIVE",
            AutopilotState::SelfDriving => "SELF_DRIVING",
        }
    }
}

/// One decoded telemetry sample. Field tags follow the recorder's wire
/// format; 7 and 8 are carried but not interpreted.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct TelemetryFrame {
    #[prost(float, tag = "1")]
    pub vehicle_speed_mps: f32,
    #[prost(enumeration = "GearState", tag = "2")]
    pub gear_state: i32,
    #[prost(double, tag = "3")]
    pub latitude_deg: f64,
    #[prost(double, tag = "4")]
    pub longitude_deg: f64,
    #[prost(float, tag = "5")]
    pub steering_wheel_angle: f32,
    #[prost(enumeration = "AutopilotState", tag = "6")]
    pub autopilot_state: i32,
    #[prost(uint64, tag = "7")]
    pub frame_counter: u64,
    #[prost(uint64, tag = "8")]
    pub capture_time_ms: u64,
}

impl TelemetryFrame {
    pub fn gear(&self) -> GearState {
        GearState::try_from(self.gear_state).unwrap_or(GearState::GearUnknown)
    }

    pub fn autopilot(&self) -> AutopilotState {
        AutopilotState::try_from(self.autopilot_state).unwrap_or(AutopilotState::ApUnknown)
    }
}

/// Extract every decodable telemetry frame from one MP4, in stream order.
/// The sequence may be empty. Per-NAL decode failures are dropped silently;
/// only an unreadable file or a corrupt top-level atom errors.
pub fn extract(path: &Path) -> Result<Vec<TelemetryFrame>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let region = mp4::find_mdat(&mut reader)?;

    let mut frames = Vec::new();
    for nal in mp4::SeiNalIter::new(&mut reader, region)? {
        let Some(proto) = payload::proto_payload(&nal) else {
            continue;
        };
        if let Ok(frame) = TelemetryFrame::decode(proto.as_slice()) {
            frames.push(frame);
        }
    }
    Ok(frames)
}
