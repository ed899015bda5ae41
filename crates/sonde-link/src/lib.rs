//! Telemetry/command core for the CopterSonde ground station.
//!
//! Connects to one vehicle over UDP or TCP, fuses the MAVLink stream
//! (including the vendor atmospheric-sensor message) into a shared
//! [`state::VehicleState`], estimates wind from attitude, runs the
//! parameter download/write protocol and fans events out to UI-side
//! consumers. Rendering, persistence and map layers live elsewhere and
//! talk to this crate through [`MavClient`] and the [`event_bus`].

pub mod client;
mod command;
pub mod config;
pub mod error;
pub mod event_bus;
mod event_loop;
pub mod modes;
pub mod params;
pub mod sensor;
pub mod state;
pub mod transport;
pub mod wind;

pub use client::{MavClient, ParamsHandle};
pub use config::ClientConfig;
pub use error::ClientError;
pub use event_bus::{Event, EventBus, EventTopic};
pub use params::{Param, ParamEvent, ParamKind, ParamProgress, ParamUpdate};
pub use state::{
    AdsbTarget, History, Severity, SharedVehicleState, StateSnapshot, StatusMessage, VehicleState,
};
pub use transport::{LinkEndpoint, Transport, TransportError, TransportSettings};
pub use wind::{dew_point, WindEstimate, WindEstimator};
