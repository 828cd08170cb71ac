//! Core types for captured CAN traffic.
//!
//! - [`Frame`] is the minimal decoded representation stored in the ring
//!   buffer: arbitration id (extended flag in-band), payload, timestamp.
//! - [`InterfaceSpec`] and [`CaptureConfig`] describe what to capture and
//!   how; both deserialize from YAML for config-file driven embedding.
//! - [`TimestampMode`] selects software vs hardware receive timestamps.

mod config;
mod frame;

pub use config::{
    ANY_INTERFACE, CaptureConfig, CaptureSetup, InterfaceSpec, TimestampMode, from_yaml_str,
};
pub use frame::{
    CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_INV_FILTER, CAN_RTR_FLAG, CAN_SFF_MASK, Frame,
    MAX_DATA_LEN,
};
