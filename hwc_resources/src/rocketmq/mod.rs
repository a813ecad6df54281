//! Distributed Message Service for RocketMQ.

pub mod instance;

pub use instance::{
    RocketMqInstance, RocketMqInstanceConfig, RocketMqInstanceState, RocketMqParameter, RocketMqWaits,
};

/// Service name of the DMS v2 endpoint.
pub const SERVICE: &str = "dmsv2";
