//! DriftMQ - a minimal MQTT v3.1.1 broker core
//!
//! Implements the wire-protocol codec, per-connection session state
//! machine, and subscription registry/router that make up a lightweight
//! MQTT 3.1.1 publish/subscribe broker.

pub mod broker;
pub mod buffer_pool;
pub mod codec;
pub mod config;
pub mod protocol;
pub mod session;
pub mod topic;

pub use broker::{Broker, BrokerConfig};
pub use config::Config;
pub use protocol::QoS;
