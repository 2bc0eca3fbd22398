//! # semstreams_components — the component library
//!
//! Protocol adapters around the flow runtime's [`Component`] contract: UDP
//! and WebSocket inputs, the federation WebSocket output with declarative
//! filtering and buffered reconnect, the HTTP query gateway, the message
//! logger and the metrics endpoint. All I/O passes through typed messages
//! on the bus.
//!
//! [`Component`]: semstreams_flow::Component

pub mod filter;
pub mod gateway;
pub mod logger;
pub mod metrics_service;
pub mod udp_input;
pub mod websocket_in;
pub mod websocket_out;

pub use filter::{FilterOp, FilterSpec};
pub use gateway::HttpGateway;
pub use logger::MessageLogger;
pub use metrics_service::MetricsService;
pub use udp_input::UdpJsonInput;
pub use websocket_in::FederationInput;
pub use websocket_out::FederationOutput;
