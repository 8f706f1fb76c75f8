//! s3x-ws - WebSocket bridge between block editors and the gateway bus
//!
//! A browser client connects, announces the topic it publishes on with
//! `{"id": "to_arduino_gateway"}` and from then on:
//!
//! - every JSON message it sends is published on that topic
//! - every bus message on the mirrored topic (`from_arduino_gateway` and
//!   its sub-topics) is forwarded to it
//!
//! Gateways stay unaware of WebSockets; they only see the bus.

pub mod payload;
pub mod routes;
pub mod server;

pub use payload::{is_panic, localize_timestamp, reply_topic};
pub use routes::RouteTable;
pub use server::{WsGateway, WsGatewayHandle};
