//! WebSocket Real-Time Streaming
//!
//! Dashboards watch a device live by opening a websocket on
//! `/api/v1/devices/{id}/stream`. Every data submission for that device is
//! pushed as one text frame:
//!
//! ```json
//! {"time": 1699000000000,
//!  "meta": {"type": "fridge", "name": "kitchen", "dev_id": "AA:BB"},
//!  "data": {"tempCam1": {"1699000000000": 4.5}, "tempCam2": {}}}
//! ```
//!
//! - **StreamHub**: observer sets per device, fan-out and dead-connection reclaim
//! - **Handler**: websocket upgrade and connection lifecycle

mod handler;
pub mod hub;

pub use handler::stream_handler;
pub use hub::{ObserverRegistry, StreamHub};
