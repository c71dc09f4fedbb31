//! Sensor session management.
//!
//! A session is an open SDK handle plus the metadata read when it was opened.
//! Sessions live in the shared device registry, keyed by the address the
//! client used to connect.
//!
//! ```text
//!   connect_sensor ──▶ SessionManager ──▶ SensorSdk::open
//!                          │                 └─ fetch_metadata
//!                          ▼
//!                     DeviceRegistry  ◀── scan operations (read)
//!                          ▲          ◀── visualization start (read)
//!                          └───────────── shutdown drain
//! ```

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{
    ConnectOutcome, DisconnectOutcome, InfoOutcome, SensorDetails, SensorSummary, SessionSummary,
};
