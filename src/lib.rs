//! Ouster lidar MCP server
//!
//! This library provides an MCP (Model Context Protocol) server that lets LLM
//! agents discover Ouster lidar sensors, hold sessions with them, capture and
//! analyze scans, and run point-cloud visualizers as child processes.
//!
//! # Architecture
//!
//! - **Registries** (`registry`): the device registry (address → open sensor
//!   session) and the process registry (address → visualizer pid). Both are
//!   created once by [`Services`] and shared by every component.
//!
//! - **SessionManager** (`session`): idempotent connect/disconnect and
//!   metadata, serialized per address.
//!
//! - **VisualizationSupervisor** (`viz`): launches, lists and tears down
//!   visualizer process trees, using a [`ProcessInspector`] chosen at startup.
//!
//! - **DiscoveryAdapter** (`discovery`): runs the discovery command and
//!   parses its JSON or text output.
//!
//! - **ScanOperations** (`scan`): scan capture, field statistics and
//!   point-cloud analysis on open sessions.
//!
//! - **ShutdownCoordinator** (`shutdown`): drains and seals both registries
//!   on exit, then cancels the transport.
//!
//! - **LidarMcpServer** (`server`): the rmcp tool surface.
//!
//! # Tools
//!
//! ## Sensors
//! - `connect_sensor`: Open a session with a sensor
//! - `disconnect_sensor`: Close a sensor session
//! - `get_sensor_info`: Metadata of a connected sensor
//! - `get_connected_sensors`: List connected sensors
//!
//! ## Discovery
//! - `discover_sensors`: Find sensors on the local network
//!
//! ## Visualization
//! - `start_visualization`: Launch a point-cloud viewer
//! - `stop_visualization`: Stop a viewer and its children
//! - `list_visualizations`: List running viewers
//!
//! ## Scans
//! - `capture_single_scan`: One scan, summarized
//! - `get_scan`: One scan with per-field statistics
//! - `stream_scans`: Several scans with per-scan statistics
//! - `process_point_cloud`: Point-cloud bounding box, statistics and occupancy grid

pub mod config;
pub mod discovery;
pub mod error;
pub mod progress;
pub mod registry;
pub mod scan;
pub mod sdk;
pub mod server;
pub mod services;
pub mod session;
pub mod shutdown;
pub mod tool_registry;
pub mod viz;

pub use config::ServerConfig;
pub use error::{SdkError, ToolError};
pub use sdk::{OusterHttpSdk, SensorSdk, SensorSource};
pub use server::{LidarMcpServer, ServerMode};
pub use services::Services;
pub use tool_registry::{ToolCategory, ToolInfo, TOOL_REGISTRY};
pub use viz::{detect_inspector, ProcessInspector};
