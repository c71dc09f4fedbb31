//! Visualization process supervision.
//!
//! Visualizers are external viewers (`ouster-cli source <host> viz` by
//! default) started in their own process group. The supervisor tracks one per
//! connected sensor, purges entries whose process died on its own, and tears
//! down the whole process tree on stop.

mod inspector;
mod supervisor;
mod types;

pub use inspector::{
    detect as detect_inspector, group_exists, signal_group, InspectError, ProcessInspector,
    ProcessSnapshot, SignalInspector, StopSignal, SysinfoInspector,
};
pub use supervisor::{terminate_tree, Termination, VisualizationSupervisor};
pub use types::{StartOutcome, StopOutcome, VizListing, VizSummary};
