//! Tool registry for discovery.
//!
//! Every tool is exposed in tools/list; the registry adds categories, long
//! descriptions and examples for `tool_catalog` and `tool_help`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Tool category for grouping related tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Tool discovery
    Core,
    /// Sensor connections and metadata
    Sensors,
    /// Network discovery
    Discovery,
    /// Point-cloud viewer processes
    Visualization,
    /// Scan capture and analysis
    Scans,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Sensors => "sensors",
            Self::Discovery => "discovery",
            Self::Visualization => "visualization",
            Self::Scans => "scans",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::Sensors => "Sensors",
            Self::Discovery => "Discovery",
            Self::Visualization => "Visualization",
            Self::Scans => "Scans",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Core => "Tool discovery and help",
            Self::Sensors => "Connect, disconnect and inspect sensors",
            Self::Discovery => "Find sensors on the local network",
            Self::Visualization => "Start, stop and list point-cloud viewers",
            Self::Scans => "Capture scans and analyze point clouds",
        }
    }

    pub fn all() -> &'static [ToolCategory] {
        &[
            Self::Core,
            Self::Sensors,
            Self::Discovery,
            Self::Visualization,
            Self::Scans,
        ]
    }
}

impl FromStr for ToolCategory {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "core" | "help" => Ok(Self::Core),
            "sensors" | "sensor" | "session" | "sessions" | "connection" => Ok(Self::Sensors),
            "discovery" | "discover" | "network" => Ok(Self::Discovery),
            "visualization" | "visualizations" | "viz" | "viewer" => Ok(Self::Visualization),
            "scans" | "scan" | "point_cloud" | "pointcloud" => Ok(Self::Scans),
            _ => Err(()),
        }
    }
}

/// Metadata for a single tool
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub category: ToolCategory,
    /// Short description (1 line, <100 chars) - used in tool_catalog results
    pub short_desc: &'static str,
    /// Full description with usage details - used in tool_help
    pub full_desc: &'static str,
    /// Example invocation (JSON)
    pub example: &'static str,
    /// Keywords for search
    pub keywords: &'static [&'static str],
}

/// Static registry of all tools
pub static TOOL_REGISTRY: &[ToolInfo] = &[
    // === CORE ===
    ToolInfo {
        name: "tool_catalog",
        category: ToolCategory::Core,
        short_desc: "Discover tools by query or category",
        full_desc: "Search the available tools by what you want to do, or list the tools in a \
                    category. Without arguments, lists the categories.",
        example: r#"{"query": "open a viewer"}"#,
        keywords: &["tools", "catalog", "discover", "search", "help"],
    },
    ToolInfo {
        name: "tool_help",
        category: ToolCategory::Core,
        short_desc: "Full documentation for a tool",
        full_desc: "Return the full description, parameter schema, and an example invocation \
                    for one tool.",
        example: r#"{"name": "connect_sensor"}"#,
        keywords: &["help", "docs", "schema", "usage"],
    },
    // === SENSORS ===
    ToolInfo {
        name: "connect_sensor",
        category: ToolCategory::Sensors,
        short_desc: "Open a session with a sensor",
        full_desc: "Connect to an Ouster sensor by hostname or IP address and read its \
                    metadata. Connecting to an already connected sensor returns \
                    already_connected with the stored metadata and opens nothing new. \
                    Call disconnect_sensor when done to release the sensor.",
        example: r#"{"hostname": "os-122201000123.local"}"#,
        keywords: &["connect", "open", "session", "sensor", "lidar", "attach"],
    },
    ToolInfo {
        name: "disconnect_sensor",
        category: ToolCategory::Sensors,
        short_desc: "Close a sensor session",
        full_desc: "Close the session with a sensor and release its handle. Disconnecting a \
                    sensor that is not connected returns not_connected and changes nothing.",
        example: r#"{"hostname": "os-122201000123.local"}"#,
        keywords: &["disconnect", "close", "release", "session", "sensor"],
    },
    ToolInfo {
        name: "get_sensor_info",
        category: ToolCategory::Sensors,
        short_desc: "Metadata of a connected sensor",
        full_desc: "Return the metadata of a connected sensor: serial number, product line, \
                    firmware, lidar mode, beam intrinsics, frame layout and UDP ports. \
                    Set refresh=true to re-read the metadata from the sensor.",
        example: r#"{"hostname": "os-122201000123.local", "refresh": false}"#,
        keywords: &["info", "metadata", "serial", "firmware", "mode", "beam", "intrinsics"],
    },
    ToolInfo {
        name: "get_connected_sensors",
        category: ToolCategory::Sensors,
        short_desc: "List connected sensors",
        full_desc: "List every sensor with an open session, with hostname, serial number \
                    and model.",
        example: r#"{}"#,
        keywords: &["list", "connected", "sessions", "sensors"],
    },
    // === DISCOVERY ===
    ToolInfo {
        name: "discover_sensors",
        category: ToolCategory::Discovery,
        short_desc: "Find sensors on the local network",
        full_desc: "Run the discovery command (ouster-cli discover by default) and report \
                    every sensor it finds with hostname, IP address, serial number, model \
                    and firmware. Sensors with an open session are marked connected. \
                    Discovery is bounded by a timeout.",
        example: r#"{}"#,
        keywords: &["discover", "find", "scan network", "mdns", "search", "network"],
    },
    // === VISUALIZATION ===
    ToolInfo {
        name: "start_visualization",
        category: ToolCategory::Visualization,
        short_desc: "Launch a point-cloud viewer for a sensor",
        full_desc: "Start the visualizer (ouster-cli source <hostname> viz by default) for a \
                    connected sensor. Only one visualizer runs per sensor; a second start \
                    returns already_running with the existing pid. A visualizer that exits \
                    during startup is reported as an error with its output.",
        example: r#"{"hostname": "os-122201000123.local"}"#,
        keywords: &["start", "launch", "viewer", "viz", "visualize", "display", "open"],
    },
    ToolInfo {
        name: "stop_visualization",
        category: ToolCategory::Visualization,
        short_desc: "Stop the viewer for a sensor",
        full_desc: "Terminate the visualizer for a sensor together with its child processes. \
                    Processes that ignore the terminate signal are killed after a grace \
                    period.",
        example: r#"{"hostname": "os-122201000123.local"}"#,
        keywords: &["stop", "kill", "terminate", "close", "viewer", "viz"],
    },
    ToolInfo {
        name: "list_visualizations",
        category: ToolCategory::Visualization,
        short_desc: "List running viewers",
        full_desc: "List running visualizers with pid, status, running time and, where the \
                    platform supports it, CPU and memory usage. Viewers that exited on \
                    their own are removed from the list.",
        example: r#"{}"#,
        keywords: &["list", "running", "viewers", "processes", "viz", "cpu", "memory"],
    },
    // === SCANS ===
    ToolInfo {
        name: "capture_single_scan",
        category: ToolCategory::Scans,
        short_desc: "Capture one scan and summarize it",
        full_desc: "Capture one lidar scan from a connected sensor and report its frame id, \
                    shape, available channel fields and range statistics.",
        example: r#"{"hostname": "os-122201000123.local"}"#,
        keywords: &["capture", "scan", "frame", "range", "snapshot"],
    },
    ToolInfo {
        name: "get_scan",
        category: ToolCategory::Scans,
        short_desc: "Capture one scan with per-field statistics",
        full_desc: "Capture one lidar scan and report statistics (min, max, mean, non-zero \
                    count) for every channel field: range, signal, reflectivity and near-IR.",
        example: r#"{"hostname": "os-122201000123.local"}"#,
        keywords: &["scan", "fields", "signal", "reflectivity", "near_ir", "statistics"],
    },
    ToolInfo {
        name: "stream_scans",
        category: ToolCategory::Scans,
        short_desc: "Capture several scans and report frame statistics",
        full_desc: "Capture num_scans consecutive scans (1-1000) and report per-scan valid \
                    point counts and range statistics. Progress is reported per scan.",
        example: r#"{"hostname": "os-122201000123.local", "num_scans": 10}"#,
        keywords: &["stream", "scans", "frames", "capture", "sequence"],
    },
    ToolInfo {
        name: "process_point_cloud",
        category: ToolCategory::Scans,
        short_desc: "Analyze the point cloud of one scan",
        full_desc: "Capture one scan, project it to XYZ points and report the bounding box, \
                    range, intensity and height statistics, and the densest cells of a 1 m \
                    occupancy grid. Points farther than max_distance meters are dropped.",
        example: r#"{"hostname": "os-122201000123.local", "max_distance": 50.0}"#,
        keywords: &["point cloud", "xyz", "occupancy", "grid", "density", "height", "analyze"],
    },
];

/// Get all tools
pub fn all_tools() -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter()
}

/// Get tool by name
pub fn get_tool(name: &str) -> Option<&'static ToolInfo> {
    TOOL_REGISTRY.iter().find(|t| t.name == name)
}

/// Get tools by category
pub fn tools_by_category(category: ToolCategory) -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter().filter(move |t| t.category == category)
}

/// Search tools by query (simple keyword matching)
pub fn search_tools(query: &str, limit: usize) -> Vec<(&'static ToolInfo, Vec<&'static str>)> {
    let query_lower = query.to_lowercase();
    let query_words: Vec<&str> = query_lower.split_whitespace().collect();

    let mut results: Vec<(&'static ToolInfo, Vec<&'static str>, usize)> = Vec::new();

    for tool in TOOL_REGISTRY.iter() {
        let mut matched_keywords = Vec::new();
        let mut score = 0usize;

        let name_lower = tool.name.to_lowercase();
        for word in &query_words {
            if name_lower.contains(word) {
                score += 10;
                if !matched_keywords.contains(&"name match") {
                    matched_keywords.push("name match");
                }
            }
        }

        let desc_lower = tool.short_desc.to_lowercase();
        for word in &query_words {
            if desc_lower.contains(word) {
                score += 5;
            }
        }

        for keyword in tool.keywords {
            let kw_lower = keyword.to_lowercase();
            for word in &query_words {
                if kw_lower.contains(word) || word.contains(&kw_lower) {
                    score += 3;
                    if !matched_keywords.contains(keyword) {
                        matched_keywords.push(keyword);
                    }
                }
            }
        }

        let cat_str = tool.category.as_str();
        for word in &query_words {
            if cat_str.contains(word) {
                score += 2;
                if !matched_keywords.contains(&cat_str) {
                    matched_keywords.push(cat_str);
                }
            }
        }

        if score > 0 {
            results.push((tool, matched_keywords, score));
        }
    }

    // Stable sort keeps registry order among equal scores
    results.sort_by(|a, b| b.2.cmp(&a.2));

    results
        .into_iter()
        .take(limit)
        .map(|(tool, keywords, _)| (tool, keywords))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::tool_registry::*;
    use std::collections::HashSet;

    #[test]
    fn test_search_tools() {
        let results = search_tools("launch viewer", 5);
        assert!(!results.is_empty());
        assert_eq!(results[0].0.name, "start_visualization");
    }

    #[test]
    fn test_get_tool() {
        assert!(get_tool("connect_sensor").is_some());
        assert!(get_tool("nonexistent").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = all_tools().map(|t| t.name).collect();
        assert_eq!(names.len(), TOOL_REGISTRY.len());
    }

    #[test]
    fn test_every_category_has_tools() {
        for cat in ToolCategory::all() {
            assert!(tools_by_category(*cat).count() > 0, "{}", cat.as_str());
            assert_eq!(cat.as_str().parse::<ToolCategory>(), Ok(*cat));
        }
    }
}
