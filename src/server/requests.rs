//! MCP tool request types.

use rmcp::schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct SensorRequest {
    #[schemars(description = "Sensor hostname or IP address (e.g., os-122201000123.local)")]
    #[serde(alias = "address", alias = "sensor")]
    pub hostname: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct SensorInfoRequest {
    #[schemars(description = "Sensor hostname or IP address")]
    #[serde(alias = "address", alias = "sensor")]
    pub hostname: String,
    #[schemars(
        description = "Re-read metadata from the sensor instead of returning the copy taken at connect (default: false)"
    )]
    pub refresh: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct StreamScansRequest {
    #[schemars(description = "Sensor hostname or IP address")]
    #[serde(alias = "address", alias = "sensor")]
    pub hostname: String,
    #[schemars(description = "Number of scans to capture (1-1000, default: 10)")]
    #[serde(alias = "count")]
    pub num_scans: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct PointCloudRequest {
    #[schemars(description = "Sensor hostname or IP address")]
    #[serde(alias = "address", alias = "sensor")]
    pub hostname: String,
    #[schemars(
        description = "Drop points farther than this many meters from the sensor (optional)"
    )]
    pub max_distance: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct EmptyParams {}

#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct ToolCatalogRequest {
    #[schemars(
        description = "What you're trying to accomplish (e.g., 'open a viewer for my sensor')"
    )]
    pub query: Option<String>,
    #[schemars(description = "Filter by category: sensors, visualization, scans, discovery, core")]
    pub category: Option<String>,
    #[schemars(description = "Maximum number of tools to return (default: 7)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct ToolHelpRequest {
    #[schemars(description = "Name of the tool to get help for")]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hostname_accepts_address_alias() {
        let req: SensorRequest = serde_json::from_value(json!({"address": "10.0.0.5"})).unwrap();
        assert_eq!(req.hostname, "10.0.0.5");
    }

    #[test]
    fn optional_fields_default_to_none() {
        let req: PointCloudRequest =
            serde_json::from_value(json!({"hostname": "os-1"})).unwrap();
        assert!(req.max_distance.is_none());

        let req: StreamScansRequest =
            serde_json::from_value(json!({"hostname": "os-1", "count": 5})).unwrap();
        assert_eq!(req.num_scans, Some(5));
    }

    #[test]
    fn schemas_derive_through_the_rmcp_reexport() {
        let schema = serde_json::to_value(rmcp::schemars::schema_for!(StreamScansRequest)).unwrap();
        let properties = &schema["properties"];
        assert!(properties["hostname"]["description"]
            .as_str()
            .is_some_and(|d| d.contains("hostname")));
        assert!(properties.get("num_scans").is_some());
        assert_eq!(schema["required"], json!(["hostname"]));
    }
}
