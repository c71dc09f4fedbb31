//! MCP server exposing sensor, visualization and scan tools.

mod requests;

pub use requests::*;

use crate::error::ToolError;
use crate::progress::{Progress, ProgressEvent};
use crate::services::Services;
use crate::tool_registry::{self, ToolCategory};
use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::{
        CallToolResult, Content, LoggingLevel, LoggingMessageNotificationParam,
        ProgressNotificationParam, ServerCapabilities, ServerInfo, Tool,
    },
    schemars::{schema_for, JsonSchema},
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer, ServerHandler,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

const DEFAULT_STREAM_SCANS: usize = 10;

/// MCP server for Ouster lidar sensors
#[derive(Clone)]
pub struct LidarMcpServer {
    services: Arc<Services>,
    tool_mux: ToolMux<LidarMcpServer>,
    mode: ServerMode,
}

#[derive(Clone, Copy, Debug)]
pub enum ServerMode {
    Stdio,
    Http,
}

#[derive(Clone)]
struct ToolMux<S> {
    call_router: ToolRouter<S>,
}

impl<S> ToolMux<S>
where
    S: Send + Sync + 'static,
{
    fn new(call_router: ToolRouter<S>) -> Self {
        Self { call_router }
    }

    async fn call(
        &self,
        context: ToolCallContext<'_, S>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.call_router.call(context).await
    }

    /// Routed tools in registry order.
    fn list_all(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for info in tool_registry::all_tools() {
            if let Some(route) = self.call_router.map.get(info.name) {
                tools.push(route.attr.clone());
            }
        }
        tools
    }
}

impl LidarMcpServer {
    pub fn new(services: Arc<Services>, mode: ServerMode) -> Self {
        info!(?mode, "Creating lidar MCP server");
        let call_router = Self::tool_router();
        Self {
            services,
            tool_mux: ToolMux::new(call_router),
            mode,
        }
    }

    fn mode_hint(&self) -> &'static str {
        match self.mode {
            ServerMode::Stdio => "Disconnect sensors and stop visualizations when done; \
                 everything still open is released when the server exits.",
            ServerMode::Http => "In multi-client (HTTP) mode sensor sessions and visualizations \
                 are shared by every client; coordinate before disconnecting a sensor.",
        }
    }

    fn instructions(&self) -> String {
        let mut categories = String::new();
        for cat in ToolCategory::all() {
            let names: Vec<_> = tool_registry::tools_by_category(*cat)
                .map(|t| t.name)
                .collect();
            categories.push_str(&format!(
                "\n- {}: {} ({})",
                cat.as_str(),
                cat.description(),
                names.join(", ")
            ));
        }
        format!(
            "Ouster lidar sensor server. \
             \n\nWorkflow: \
             \n1. discover_sensors: Find sensors on the local network \
             \n2. connect_sensor: Open a session with a sensor by hostname or IP \
             \n3. get_sensor_info / capture_single_scan / process_point_cloud: Inspect the sensor \
             \n4. start_visualization: Open a point-cloud viewer; stop_visualization closes it \
             \n5. disconnect_sensor: Release the sensor \
             \n\n{mode_hint} \
             \n\nTool Categories:{categories} \
             \n\nTip: Use tool_catalog(query='what you want to do') to find the right tool.",
            mode_hint = self.mode_hint(),
        )
    }

    fn parse_hostname(raw: &str) -> Result<String, ToolError> {
        let hostname = raw.trim();
        if hostname.is_empty() {
            return Err(ToolError::InvalidParams("hostname must not be empty".to_string()));
        }
        Ok(hostname.to_string())
    }

    /// Forward progress events of one request to the requesting peer.
    ///
    /// Progress notifications need a client progress token; log messages are
    /// always sent. The forwarder ends once every `Progress` clone is dropped.
    fn progress_for(
        &self,
        ctx: &RequestContext<RoleServer>,
        tool: &'static str,
    ) -> (Progress, JoinHandle<()>) {
        let (progress, mut events) = Progress::channel();
        let peer = ctx.peer.clone();
        let token = ctx.meta.get_progress_token();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let sent = match event {
                    ProgressEvent::Step { progress, total } => match &token {
                        Some(token) => {
                            peer.notify_progress(ProgressNotificationParam {
                                progress_token: token.clone(),
                                progress: f64::from(progress),
                                total: Some(f64::from(total)),
                                message: None,
                            })
                            .await
                        }
                        None => Ok(()),
                    },
                    ProgressEvent::Info(message) => {
                        peer.notify_logging_message(LoggingMessageNotificationParam {
                            level: LoggingLevel::Info,
                            logger: Some(tool.to_string()),
                            data: Value::String(message),
                        })
                        .await
                    }
                    ProgressEvent::Error(message) => {
                        peer.notify_logging_message(LoggingMessageNotificationParam {
                            level: LoggingLevel::Error,
                            logger: Some(tool.to_string()),
                            data: Value::String(message),
                        })
                        .await
                    }
                };
                if let Err(e) = sent {
                    debug!(tool, error = %e, "Dropping progress notification");
                }
            }
        });
        (progress, forwarder)
    }

    /// Run one tool operation with progress forwarding, abandoning it when
    /// the client cancels the request.
    async fn run<F, Fut>(
        &self,
        ctx: &RequestContext<RoleServer>,
        tool: &'static str,
        op: F,
    ) -> Result<CallToolResult, McpError>
    where
        F: FnOnce(Progress) -> Fut,
        Fut: Future<Output = CallToolResult>,
    {
        let (progress, forwarder) = self.progress_for(ctx, tool);
        let result = tokio::select! {
            _ = ctx.ct.cancelled() => {
                info!(tool, "Request cancelled by client");
                ToolError::Cancelled.to_tool_result()
            }
            result = op(progress) => result,
        };
        // Flush notifications before the response goes out.
        let _ = forwarder.await;
        Ok(result)
    }
}

fn render<T: Serialize + Debug>(result: &T, is_error: bool) -> CallToolResult {
    let content = vec![Content::text(
        serde_json::to_string_pretty(result).unwrap_or_else(|_| format!("{:?}", result)),
    )];
    if is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

#[tool_router]
impl LidarMcpServer {
    #[tool(description = "Connect to an Ouster sensor by hostname or IP address and read its metadata. \
        Returns already_connected if a session is open.")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname))]
    async fn connect_sensor(
        &self,
        Parameters(req): Parameters<SensorRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        self.run(&ctx, "connect_sensor", |progress| async move {
            let outcome = self.services.sessions.connect(&hostname, &progress).await;
            render(&outcome, outcome.is_error())
        })
        .await
    }

    #[tool(description = "Disconnect from a sensor and release its session")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname))]
    async fn disconnect_sensor(
        &self,
        Parameters(req): Parameters<SensorRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        self.run(&ctx, "disconnect_sensor", |progress| async move {
            let outcome = self.services.sessions.disconnect(&hostname, &progress).await;
            render(&outcome, false)
        })
        .await
    }

    #[tool(description = "Get metadata of a connected sensor (serial, model, firmware, mode, beam intrinsics). \
        Set refresh=true to re-read it from the sensor.")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname, refresh = ?req.refresh))]
    async fn get_sensor_info(
        &self,
        Parameters(req): Parameters<SensorInfoRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        let refresh = req.refresh.unwrap_or(false);
        self.run(&ctx, "get_sensor_info", |progress| async move {
            let outcome = self
                .services
                .sessions
                .info(&hostname, refresh, &progress)
                .await;
            render(&outcome, outcome.is_error())
        })
        .await
    }

    #[tool(description = "List sensors with an open session")]
    #[instrument(skip(self))]
    async fn get_connected_sensors(&self) -> Result<CallToolResult, McpError> {
        let sensors = self.services.sessions.list().await;
        debug!(count = sensors.len(), "Listing connected sensors");
        Ok(render(
            &json!({
                "status": "success",
                "connected_sensors": sensors,
            }),
            false,
        ))
    }

    #[tool(description = "Discover Ouster sensors on the local network. \
        Sensors with an open session are marked connected.")]
    #[instrument(skip(self, ctx))]
    async fn discover_sensors(
        &self,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.run(&ctx, "discover_sensors", |progress| async move {
            let outcome = self.services.discovery.discover(&progress).await;
            render(&outcome, outcome.is_error())
        })
        .await
    }

    #[tool(description = "Launch a point-cloud visualizer for a connected sensor. \
        One visualizer runs per sensor.")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname))]
    async fn start_visualization(
        &self,
        Parameters(req): Parameters<SensorRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        self.run(&ctx, "start_visualization", |progress| async move {
            let outcome = self.services.visualizations.start(&hostname, &progress).await;
            render(&outcome, outcome.is_error())
        })
        .await
    }

    #[tool(description = "Stop the visualizer of a sensor together with its child processes")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname))]
    async fn stop_visualization(
        &self,
        Parameters(req): Parameters<SensorRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        self.run(&ctx, "stop_visualization", |progress| async move {
            let outcome = self.services.visualizations.stop(&hostname, &progress).await;
            render(&outcome, false)
        })
        .await
    }

    #[tool(description = "List running visualizers with pid, status and resource usage")]
    #[instrument(skip(self, ctx))]
    async fn list_visualizations(
        &self,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.run(&ctx, "list_visualizations", |progress| async move {
            let listing = self.services.visualizations.list(&progress).await;
            render(
                &json!({
                    "status": "success",
                    "visualizations": listing.visualizations,
                    "total_count": listing.total_count,
                }),
                false,
            )
        })
        .await
    }

    #[tool(description = "Capture one scan from a connected sensor and summarize its shape and range")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname))]
    async fn capture_single_scan(
        &self,
        Parameters(req): Parameters<SensorRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        self.run(&ctx, "capture_single_scan", |progress| async move {
            let outcome = self
                .services
                .scans
                .capture_single_scan(&hostname, &progress)
                .await;
            render(&outcome, outcome.is_error())
        })
        .await
    }

    #[tool(description = "Capture one scan and report statistics for every channel field")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname))]
    async fn get_scan(
        &self,
        Parameters(req): Parameters<SensorRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        self.run(&ctx, "get_scan", |progress| async move {
            let outcome = self.services.scans.get_scan(&hostname, &progress).await;
            render(&outcome, outcome.is_error())
        })
        .await
    }

    #[tool(description = "Capture several consecutive scans (1-1000, default 10) and report per-scan statistics")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname, num_scans = ?req.num_scans))]
    async fn stream_scans(
        &self,
        Parameters(req): Parameters<StreamScansRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        let num_scans = req.num_scans.unwrap_or(DEFAULT_STREAM_SCANS);
        self.run(&ctx, "stream_scans", |progress| async move {
            let outcome = self
                .services
                .scans
                .stream_scans(&hostname, num_scans, &progress)
                .await;
            render(&outcome, outcome.is_error())
        })
        .await
    }

    #[tool(description = "Capture one scan and analyze its point cloud: bounding box, statistics and occupancy grid")]
    #[instrument(skip(self, ctx), fields(hostname = %req.hostname, max_distance = ?req.max_distance))]
    async fn process_point_cloud(
        &self,
        Parameters(req): Parameters<PointCloudRequest>,
        ctx: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let hostname = match Self::parse_hostname(&req.hostname) {
            Ok(h) => h,
            Err(e) => return Ok(e.to_tool_result()),
        };
        let max_distance = req.max_distance;
        self.run(&ctx, "process_point_cloud", |progress| async move {
            let outcome = self
                .services
                .scans
                .process_point_cloud(&hostname, max_distance, &progress)
                .await;
            render(&outcome, outcome.is_error())
        })
        .await
    }

    #[tool(description = "Discover available tools by query or category. \
        Use this to find the right tool for your task before calling tool_help for full details.")]
    #[instrument(skip(self))]
    async fn tool_catalog(
        &self,
        Parameters(req): Parameters<ToolCatalogRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(catalog(&req))
    }

    #[tool(
        description = "Get full documentation for a tool including description, parameters schema, and example."
    )]
    #[instrument(skip(self))]
    async fn tool_help(
        &self,
        Parameters(req): Parameters<ToolHelpRequest>,
    ) -> Result<CallToolResult, McpError> {
        Ok(help(&req.name))
    }
}

fn catalog(req: &ToolCatalogRequest) -> CallToolResult {
    let limit = req.limit.unwrap_or(7).clamp(1, 15);

    if let Some(cat_str) = &req.category {
        if let Ok(cat) = cat_str.parse::<ToolCategory>() {
            let tools: Vec<_> = tool_registry::tools_by_category(cat)
                .take(limit)
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.short_desc,
                        "category": t.category.as_str(),
                    })
                })
                .collect();

            return render(
                &json!({
                    "category": cat.as_str(),
                    "category_description": cat.description(),
                    "tools": tools,
                    "hint": "Use tool_help(name) for full documentation and examples"
                }),
                false,
            );
        }
    }

    if let Some(query) = &req.query {
        let tools: Vec<_> = tool_registry::search_tools(query, limit)
            .iter()
            .map(|(t, keywords)| {
                json!({
                    "name": t.name,
                    "description": t.short_desc,
                    "category": t.category.as_str(),
                    "matched": keywords,
                })
            })
            .collect();

        return render(
            &json!({
                "query": query,
                "tools": tools,
                "hint": "Use tool_help(name) for full documentation and examples"
            }),
            false,
        );
    }

    let categories: Vec<_> = ToolCategory::all()
        .iter()
        .map(|c| {
            json!({
                "category": c.as_str(),
                "description": c.description(),
                "tool_count": tool_registry::tools_by_category(*c).count(),
            })
        })
        .collect();

    render(
        &json!({
            "categories": categories,
            "hint": "Use tool_catalog(category='...') to list tools in a category, or tool_catalog(query='...') to search. tools/list already includes all tools."
        }),
        false,
    )
}

fn help(name: &str) -> CallToolResult {
    match tool_registry::get_tool(name) {
        Some(tool) => render(
            &json!({
                "name": tool.name,
                "category": tool.category.as_str(),
                "description": tool.full_desc,
                "parameters": tool_params_schema(tool.name),
                "example": tool.example,
                "keywords": tool.keywords,
            }),
            false,
        ),
        None => {
            let suggestions: Vec<_> = tool_registry::search_tools(name, 3)
                .iter()
                .map(|(t, _)| t.name)
                .collect();
            render(
                &json!({
                    "status": "error",
                    "error": ToolError::InvalidToolName(name.to_string()).to_string(),
                    "suggestions": suggestions,
                    "hint": "Use tool_catalog to discover available tools"
                }),
                true,
            )
        }
    }
}

fn tool_params_schema(name: &str) -> Option<Value> {
    fn schema<T: JsonSchema>() -> Value {
        serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({}))
    }

    match name {
        "tool_catalog" => Some(schema::<ToolCatalogRequest>()),
        "tool_help" => Some(schema::<ToolHelpRequest>()),
        "connect_sensor" | "disconnect_sensor" | "start_visualization" | "stop_visualization"
        | "capture_single_scan" | "get_scan" => Some(schema::<SensorRequest>()),
        "get_sensor_info" => Some(schema::<SensorInfoRequest>()),
        "stream_scans" => Some(schema::<StreamScansRequest>()),
        "process_point_cloud" => Some(schema::<PointCloudRequest>()),
        "get_connected_sensors" | "discover_sensors" | "list_visualizations" => {
            Some(schema::<EmptyParams>())
        }
        _ => None,
    }
}

#[tool_handler(router = self.tool_mux)]
impl ServerHandler for LidarMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_logging()
                .build(),
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::sdk::fake::FakeSdk;
    use crate::viz::SignalInspector;

    fn text(result: &CallToolResult) -> Value {
        let raw = result.content[0]
            .as_text()
            .map(|t| t.text.clone())
            .unwrap_or_default();
        serde_json::from_str(&raw).unwrap()
    }

    fn server() -> LidarMcpServer {
        let services = Services::new(
            &ServerConfig::default(),
            Arc::new(FakeSdk::new()),
            Arc::new(SignalInspector),
        );
        LidarMcpServer::new(Arc::new(services), ServerMode::Stdio)
    }

    #[test]
    fn every_registry_tool_is_routed() {
        let server = server();
        let listed: Vec<_> = server.tool_mux.list_all().into_iter().map(|t| t.name).collect();
        assert_eq!(listed.len(), tool_registry::TOOL_REGISTRY.len());
        for info in tool_registry::all_tools() {
            assert!(listed.iter().any(|n| n == info.name), "{} is not routed", info.name);
            assert!(tool_params_schema(info.name).is_some(), "{} has no schema", info.name);
        }
    }

    #[test]
    fn instructions_list_every_category() {
        let instructions = server().instructions();
        for cat in ToolCategory::all() {
            assert!(instructions.contains(cat.as_str()));
        }
        assert!(instructions.contains("start_visualization"));
    }

    #[test]
    fn blank_hostname_is_rejected() {
        assert!(matches!(
            LidarMcpServer::parse_hostname("   "),
            Err(ToolError::InvalidParams(_))
        ));
        assert_eq!(LidarMcpServer::parse_hostname(" os-1 ").unwrap(), "os-1");
    }

    #[test]
    fn render_flags_errors() {
        let ok = render(&json!({"status": "success"}), false);
        assert_ne!(ok.is_error, Some(true));
        let err = render(&json!({"status": "error"}), true);
        assert_eq!(err.is_error, Some(true));
        assert_eq!(text(&err)["status"], "error");
    }

    #[test]
    fn catalog_by_category_and_query() {
        let by_category = text(&catalog(&ToolCatalogRequest {
            query: None,
            category: Some("viz".to_string()),
            limit: None,
        }));
        assert_eq!(by_category["category"], "visualization");
        assert_eq!(by_category["tools"].as_array().unwrap().len(), 3);

        let by_query = text(&catalog(&ToolCatalogRequest {
            query: Some("open session".to_string()),
            category: None,
            limit: Some(1),
        }));
        assert_eq!(by_query["tools"][0]["name"], "connect_sensor");
    }

    #[test]
    fn help_for_unknown_tool_suggests_alternatives() {
        let known = help("stream_scans");
        assert_ne!(known.is_error, Some(true));
        assert_eq!(text(&known)["name"], "stream_scans");

        let unknown = help("stop_viz");
        assert_eq!(unknown.is_error, Some(true));
        let body = text(&unknown);
        assert!(body["suggestions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s == "stop_visualization"));
    }
}
