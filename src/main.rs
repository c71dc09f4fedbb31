//! Ouster lidar MCP server
//!
//! Runs the MCP server over stdin/stdout (default) or Streamable HTTP.
//! Sensor sessions and visualizer processes opened by clients are released
//! on exit, including on SIGINT/SIGTERM.

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::http::{header::ORIGIN, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use ouster_mcp::config::DEFAULT_OUSTER_CLI;
use ouster_mcp::{
    detect_inspector, LidarMcpServer, OusterHttpSdk, ServerConfig, ServerMode, Services,
};
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower_service::Service;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ouster-mcp", version, about = "MCP server for Ouster lidar sensors")]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,
    /// ouster-cli executable used for discovery and visualization
    #[arg(long, env = "OUSTER_CLI", default_value = DEFAULT_OUSTER_CLI, global = true)]
    ouster_cli: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MCP server over stdio (default)
    Serve,
    /// Run the MCP server over Streamable HTTP (SSE)
    ServeHttp(ServeHttpArgs),
}

#[derive(Args)]
struct ServeHttpArgs {
    /// Host to bind
    #[arg(long, env = "MCP_HOST", default_value = "localhost")]
    host: String,
    /// Port to bind
    #[arg(long, env = "MCP_PORT", default_value_t = 8080)]
    port: u16,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = 15)]
    sse_keep_alive_secs: u64,
    /// Use stateless mode (POST only; no sessions)
    #[arg(long)]
    stateless: bool,
    /// Allowed Origin values (comma-separated). Defaults to localhost only.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "http://localhost,http://127.0.0.1"
    )]
    allow_origin: Vec<String>,
}

#[derive(Clone)]
struct OriginCheckService<S> {
    inner: S,
    allowed_origins: Arc<HashSet<String>>,
}

impl<S> OriginCheckService<S> {
    fn new(inner: S, allowed_origins: Arc<HashSet<String>>) -> Self {
        Self {
            inner,
            allowed_origins,
        }
    }
}

impl<B, S> Service<Request<B>> for OriginCheckService<S>
where
    B: http_body::Body + Send + 'static,
    B::Error: std::fmt::Display,
    S: Service<
            Request<B>,
            Response = Response<BoxBody<Bytes, std::convert::Infallible>>,
            Error = std::convert::Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, std::convert::Infallible>>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let allowed_origins = self.allowed_origins.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            if let Some(origin) = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok()) {
                if !allowed_origins.contains(origin) {
                    warn!(origin, "Rejected request from disallowed origin");
                    let mut resp = Response::new(Full::new(Bytes::from("Forbidden")).boxed());
                    *resp.status_mut() = StatusCode::FORBIDDEN;
                    return Ok(resp);
                }
            }
            inner.call(req).await
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging goes to stderr (stdout is used for MCP protocol)
    let default_filter = if cli.debug {
        "ouster_mcp=debug"
    } else {
        "ouster_mcp=info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let config = ServerConfig::with_ouster_cli(&cli.ouster_cli);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let command = cli.command.unwrap_or(Command::Serve);
    let result = rt.block_on(serve(config, command));

    if let Err(e) = &result {
        error!("Server error: {e:#}");
    }
    info!("Server stopped");
    result
}

async fn serve(config: ServerConfig, command: Command) -> anyhow::Result<()> {
    let sdk = Arc::new(OusterHttpSdk::new(config.sensor_http_timeout)?);
    let services = Arc::new(Services::new(&config, sdk, detect_inspector()));

    let signal_services = services.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_services.shutdown.shutdown().await;
            }
            Err(e) => {
                error!(error = %e, "Shutdown signal handler failed; server will continue running");
            }
        }
    });

    let served = match command {
        Command::Serve => run_server(services.clone()).await,
        Command::ServeHttp(args) => run_server_http(services.clone(), args).await,
    };

    // No-op when a signal already triggered it.
    services.shutdown.shutdown().await;
    served
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn run_server(services: Arc<Services>) -> anyhow::Result<()> {
    info!("Starting Ouster MCP Server (stdio mode)");
    let cancel = services.shutdown.cancellation_token();
    let server = LidarMcpServer::new(services, ServerMode::Stdio);
    let mut service = Some(server.serve(stdio()).await?);
    info!("MCP server listening on stdio");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(mut running) = service.take() {
                    let _ = running.close().await?;
                }
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if let Some(running) = service.as_ref() {
                    if running.is_transport_closed() {
                        if let Some(running) = service.take() {
                            let _ = running.waiting().await?;
                        }
                        break;
                    }
                }
            }
        }
    }
    info!("MCP server shutting down");
    Ok(())
}

async fn run_server_http(services: Arc<Services>, args: ServeHttpArgs) -> anyhow::Result<()> {
    info!("Starting Ouster MCP Server (streamable HTTP mode)");

    let cancel = services.shutdown.cancellation_token();
    let config = StreamableHttpServerConfig {
        sse_keep_alive: if args.sse_keep_alive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(args.sse_keep_alive_secs))
        },
        sse_retry: None,
        stateful_mode: !args.stateless,
        cancellation_token: cancel.child_token(),
    };

    let factory_services = services.clone();
    let service = StreamableHttpService::new(
        move || Ok(LidarMcpServer::new(factory_services.clone(), ServerMode::Http)),
        Arc::new(LocalSessionManager::default()),
        config,
    );
    let allowed_origins: HashSet<String> = args
        .allow_origin
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let service = OriginCheckService::new(service, Arc::new(allowed_origins));

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .map_err(|e| anyhow::anyhow!("bind {}:{} failed: {e}", args.host, args.port))?;
    info!(
        "MCP HTTP server listening on http://{}",
        listener.local_addr()?
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        TowerToHyperService::new(svc),
                    );
                    if let Err(err) = conn.await {
                        error!(%peer, "http connection error: {err}");
                    }
                });
            }
        }
    }
    Ok(())
}
