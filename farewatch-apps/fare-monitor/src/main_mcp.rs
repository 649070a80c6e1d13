//!  Farewatch Fare Monitor
//!
//!  Copyright (C) 2026  The Farewatch developers
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # MCP Server Entry Point
//!
//! Search, history and price-alert tools over stdio or streamable HTTP.
//! The alert scheduler runs in the background for the life of the server.

use anyhow::{Context, Error, Result};
use clap::{Parser, Subcommand};
use farewatch_fare_monitor::config::ConfigArgs;
use farewatch_fare_monitor::{
    Channel, FareMonitor, MonitorConfig, Passengers, RawQuery, RawSegment, SearchError,
};
use rmcp::handler::server::{ServerHandler, tool::ToolRouter, wrapper::Parameters};
use rmcp::service::serve_server;
use rmcp::tool;
use rmcp::tool_router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "farewatch-mcp")]
#[command(author, version, about = "MCP server for flight fare search and price alerts")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run MCP server over stdio
    Stdio,

    /// Run MCP server over HTTP
    Http {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

fn default_adults() -> u32 {
    1
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct FlightsInput {
    pub origin: String,
    pub destination: String,
    pub depart_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_type: Option<String>,
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cabin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stops: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl FlightsInput {
    fn raw_query(self) -> RawQuery {
        RawQuery {
            origin: self.origin,
            destination: self.destination,
            depart_date: self.depart_date,
            return_date: self.return_date,
            passengers: passengers(self.adults, self.children),
            cabin: self.cabin,
            trip_type: self.trip_type,
            segments: Vec::new(),
            max_stops: self.max_stops,
            currency: self.currency,
        }
    }
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct LegInput {
    pub origin: String,
    pub destination: String,
    pub date: String,
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct MultiCityInput {
    pub segments: Vec<LegInput>,
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cabin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stops: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct AlertInput {
    /// Leave empty for multi-city alerts.
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub depart_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_type: Option<String>,
    #[serde(default)]
    pub segments: Vec<LegInput>,
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cabin: Option<String>,
    pub target_price: f64,
    pub currency: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub webhook_urls: Vec<String>,
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct IdInput {
    pub id: String,
}

#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct WebhookInput {
    pub url: String,
}

fn passengers(adults: u32, children: u32) -> Passengers {
    Passengers {
        children,
        ..Passengers::adults(adults)
    }
}

fn legs(input: Vec<LegInput>) -> Vec<RawSegment> {
    input
        .into_iter()
        .map(|l| RawSegment {
            origin: l.origin,
            destination: l.destination,
            date: l.date,
        })
        .collect()
}

/// Structured failure the client can act on.
fn search_error(e: SearchError) -> String {
    let mut body = serde_json::json!({
        "error": e.code(),
        "status": e.status().as_u16(),
        "message": e.to_string(),
    });
    match &e {
        SearchError::Invalid(invalid) => body["reason"] = serde_json::json!(invalid.reason),
        SearchError::AllSegmentsFailed(failures) => body["segments"] = serde_json::json!(failures),
        _ => {}
    }
    body.to_string()
}

#[derive(Clone)]
pub struct FareMonitorServer {
    monitor: Arc<FareMonitor>,
    tool_router: ToolRouter<Self>,
}

impl FareMonitorServer {
    pub fn new(monitor: Arc<FareMonitor>) -> Self {
        Self {
            monitor,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl FareMonitorServer {
    #[tool(
        name = "search_flights",
        description = "Search flight fares. Parameters: origin and destination (airport code, city name, or 'City (CODE)'), depart_date (YYYY-MM-DD, today, tomorrow, weekend, +N days, in N days, month name), return_date (round trips), trip_type (one-way/round-trip), adults, children, cabin (economy/premium_economy/business/first), max_stops (0-2), currency (e.g. SEK)."
    )]
    async fn search_flights(&self, params: Parameters<FlightsInput>) -> Result<String, String> {
        let raw = params.0.raw_query();
        let result = self.monitor.search(&raw).await.map_err(search_error)?;
        serde_json::to_string(&result).map_err(|e| e.to_string())
    }

    #[tool(
        name = "search_multi_city",
        description = "Search a multi-city itinerary of 2 to 5 legs, each with origin, destination and date. Legs are searched independently; failed legs are reported alongside the legs that succeeded, with a zero-based index and a one-based leg number."
    )]
    async fn search_multi_city(&self, params: Parameters<MultiCityInput>) -> Result<String, String> {
        let input = params.0;
        let raw = RawQuery {
            passengers: passengers(input.adults, input.children),
            cabin: input.cabin,
            trip_type: Some("multi-city".to_string()),
            segments: legs(input.segments),
            max_stops: input.max_stops,
            currency: input.currency,
            ..RawQuery::default()
        };
        let outcome = self.monitor.search_multi_city(&raw).await.map_err(search_error)?;
        serde_json::to_string(&outcome).map_err(|e| e.to_string())
    }

    #[tool(
        name = "get_search",
        description = "Fetch a previous search result by its search id."
    )]
    async fn get_search(&self, params: Parameters<IdInput>) -> Result<String, String> {
        let result = self.monitor.get_search(&params.0.id).await.map_err(search_error)?;
        serde_json::to_string(&result).map_err(|e| e.to_string())
    }

    #[tool(
        name = "create_alert",
        description = "Watch a route and notify when the lowest fare is at or below target_price. Route fields as in search_flights, or segments for multi-city. currency is one of SEK/USD/EUR/GBP. Notify via emails and/or webhook_urls (http or https)."
    )]
    async fn create_alert(&self, params: Parameters<AlertInput>) -> Result<String, String> {
        let input = params.0;
        let raw = RawQuery {
            origin: input.origin,
            destination: input.destination,
            depart_date: input.depart_date,
            return_date: input.return_date,
            passengers: Passengers::adults(input.adults),
            cabin: input.cabin,
            trip_type: input.trip_type,
            segments: legs(input.segments),
            max_stops: None,
            currency: None,
        };
        let recipients = input
            .emails
            .into_iter()
            .map(|e| (Channel::Email, e))
            .chain(input.webhook_urls.into_iter().map(|u| (Channel::Webhook, u)))
            .collect();
        let alert = self
            .monitor
            .create_alert(&raw, input.target_price, &input.currency, recipients)
            .await
            .map_err(search_error)?;
        serde_json::to_string(&alert).map_err(|e| e.to_string())
    }

    #[tool(name = "list_alerts", description = "List every price alert with its current status.")]
    async fn list_alerts(&self) -> Result<String, String> {
        let alerts = self.monitor.list_alerts().await;
        serde_json::to_string(&alerts).map_err(|e| e.to_string())
    }

    #[tool(
        name = "deactivate_alert",
        description = "Stop watching an alert. The alert is kept, with status 'deactivated'."
    )]
    async fn deactivate_alert(&self, params: Parameters<IdInput>) -> Result<String, String> {
        let alert = self
            .monitor
            .deactivate_alert(&params.0.id)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_string(&alert).map_err(|e| e.to_string())
    }

    #[tool(
        name = "register_webhook",
        description = "Register an http(s) URL to receive a 'flight_search_completed' JSON event after every successful search, with up to 10 cheapest flights."
    )]
    async fn register_webhook(&self, params: Parameters<WebhookInput>) -> Result<String, String> {
        let url = params.0.url;
        let added = self.monitor.register_webhook(&url).await.map_err(search_error)?;
        Ok(serde_json::json!({ "url": url.trim(), "registered": added }).to_string())
    }

    #[tool(name = "unregister_webhook", description = "Stop sending search events to a registered URL.")]
    async fn unregister_webhook(&self, params: Parameters<WebhookInput>) -> Result<String, String> {
        let url = params.0.url;
        let removed = self.monitor.unregister_webhook(&url).await;
        Ok(serde_json::json!({ "url": url.trim(), "removed": removed }).to_string())
    }

    #[tool(name = "list_webhooks", description = "List the URLs receiving search events.")]
    async fn list_webhooks(&self) -> Result<String, String> {
        let urls = self.monitor.list_webhooks().await;
        serde_json::to_string(&urls).map_err(|e| e.to_string())
    }
}

impl ServerHandler for FareMonitorServer {
    fn list_tools(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl Future<Output = Result<rmcp::model::ListToolsResult, rmcp::ErrorData>> + Send + '_
    {
        Box::pin(async move {
            let tools = self.tool_router.list_all();
            tracing::debug!("Returning {} tools", tools.len());
            Ok(rmcp::model::ListToolsResult::with_all_items(tools))
        })
    }

    fn call_tool(
        &self,
        request: rmcp::model::CallToolRequestParam,
        context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl Future<Output = Result<rmcp::model::CallToolResult, rmcp::ErrorData>> + Send + '_
    {
        let router = self.tool_router.clone();
        let self_clone = self.clone();
        Box::pin(async move {
            tracing::debug!(tool = %request.name, "call_tool");
            let context =
                rmcp::handler::server::tool::ToolCallContext::new(&self_clone, request, context);
            router.call(context).await
        })
    }

    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2025_03_26,
            capabilities: rmcp::model::ServerCapabilities {
                tools: Some(rmcp::model::ToolsCapability::default()),
                ..Default::default()
            },
            server_info: rmcp::model::Implementation::from_build_env(),
            instructions: Some(
                "Flight fare search with caching, and price alerts checked in the background."
                    .to_string(),
            ),
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutting down");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".to_string().into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_writer(std::io::stderr),
        )
        .init();

    let args = Args::parse();
    tracing::debug!("Parsed args: {:?}", args);

    let config: MonitorConfig = args.config.into();
    let monitor = Arc::new(
        FareMonitor::start(config)
            .await
            .context("Failed to start fare monitor")?,
    );

    let cancel = CancellationToken::new();
    let scheduler = Arc::clone(monitor.scheduler()).spawn(cancel.clone());

    match args.command {
        Command::Stdio => {
            eprintln!("Starting MCP server over stdio...");
            let server = FareMonitorServer::new(Arc::clone(&monitor));
            let (stdin, stdout) = rmcp::transport::io::stdio();
            let _running = serve_server(Arc::new(server), (stdin, stdout))
                .await
                .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;
            tracing::debug!("Server running. Press Ctrl+C to stop.");
            shutdown_signal(cancel.clone()).await;
        }
        Command::Http { host, port } => {
            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .context("Invalid host:port")?;
            tracing::info!("Starting MCP server over HTTP on {}", addr);
            let server = FareMonitorServer::new(Arc::clone(&monitor));
            let session_manager = Arc::new(LocalSessionManager::default());
            let config = StreamableHttpServerConfig {
                stateful_mode: true,
                ..Default::default()
            };
            let service =
                StreamableHttpService::new(move || Ok(server.clone()), session_manager, config);
            let app = axum::Router::new().nest_service("/mcp", service);
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .context("Failed to bind to address")?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(cancel.clone()))
                .await
                .context("HTTP server error")?;
        }
    }

    cancel.cancel();
    if let Err(e) = scheduler.await {
        tracing::error!("Alert scheduler task failed: {}", e);
    }
    monitor.flush().await;
    Ok(())
}
