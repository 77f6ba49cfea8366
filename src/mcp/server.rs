/// MCP Server setup using `rmcp` with stdio transport.
use anyhow::{Context, Result};
use rmcp::{ServiceExt, handler::server::router::Router, transport::io::stdio};
use tracing::info;

use crate::app::AppContext;
use crate::mcp::tools::AppTools;

/// MCP Server wrapping the context and serving via stdio.
#[derive(Clone)]
pub struct McpServer {
    pub ctx: AppContext,
}

impl McpServer {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Start the MCP server on stdio transport (blocks until the client disconnects).
    pub async fn start(self) -> Result<()> {
        info!("Starting MCP server on stdio...");
        let (stdin, stdout) = stdio();

        let app_tools = AppTools::new(self.ctx.clone());
        let router = Router::new(app_tools.clone()).with_tools(app_tools.tool_router.clone());

        let service = router
            .serve((stdin, stdout))
            .await
            .context("MCP server failed to start on stdio transport")?;
        service
            .waiting()
            .await
            .context("MCP server encountered an error during stdio transport")?;

        info!("MCP client disconnected");
        Ok(())
    }
}
