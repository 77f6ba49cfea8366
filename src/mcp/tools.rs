/// MCP Tool handlers for pagerag.
///
/// 1. search_page  – fetch a URL, index it, and search it
/// 2. index_text   – index raw text under a namespace
/// 3. query_index  – search an indexed namespace
/// 4. delete_index – drop a namespace
/// 5. index_stats  – entry counts per namespace
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::app::{AppContext, AppError};
use crate::error::ErrorKind;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct SearchPageParams {
    /// Web page URL (http or https)
    url: String,
    /// Search query (natural language, at most 500 characters)
    query: String,
    /// Max results (default: 5)
    top_k: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct IndexTextParams {
    /// Namespace to store the text under; replaces its previous content
    namespace: String,
    /// Raw text to chunk and index
    text: String,
}

#[derive(Deserialize, JsonSchema)]
struct QueryParams {
    /// Namespace to search
    namespace: String,
    /// Search query (natural language)
    query: String,
    /// Max results (default: 5)
    top_k: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct NamespaceParam {
    /// Namespace to operate on
    namespace: String,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("failed to encode result: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

/// Caller mistakes become tool errors; everything else is a protocol error.
fn app_error(err: AppError) -> Result<CallToolResult, McpError> {
    match err.kind() {
        Some(ErrorKind::InvalidInput | ErrorKind::Busy) => error_result(&err.to_string()),
        None if matches!(err, AppError::Page(_)) => error_result(&err.to_string()),
        _ => Err(McpError::internal_error(err.to_string(), None)),
    }
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: AppContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Fetch a web page, index its text, and return the chunks most relevant to the query with similarity scores"
    )]
    async fn search_page(
        &self,
        params: Parameters<SearchPageParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.url.is_empty() {
            return error_result("url is required");
        }

        match self.ctx.search_page(&p.url, &p.query, p.top_k).await {
            Ok(response) => json_result(&response),
            Err(e) => app_error(e),
        }
    }

    #[tool(description = "Index raw text under a namespace, replacing anything indexed there before")]
    async fn index_text(
        &self,
        params: Parameters<IndexTextParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.namespace.is_empty() {
            return error_result("namespace is required");
        }

        match self.ctx.index_text(&p.namespace, p.text).await {
            Ok(response) => json_result(&response),
            Err(e) => app_error(e),
        }
    }

    #[tool(description = "Semantic search over a previously indexed namespace")]
    async fn query_index(&self, params: Parameters<QueryParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self.ctx.query(&p.namespace, &p.query, p.top_k).await {
            Ok(response) => json_result(&response),
            Err(e) => app_error(e),
        }
    }

    #[tool(description = "Delete every indexed chunk of a namespace")]
    async fn delete_index(
        &self,
        params: Parameters<NamespaceParam>,
    ) -> Result<CallToolResult, McpError> {
        match self.ctx.delete(&params.0.namespace).await {
            Ok(response) => json_result(&response),
            Err(e) => app_error(e),
        }
    }

    #[tool(description = "Show index backend, dimensions, and chunk counts per namespace")]
    async fn index_stats(&self) -> Result<CallToolResult, McpError> {
        match self.ctx.stats().await {
            Ok(stats) => json_result(&stats),
            Err(e) => app_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::context;
    use crate::error::Error;

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_index_then_query_tools() {
        let tools = AppTools::new(context(8, 2));

        let indexed = tools
            .index_text(Parameters(IndexTextParams {
                namespace: "doc".to_string(),
                text: "alpha beta gamma delta".to_string(),
            }))
            .await
            .unwrap();
        assert_ne!(indexed.is_error, Some(true));
        let body: serde_json::Value = serde_json::from_str(&text_of(&indexed)).unwrap();
        assert_eq!(body["total_chunks"], 1);

        let found = tools
            .query_index(Parameters(QueryParams {
                namespace: "doc".to_string(),
                query: "gamma".to_string(),
                top_k: None,
            }))
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&text_of(&found)).unwrap();
        assert_eq!(body["results"][0]["text"], "alpha beta gamma delta");

        let stats = tools.index_stats().await.unwrap();
        let body: serde_json::Value = serde_json::from_str(&text_of(&stats)).unwrap();
        assert_eq!(body["namespaces"]["doc"], 1);

        let deleted = tools
            .delete_index(Parameters(NamespaceParam {
                namespace: "doc".to_string(),
            }))
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&text_of(&deleted)).unwrap();
        assert_eq!(body["deleted"], true);
    }

    #[tokio::test]
    async fn test_invalid_input_is_tool_error() {
        let tools = AppTools::new(context(8, 2));
        let result = tools
            .query_index(Parameters(QueryParams {
                namespace: "doc".to_string(),
                query: "gamma".to_string(),
                top_k: Some(0),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));

        let result = tools
            .search_page(Parameters(SearchPageParams {
                url: "not a url".to_string(),
                query: "gamma".to_string(),
                top_k: None,
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[test]
    fn test_backend_failure_is_protocol_error() {
        let err = AppError::Core(Error::BackendUnavailable("db".into()));
        assert!(app_error(err).is_err());
    }

    #[test]
    fn test_tool_router_lists_all_tools() {
        let tools = AppTools::tool_router().list_all();
        let mut names: Vec<String> = tools.iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["delete_index", "index_stats", "index_text", "query_index", "search_page"]
        );
    }
}
