use std::{path::PathBuf, sync::Arc};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::{
    catalog::FileRecord,
    error::{self, Error},
    library::Library,
    search::SearchHit,
};

const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Clone)]
pub struct DocshelfMcpServer {
    library: Arc<Library>,
    tool_router: ToolRouter<Self>,
}

impl DocshelfMcpServer {
    pub fn new(library: Arc<Library>) -> Self {
        Self {
            library,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocshelfMcpServer {
    /// Rank stored files by how many of the query's word stems they carry.
    #[tool(
        name = "docshelf_search",
        description = "Search stored documents. Query and document words are reduced to stems (\"happiness\" -> \"happi\"); files are ranked by how many query stems appear among their tags."
    )]
    pub async fn docshelf_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let limit = if params.all.unwrap_or(false) {
            None
        } else {
            Some(params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        };

        let hits = match self.library.search(&params.query, limit) {
            Ok(hits) => hits,
            Err(e) => return tool_failure("search failed", e),
        };

        let summary = format_search_summary(&hits, &params.query);
        let structured = serde_json::to_value(SearchResponse {
            query: params.query,
            result_count: hits.len(),
            results: hits,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        Ok(tool_success(summary, structured))
    }

    /// Show one stored file with its tags.
    #[tool(
        name = "docshelf_get",
        description = "Show a stored document's record and tags by id."
    )]
    pub async fn docshelf_get(
        &self,
        params: Parameters<FileIdParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let details = match self.library.handle_view(params.0.id) {
            Ok(details) => details,
            Err(e) => return tool_failure("lookup failed", e),
        };

        let summary = format!(
            "{}\n{}\ntags (stems): {}",
            format_file(&details.file),
            details.file.content_hash,
            if details.tags.is_empty() {
                "(none)".to_string()
            } else {
                details.tags.join(", ")
            }
        );
        let structured = serde_json::to_value(&details)
            .map_err(|e| mcp_error("failed to serialize file", e))?;

        Ok(tool_success(summary, structured))
    }

    /// Upload a local file.
    #[tool(
        name = "docshelf_upload",
        description = "Store a local PDF, Word, or image file. Its text is extracted and turned into search tags."
    )]
    pub async fn docshelf_upload(
        &self,
        params: Parameters<UploadParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let name = params.name.clone().or_else(|| {
            params
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        });
        let Some(name) = name else {
            return tool_failure(
                "upload failed",
                Error::InvalidName(params.path.display().to_string()),
            );
        };

        let reader = match std::fs::File::open(&params.path) {
            Ok(reader) => reader,
            Err(e) => {
                return Ok(tool_error(
                    "not-found",
                    format!("cannot read {}: {e}", params.path.display()),
                ));
            }
        };

        let file = match self.library.handle_upload(&name, reader) {
            Ok(file) => file,
            Err(e) => return tool_failure("upload failed", e),
        };
        let details = match self.library.handle_view(file.id) {
            Ok(details) => details,
            Err(e) => return tool_failure("upload failed", e),
        };

        let summary = format!(
            "Stored {} with {} tag{}",
            format_file(&details.file),
            details.tags.len(),
            if details.tags.len() == 1 { "" } else { "s" }
        );
        let structured = serde_json::to_value(&details)
            .map_err(|e| mcp_error("failed to serialize file", e))?;

        Ok(tool_success(summary, structured))
    }

    /// Rename a stored file, keeping its extension.
    #[tool(
        name = "docshelf_rename",
        description = "Rename a stored document. Give the new name without extension; the extension is kept."
    )]
    pub async fn docshelf_rename(
        &self,
        params: Parameters<RenameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let new_name =
            match self.library.handle_rename(params.id, &params.new_name) {
                Ok(new_name) => new_name,
                Err(e) => return tool_failure("rename failed", e),
            };

        Ok(tool_success(
            format!("Renamed #{} to {new_name}", params.id),
            json!({ "id": params.id, "newName": new_name }),
        ))
    }

    /// Delete a stored file and its bytes.
    #[tool(
        name = "docshelf_delete",
        description = "Delete a stored document by id, removing its record, tag associations and bytes."
    )]
    pub async fn docshelf_delete(
        &self,
        params: Parameters<FileIdParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let report = match self.library.handle_delete(params.0.id) {
            Ok(report) => report,
            Err(e) => return tool_failure("delete failed", e),
        };

        let summary = format!("Deleted {}", format_file(&report.file));
        let structured = serde_json::to_value(&report)
            .map_err(|e| mcp_error("failed to serialize delete report", e))?;

        Ok(tool_success(summary, structured))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocshelfMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docshelf", env!("CARGO_PKG_VERSION"))
                    .with_title("docshelf MCP"),
            )
            .with_instructions(
                "Use docshelf_search to find stored documents by word stem, then docshelf_get with a result id for details.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
    /// Return every matching file.
    pub all: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileIdParams {
    /// File id, as reported by docshelf_search.
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    /// Path of the file to upload.
    pub path: PathBuf,
    /// Name to store the file under (default: the path's file name).
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameParams {
    /// File id.
    pub id: u64,
    /// New name without extension.
    pub new_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchHit>,
}

fn format_file(file: &FileRecord) -> String {
    format!("#{} {}", file.id, file.display_name)
}

fn format_search_summary(hits: &[SearchHit], query: &str) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(hits.len() + 1);
    let suffix = if hits.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        hits.len(),
        suffix
    ));

    for hit in hits {
        lines.push(format!(
            "{} (stems: {})",
            format_file(&hit.file),
            hit.matched_tags.join(", ")
        ));
    }

    lines.join("\n")
}

fn tool_success(
    summary: String,
    structured: serde_json::Value,
) -> CallToolResult {
    let mut result = CallToolResult::success(vec![Content::text(summary)]);
    result.structured_content = Some(structured);
    result
}

fn tool_error(code: &str, message: String) -> CallToolResult {
    let mut result = CallToolResult::error(vec![Content::text(message.clone())]);
    result.structured_content = Some(json!({ "error": code, "message": message }));
    result
}

/// Report errors in a tool call the caller can act on as a tool error, and
/// everything else as a protocol error.
fn tool_failure(
    context: &str,
    error: Error,
) -> Result<CallToolResult, rmcp::ErrorData> {
    if error.code() == "failure" {
        warn!(error = %error, "{context}");
        return Err(mcp_error(context, error));
    }
    Ok(tool_error(error.code(), error.to_string()))
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(library: Library) -> error::Result<()> {
    let server = DocshelfMcpServer::new(Arc::new(library));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            Error::Config(format!("MCP server initialization failed: {e}"))
        })?;
        running
            .waiting()
            .await
            .map_err(|e| Error::Config(format!("MCP server error: {e}")))?;
        Ok(())
    })
}
