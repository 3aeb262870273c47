//! Local line-delimited JSON front.
//!
//! Reads `{id?, name, arguments}` objects, one per line, from stdin and
//! writes one response envelope per line to stdout (`id` echoed when the
//! request carried one). No authentication: the caller shares the process.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use fabric_kernel::error::FabricError;
use fabric_kernel::trace::TraceContext;
use fabric_kernel::wire::WireResponse;

use crate::pipeline::{Credential, FabricPipeline};

async fn handle_line(pipeline: &FabricPipeline, line: &str) -> serde_json::Value {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(line);
    let request = match parsed {
        Ok(request) => request,
        Err(e) => {
            let err = FabricError::bad_input(format!("malformed request: {e}"));
            return serde_json::to_value(WireResponse::failure(TraceContext::root(), &err))
                .unwrap_or_default();
        }
    };

    let id = request.get("id").cloned();
    let name = request.get("name").and_then(|v| v.as_str());
    let arguments = request
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let response = match name {
        Some(name) => pipeline.handle(name, arguments, Credential::Local).await,
        None => {
            let err = FabricError::bad_input("'name' is required");
            WireResponse::failure(TraceContext::from_arguments(&arguments), &err)
        }
    };

    let mut body = serde_json::to_value(&response).unwrap_or_default();
    if let (Some(obj), Some(id)) = (body.as_object_mut(), id) {
        obj.insert("id".to_string(), id);
    }
    body
}

/// Run the stdio front until stdin closes.
pub async fn serve(pipeline: Arc<FabricPipeline>) -> std::io::Result<()> {
    info!("fabric gateway serving on stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let body = handle_line(&pipeline, line).await;
        let mut serialized = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
        serialized.push('\n');
        stdout.write_all(serialized.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
