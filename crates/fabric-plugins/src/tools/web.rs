//! Web tools: `web.http_request`, `web.fetch_page`, `web.parse_url`,
//! `web.brave_search`.

use async_trait::async_trait;
use serde_json::json;
use std::time::{Duration, Instant};
use url::Url;

use crate::params::{opt_bool, opt_str, opt_u64, require_str};
use crate::{FabricTool, ToolDescriptor, ToolError, ToolOutcome};

const MAX_BODY: usize = 100_000;

pub struct HttpRequestTool {
    descriptor: ToolDescriptor,
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("web.http_request", "Make an HTTP request")
                .with_capability(
                    "request",
                    "request",
                    "Send an HTTP request and return status, headers, and body",
                    json!({
                        "type": "object",
                        "properties": {
                            "url": { "type": "string" },
                            "method": { "type": "string" },
                            "headers": { "type": "object" },
                            "body": { "type": "string" },
                            "timeout": { "type": "integer", "description": "milliseconds" }
                        },
                        "required": ["url"]
                    }),
                ),
            client,
        }
    }
}

#[async_trait]
impl FabricTool for HttpRequestTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let url = require_str(&params, "url")?;
        let method = opt_str(&params, "method").unwrap_or("GET").to_uppercase();
        let timeout_ms = opt_u64(&params, "timeout", 30_000);

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ToolError::new("INVALID_METHOD", format!("Invalid method: {method}")))?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(Duration::from_millis(timeout_ms));

        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }
        if let Some(body) = opt_str(&params, "body") {
            if method == reqwest::Method::POST
                || method == reqwest::Method::PUT
                || method == reqwest::Method::PATCH
            {
                request = request.body(body.to_string());
            }
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::new("TIMEOUT", format!("Request timed out after {timeout_ms}ms"))
            } else {
                ToolError::new("REQUEST_ERROR", e.to_string())
            }
        })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: serde_json::Map<String, serde_json::Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    json!(v.to_str().unwrap_or_default()),
                )
            })
            .collect();
        let mut body = response
            .text()
            .await
            .map_err(|e| ToolError::new("REQUEST_ERROR", e.to_string()))?;
        body.truncate(MAX_BODY);

        Ok(json!({
            "status_code": status_code,
            "headers": headers,
            "body": body,
            "elapsed_ms": elapsed_ms,
            "url": final_url,
        }))
    }
}

pub struct FetchPageTool {
    descriptor: ToolDescriptor,
    client: reqwest::Client,
}

impl FetchPageTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("web.fetch_page", "Fetch and extract page content")
                .with_capability(
                    "fetch",
                    "fetch",
                    "Fetch a page, extracting title, links, and visible text",
                    json!({
                        "type": "object",
                        "properties": {
                            "url": { "type": "string" },
                            "extract_text": { "type": "boolean" },
                            "max_length": { "type": "integer" }
                        },
                        "required": ["url"]
                    }),
                ),
            client,
        }
    }
}

/// Strip tags and collapse whitespace; script/style/nav blocks are removed
/// wholesale first.
fn visible_text(html: &str, max_length: usize) -> String {
    let block_re =
        regex::Regex::new(r"(?is)<(script|style|nav|footer|header)\b.*?</(script|style|nav|footer|header)>")
            .expect("static regex");
    let tag_re = regex::Regex::new(r"(?s)<[^>]+>").expect("static regex");
    let space_re = regex::Regex::new(r"\s+").expect("static regex");

    let stripped = block_re.replace_all(html, " ");
    let stripped = tag_re.replace_all(&stripped, " ");
    let collapsed = space_re.replace_all(&stripped, " ");
    let trimmed = collapsed.trim();
    trimmed.chars().take(max_length).collect()
}

#[async_trait]
impl FabricTool for FetchPageTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let url = require_str(&params, "url")?;
        let extract_text = opt_bool(&params, "extract_text", true);
        let max_length = opt_u64(&params, "max_length", 50_000) as usize;

        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ToolError::new("FETCH_ERROR", e.to_string()))?;

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let html = response
            .text()
            .await
            .map_err(|e| ToolError::new("FETCH_ERROR", e.to_string()))?;

        let title_re = regex::Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex");
        let title = title_re
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());

        let link_re = regex::Regex::new(r#"href=["'](https?://[^"']+)["']"#).expect("static regex");
        let mut links: Vec<String> = link_re
            .captures_iter(&html)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        links.sort();
        links.dedup();
        links.truncate(50);

        let mut result = json!({
            "title": title,
            "url": final_url,
            "links": links,
            "metadata": {
                "content_type": content_type,
                "length": html.len(),
            },
        });
        if extract_text {
            result["text"] = json!(visible_text(&html, max_length));
        }
        Ok(result)
    }
}

pub struct ParseUrlTool {
    descriptor: ToolDescriptor,
}

impl ParseUrlTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("web.parse_url", "Parse a URL into components")
                .with_capability(
                    "parse_url",
                    "parse_url",
                    "Split a URL into scheme, host, port, path, query, and fragment",
                    json!({
                        "type": "object",
                        "properties": { "url": { "type": "string" } },
                        "required": ["url"]
                    }),
                ),
        }
    }
}

impl Default for ParseUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricTool for ParseUrlTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let raw = require_str(&params, "url")?;
        let url = Url::parse(raw)
            .map_err(|e| ToolError::new("INVALID_URL", format!("Cannot parse '{raw}': {e}")))?;

        let query: serde_json::Map<String, serde_json::Value> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();

        Ok(json!({
            "scheme": url.scheme(),
            "host": url.host_str(),
            "port": url.port_or_known_default(),
            "path": url.path(),
            "query": query,
            "fragment": url.fragment(),
        }))
    }
}

pub struct BraveSearchTool {
    descriptor: ToolDescriptor,
    client: reqwest::Client,
    api_key: Option<String>,
}

impl BraveSearchTool {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("web.brave_search", "Web search via Brave")
                .with_capability(
                    "search",
                    "brave_search",
                    "Search the web; requires a configured Brave API key",
                    json!({
                        "type": "object",
                        "properties": {
                            "query": { "type": "string" },
                            "count": { "type": "integer" }
                        },
                        "required": ["query"]
                    }),
                ),
            client,
            api_key,
        }
    }
}

#[async_trait]
impl FabricTool for BraveSearchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let query = require_str(&params, "query")?;
        let count = opt_u64(&params, "count", 10).min(20);
        let Some(api_key) = &self.api_key else {
            return Err(ToolError::new(
                "NO_API_KEY",
                "web.brave_search requires a configured API key",
            ));
        };

        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", &count.to_string())])
            .header("X-Subscription-Token", api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| ToolError::new("SEARCH_ERROR", e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::new(
                "SEARCH_ERROR",
                format!("Search API returned HTTP {}", response.status().as_u16()),
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::new("SEARCH_ERROR", e.to_string()))?;

        let results: Vec<serde_json::Value> = body
            .pointer("/web/results")
            .and_then(|v| v.as_array())
            .map(|results| {
                results
                    .iter()
                    .map(|r| {
                        json!({
                            "title": r.get("title"),
                            "url": r.get("url"),
                            "description": r.get("description"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "query": query,
            "results": results,
            "count": results.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parse_url_components() {
        let tool = ParseUrlTool::new();
        let out = tool
            .execute(
                "parse_url",
                json!({ "url": "https://example.com:8443/a/b?x=1&y=two#frag" }),
            )
            .await
            .unwrap();
        assert_eq!(out["scheme"], "https");
        assert_eq!(out["host"], "example.com");
        assert_eq!(out["port"], 8443);
        assert_eq!(out["path"], "/a/b");
        assert_eq!(out["query"]["x"], "1");
        assert_eq!(out["query"]["y"], "two");
        assert_eq!(out["fragment"], "frag");
    }

    #[tokio::test]
    async fn parse_url_rejects_garbage() {
        let tool = ParseUrlTool::new();
        let err = tool
            .execute("parse_url", json!({ "url": "not a url" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_URL");
    }

    #[test]
    fn visible_text_strips_markup() {
        let html = r#"<html><head><script>evil()</script><title>T</title></head>
            <body><p>Hello <b>world</b></p><style>.x{}</style></body></html>"#;
        let text = visible_text(html, 100);
        assert!(text.contains("Hello world"));
        assert!(!text.contains("evil"));
    }

    #[tokio::test]
    async fn brave_search_without_key_fails_cleanly() {
        let tool = BraveSearchTool::new(reqwest::Client::new(), None);
        let err = tool
            .execute("search", json!({ "query": "rust" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, "NO_API_KEY");
    }

    #[tokio::test]
    async fn http_request_rejects_bad_method() {
        let tool = HttpRequestTool::new(reqwest::Client::new());
        let err = tool
            .execute(
                "request",
                json!({ "url": "http://localhost:1", "method": "NOT A METHOD" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_METHOD");
    }
}
