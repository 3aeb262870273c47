//! Documentation tools: `docs.markdown`.

use async_trait::async_trait;
use serde_json::json;

use crate::params::{opt_bool, require_str};
use crate::{FabricTool, ToolDescriptor, ToolOutcome};

pub struct MarkdownTool {
    descriptor: ToolDescriptor,
}

impl MarkdownTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("docs.markdown", "Process markdown")
                .with_capability(
                    "process",
                    "markdown_process",
                    "Convert markdown to simple HTML and extract the heading outline",
                    json!({
                        "type": "object",
                        "properties": {
                            "markdown": { "type": "string" },
                            "extract_toc": { "type": "boolean" }
                        },
                        "required": ["markdown"]
                    }),
                ),
        }
    }
}

impl Default for MarkdownTool {
    fn default() -> Self {
        Self::new()
    }
}

fn anchor_for(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect::<String>()
        .trim()
        .to_lowercase()
        .replace(' ', "-")
}

fn headings(markdown: &str) -> Vec<serde_json::Value> {
    let heading_re = regex::Regex::new(r"(?m)^(#{1,6})\s+(.+)$").expect("static regex");
    heading_re
        .captures_iter(markdown)
        .map(|caps| {
            let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
            let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            json!({
                "level": level,
                "title": title,
                "anchor": anchor_for(title),
            })
        })
        .collect()
}

/// Deliberately small markdown-to-HTML conversion: headings, emphasis,
/// inline code, links, and paragraph breaks.
fn to_html(markdown: &str) -> String {
    let mut html = markdown.to_string();
    for level in (1..=6).rev() {
        let re = regex::Regex::new(&format!(r"(?m)^#{{{level}}}\s+(.+)$")).expect("static regex");
        html = re
            .replace_all(&html, format!("<h{level}>$1</h{level}>"))
            .to_string();
    }
    let bold_italic = regex::Regex::new(r"\*\*\*(.+?)\*\*\*").expect("static regex");
    html = bold_italic.replace_all(&html, "<b><i>$1</i></b>").to_string();
    let bold = regex::Regex::new(r"\*\*(.+?)\*\*").expect("static regex");
    html = bold.replace_all(&html, "<b>$1</b>").to_string();
    let italic = regex::Regex::new(r"\*(.+?)\*").expect("static regex");
    html = italic.replace_all(&html, "<i>$1</i>").to_string();
    let code = regex::Regex::new(r"`([^`]+)`").expect("static regex");
    html = code.replace_all(&html, "<code>$1</code>").to_string();
    let link = regex::Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("static regex");
    html = link.replace_all(&html, r#"<a href="$2">$1</a>"#).to_string();
    format!("<p>{}</p>", html.replace("\n\n", "</p><p>"))
}

#[async_trait]
impl FabricTool for MarkdownTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let markdown = require_str(&params, "markdown")?;
        let extract_toc = opt_bool(&params, "extract_toc", true);

        let headings = headings(markdown);
        let heading_count = headings.len();
        let mut result = json!({
            "html": to_html(markdown),
            "headings": headings,
            "heading_count": heading_count,
        });
        if extract_toc {
            result["toc"] = result["headings"].clone();
        }
        Ok(result)
    }
}
