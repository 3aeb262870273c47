//! Data tools: `data.json`, `data.csv`, `data.validate`.

use async_trait::async_trait;
use serde_json::json;

use crate::params::{opt_bool, opt_str, require_str};
use crate::{FabricTool, ToolDescriptor, ToolError, ToolOutcome};

pub struct JsonTool {
    descriptor: ToolDescriptor,
}

impl JsonTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("data.json", "Parse and query JSON")
                .with_capability(
                    "parse",
                    "parse",
                    "Parse a JSON string, optionally selecting a value with a $.a.b.0 path",
                    json!({
                        "type": "object",
                        "properties": {
                            "json_str": { "type": "string" },
                            "query": { "type": "string" }
                        },
                        "required": ["json_str"]
                    }),
                ),
        }
    }
}

impl Default for JsonTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Dotted-path selection: `$.a.b.0` walks objects by key and arrays by
/// index. Anything else returns the whole document.
fn json_path<'a>(data: &'a serde_json::Value, query: &str) -> Option<&'a serde_json::Value> {
    let path = query.strip_prefix("$.")?;
    let mut current = data;
    for part in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(part)?,
            serde_json::Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[async_trait]
impl FabricTool for JsonTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let json_str = require_str(&params, "json_str")?;
        let data: serde_json::Value = match serde_json::from_str(json_str) {
            Ok(data) => data,
            Err(e) => {
                return Err(ToolError::new("INVALID_JSON", e.to_string())
                    .with_details(json!({ "valid": false })))
            }
        };

        let selected = match opt_str(&params, "query") {
            Some(query) => json_path(&data, query).cloned().unwrap_or(serde_json::Value::Null),
            None => data,
        };

        let kind = type_name(&selected);
        Ok(json!({
            "data": selected,
            "valid": true,
            "type": kind,
        }))
    }
}

pub struct CsvTool {
    descriptor: ToolDescriptor,
}

impl CsvTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("data.csv", "Parse CSV")
                .with_capability(
                    "parse",
                    "csv_parse",
                    "Parse CSV into row objects; quotes and embedded delimiters are honored",
                    json!({
                        "type": "object",
                        "properties": {
                            "csv": { "type": "string" },
                            "delimiter": { "type": "string" },
                            "headers": { "type": "boolean" }
                        },
                        "required": ["csv"]
                    }),
                ),
        }
    }
}

impl Default for CsvTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote-aware split of one CSV record.
fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                other => current.push(other),
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

#[async_trait]
impl FabricTool for CsvTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let csv = require_str(&params, "csv")?;
        let delimiter = opt_str(&params, "delimiter")
            .and_then(|s| s.chars().next())
            .unwrap_or(',');
        let has_headers = opt_bool(&params, "headers", true);

        let mut lines = csv.lines().filter(|l| !l.trim().is_empty());
        let headers: Vec<String> = if has_headers {
            lines
                .next()
                .map(|l| split_record(l, delimiter))
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut rows = Vec::new();
        for line in lines {
            let fields = split_record(line, delimiter);
            let mut row = serde_json::Map::new();
            for (i, field) in fields.into_iter().enumerate() {
                let key = if has_headers {
                    headers.get(i).cloned().unwrap_or_else(|| format!("col_{i}"))
                } else {
                    format!("col_{i}")
                };
                row.insert(key, json!(field));
            }
            rows.push(serde_json::Value::Object(row));
        }

        let row_count = rows.len();
        Ok(json!({
            "rows": rows,
            "headers": headers,
            "row_count": row_count,
        }))
    }
}

pub struct ValidateTool {
    descriptor: ToolDescriptor,
}

impl ValidateTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("data.validate", "Validate data against a schema")
                .with_capability(
                    "validate",
                    "validate",
                    "Check data against a JSON-Schema subset: type, required, properties, items",
                    json!({
                        "type": "object",
                        "properties": {
                            "data": {},
                            "schema": { "type": "object" }
                        },
                        "required": ["data", "schema"]
                    }),
                ),
        }
    }
}

impl Default for ValidateTool {
    fn default() -> Self {
        Self::new()
    }
}

fn check_schema(
    data: &serde_json::Value,
    schema: &serde_json::Value,
    path: &str,
    errors: &mut Vec<serde_json::Value>,
) {
    if let Some(expected) = schema.get("type").and_then(|v| v.as_str()) {
        let actual = type_name(data);
        let matched = match expected {
            "integer" => data.as_i64().is_some() || data.as_u64().is_some(),
            other => other == actual,
        };
        if !matched {
            errors.push(json!({
                "message": format!("expected type '{expected}', got '{actual}'"),
                "path": path,
            }));
            return;
        }
    }

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for key in required.iter().filter_map(|v| v.as_str()) {
            if data.get(key).is_none() {
                errors.push(json!({
                    "message": format!("missing required property '{key}'"),
                    "path": path,
                }));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, sub_schema) in properties {
            if let Some(value) = data.get(key) {
                check_schema(value, sub_schema, &format!("{path}/{key}"), errors);
            }
        }
    }

    if let (Some(items), Some(array)) = (schema.get("items"), data.as_array()) {
        for (i, item) in array.iter().enumerate() {
            check_schema(item, items, &format!("{path}/{i}"), errors);
        }
    }
}

#[async_trait]
impl FabricTool for ValidateTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let data = params
            .get("data")
            .ok_or_else(|| ToolError::new("MISSING_PARAM", "'data' is required"))?;
        let schema = params
            .get("schema")
            .ok_or_else(|| ToolError::new("MISSING_PARAM", "'schema' is required"))?;

        let mut errors = Vec::new();
        check_schema(data, schema, "", &mut errors);

        let valid = errors.is_empty();
        Ok(json!({ "valid": valid, "errors": errors }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_parse_and_query() {
        let tool = JsonTool::new();
        let out = tool
            .execute(
                "parse",
                json!({ "json_str": r#"{"a": {"b": [10, 20]}}"#, "query": "$.a.b.1" }),
            )
            .await
            .unwrap();
        assert_eq!(out["data"], 20);
        assert_eq!(out["valid"], true);
        assert_eq!(out["type"], "number");
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let tool = JsonTool::new();
        let err = tool
            .execute("parse", json!({ "json_str": "{nope" }))
            .await
            .unwrap_err();
        assert_eq!(err.code, "INVALID_JSON");
    }

    #[tokio::test]
    async fn csv_with_headers_and_quotes() {
        let tool = CsvTool::new();
        let out = tool
            .execute(
                "parse",
                json!({ "csv": "name,notes\nalice,\"likes, commas\"\nbob,plain" }),
            )
            .await
            .unwrap();
        assert_eq!(out["row_count"], 2);
        assert_eq!(out["rows"][0]["notes"], "likes, commas");
        assert_eq!(out["headers"][0], "name");
    }

    #[tokio::test]
    async fn csv_without_headers_uses_column_names() {
        let tool = CsvTool::new();
        let out = tool
            .execute("parse", json!({ "csv": "1;2;3", "delimiter": ";", "headers": false }))
            .await
            .unwrap();
        assert_eq!(out["rows"][0]["col_2"], "3");
    }

    #[tokio::test]
    async fn validate_passes_and_fails() {
        let tool = ValidateTool::new();
        let schema = json!({
            "type": "object",
            "required": ["id"],
            "properties": {
                "id": { "type": "integer" },
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        });

        let ok = tool
            .execute(
                "validate",
                json!({ "data": { "id": 1, "tags": ["a"] }, "schema": schema }),
            )
            .await
            .unwrap();
        assert_eq!(ok["valid"], true);

        let bad = tool
            .execute(
                "validate",
                json!({ "data": { "tags": [7] }, "schema": schema }),
            )
            .await
            .unwrap();
        assert_eq!(bad["valid"], false);
        assert_eq!(bad["errors"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn split_record_handles_escaped_quotes() {
        let fields = split_record(r#"a,"say ""hi""",c"#, ',');
        assert_eq!(fields, vec!["a", r#"say "hi""#, "c"]);
    }
}
