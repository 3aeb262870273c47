//! Math tools: `math.calculate` (safe expression evaluation) and
//! `math.statistics`.

use async_trait::async_trait;
use serde_json::json;

use crate::params::{opt_u64, require_str};
use crate::{FabricTool, ToolDescriptor, ToolError, ToolOutcome};

pub struct CalculateTool {
    descriptor: ToolDescriptor,
}

impl CalculateTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("math.calculate", "Evaluate a math expression")
                .with_capability(
                    "eval",
                    "eval",
                    "Evaluate an arithmetic expression in a sandboxed engine",
                    json!({
                        "type": "object",
                        "properties": {
                            "expression": { "type": "string" },
                            "precision": { "type": "integer" }
                        },
                        "required": ["expression"]
                    }),
                ),
        }
    }

    /// A locked-down engine: expression-only evaluation with operation and
    /// depth budgets, so untrusted input cannot loop or recurse.
    fn engine() -> rhai::Engine {
        let mut engine = rhai::Engine::new();
        engine.set_max_operations(100_000);
        engine.set_max_expr_depths(64, 64);
        engine
    }
}

impl Default for CalculateTool {
    fn default() -> Self {
        Self::new()
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

#[async_trait]
impl FabricTool for CalculateTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let expression = require_str(&params, "expression")?;
        let precision = opt_u64(&params, "precision", 10).min(15) as u32;

        let result = Self::engine()
            .eval_expression::<rhai::Dynamic>(expression)
            .map_err(|e| ToolError::new("EVAL_ERROR", format!("Could not evaluate: {e}")))?;

        let (value, kind) = if let Ok(b) = result.as_bool() {
            (json!(b), "bool")
        } else if let Ok(i) = result.as_int() {
            (json!(i), "int")
        } else if let Ok(f) = result.as_float() {
            (json!(round_to(f, precision)), "float")
        } else {
            return Err(ToolError::new(
                "EVAL_ERROR",
                "Expression did not evaluate to a number or boolean",
            ));
        };

        Ok(json!({
            "result": value,
            "expression": expression,
            "type": kind,
        }))
    }
}

pub struct StatisticsTool {
    descriptor: ToolDescriptor,
}

impl StatisticsTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::builtin("math.statistics", "Statistics over a dataset")
                .with_capability(
                    "analyze",
                    "analyze",
                    "Compute mean, median, stddev, min, and max for a number array",
                    json!({
                        "type": "object",
                        "properties": {
                            "data": { "type": "array", "items": { "type": "number" } },
                            "measures": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["data"]
                    }),
                ),
        }
    }
}

impl Default for StatisticsTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricTool for StatisticsTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _capability: &str, params: serde_json::Value) -> ToolOutcome {
        let data: Vec<f64> = params
            .get("data")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
            .unwrap_or_default();
        if data.is_empty() {
            return Err(ToolError::new("EMPTY_DATA", "Data array is empty"));
        }

        let measures: Vec<String> = params
            .get("measures")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_else(|| {
                ["mean", "median", "stddev", "min", "max"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        let sum: f64 = data.iter().sum();
        let mut result = serde_json::Map::new();
        result.insert("count".into(), json!(data.len()));
        result.insert("sum".into(), json!(sum));

        let mean = sum / data.len() as f64;
        if measures.iter().any(|m| m == "mean") {
            result.insert("mean".into(), json!(mean));
        }
        if measures.iter().any(|m| m == "median") {
            let mut sorted = data.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = sorted.len() / 2;
            let median = if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            };
            result.insert("median".into(), json!(median));
        }
        if measures.iter().any(|m| m == "stddev") && data.len() > 1 {
            let variance =
                data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
            result.insert("stddev".into(), json!(variance.sqrt()));
        }
        if measures.iter().any(|m| m == "min") {
            result.insert("min".into(), json!(data.iter().copied().fold(f64::INFINITY, f64::min)));
        }
        if measures.iter().any(|m| m == "max") {
            result.insert(
                "max".into(),
                json!(data.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            );
        }

        Ok(serde_json::Value::Object(result))
    }
}
