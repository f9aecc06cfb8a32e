//! Tool-call argument compatibility rewrites.
//!
//! Gemini models frequently emit arguments for the client's file tools under
//! the wrong key (`query` instead of `pattern`, `path` instead of
//! `file_path`) or as stringly-typed booleans. Every rewrite only fills a
//! missing key, so applying the remapper twice is a no-op.

use gateway_core::ArgumentShim;
use serde_json::{Map, Value};
use tracing::debug;

const BOOLEAN_FLAGS: &[&str] = &["-i", "-n", "multiline", "replace_all", "run_in_background"];

/// Remaps known malformed tool-call argument keys
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolArgumentRemapper;

impl ToolArgumentRemapper {
    /// Create a remapper
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ArgumentShim for ToolArgumentRemapper {
    fn remap(&self, tool_name: &str, args: &mut Value) {
        let Some(obj) = args.as_object_mut() else {
            return;
        };

        match tool_name.to_ascii_lowercase().as_str() {
            "grep" | "search" | "search_code_definitions" | "search_code_snippets" | "glob" => {
                move_key(obj, "description", "pattern", tool_name);
                move_key(obj, "query", "pattern", tool_name);
                fill_path_from_paths(obj);
            }
            "read" => move_key(obj, "path", "file_path", tool_name),
            "ls" => {
                if !obj.contains_key("path") {
                    obj.insert("path".to_string(), Value::String(".".to_string()));
                }
            }
            _ => {}
        }

        for flag in BOOLEAN_FLAGS {
            if let Some(value) = obj.get_mut(*flag) {
                if let Some(b) = coerce_to_bool(value) {
                    *value = Value::Bool(b);
                }
            }
        }
    }
}

fn move_key(obj: &mut Map<String, Value>, from: &str, to: &str, tool_name: &str) {
    if obj.contains_key(to) {
        return;
    }
    if let Some(value) = obj.remove(from) {
        debug!(tool = tool_name, from, to, "Remapped tool argument");
        obj.insert(to.to_string(), value);
    }
}

fn fill_path_from_paths(obj: &mut Map<String, Value>) {
    if obj.contains_key("path") {
        return;
    }
    let path = match obj.remove("paths") {
        Some(Value::Array(items)) => items
            .first()
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string(),
        Some(Value::String(s)) => s,
        _ => ".".to_string(),
    };
    obj.insert("path".to_string(), Value::String(path));
}

/// Interpret a JSON value as a boolean.
///
/// Booleans pass through; `"true"`/`"false"` (any case), `"1"`/`"0"` and the
/// numbers 1/0 are converted. Anything else yields `None`.
#[must_use]
pub fn coerce_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    }
}
