//! Tool-call argument shim seam.

/// Rewrites tool-call arguments the upstream model emitted before they reach
/// the client. Implementations must be idempotent.
pub trait ArgumentShim: Send + Sync {
    /// Rewrite `args` in place for the tool called `tool_name`
    fn remap(&self, tool_name: &str, args: &mut serde_json::Value);
}

/// Leaves arguments untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughShim;

impl ArgumentShim for PassthroughShim {
    fn remap(&self, _tool_name: &str, _args: &mut serde_json::Value) {}
}
