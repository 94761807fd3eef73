use serde_json::Value;

/// Receives one row at a time from a streaming collector call.
pub type RowSink<'a> = &'a mut dyn FnMut(Value);

/// Contract the per-platform system probes fulfill.
///
/// Snapshot methods return the complete current state of their domain
/// as a JSON object or array of objects keyed by the target table's
/// columns. `networks` covers three tables at once and returns
/// `{"iface": [...], "protocol": [...], "address": [...]}`.
///
/// `packages` and `processes` can produce very large result sets and
/// therefore stream rows through a sink instead of materializing the
/// whole snapshot.
pub trait Collector: Send + Sync {
    fn hardware(&self) -> anyhow::Result<Value>;
    fn os(&self) -> anyhow::Result<Value>;
    fn networks(&self) -> anyhow::Result<Value>;
    fn ports(&self) -> anyhow::Result<Value>;
    fn hotfixes(&self) -> anyhow::Result<Value>;
    fn packages(&self, sink: RowSink<'_>) -> anyhow::Result<()>;
    fn processes(&self, sink: RowSink<'_>) -> anyhow::Result<()>;
}
