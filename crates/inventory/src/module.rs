use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use vigil_agent::{Module, PushMessage};
use vigil_dbsync::{
    DbManagement, DbSync, EventSink, Operation, PipelineFactory, SyncRowQuery,
};
use vigil_queue::{Message, MessageType, ShutdownSignal};

use crate::collector::{Collector, RowSink};
use crate::tables;

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(3600);
const STOP_POLL: Duration = Duration::from_millis(100);

/// The inventory module: one delta-engine database over the inventory
/// tables, refreshed from a [`Collector`] every scan interval.
pub struct Inventory {
    db: Arc<DbSync>,
    collector: Arc<dyn Collector>,
    interval: Mutex<Duration>,
    push: Mutex<Option<PushMessage>>,
    stop: ShutdownSignal,
}

impl Inventory {
    pub const NAME: &'static str = "inventory";

    /// Opens the inventory database (in memory when `db_path` is
    /// `None`; the inventory state is rebuilt on startup either way).
    pub fn new(db_path: Option<&Path>, collector: Arc<dyn Collector>) -> anyhow::Result<Self> {
        let db = DbSync::new(
            db_path,
            &tables::schema_ddl(),
            DbManagement::Volatile,
            &[],
        )
        .context("opening inventory database")?;
        Ok(Self {
            db: Arc::new(db),
            collector,
            interval: Mutex::new(DEFAULT_SCAN_INTERVAL),
            push: Mutex::new(None),
            stop: ShutdownSignal::new(),
        })
    }

    /// One full pass over every collector domain.
    pub fn scan(&self) -> anyhow::Result<()> {
        info!("starting inventory scan");

        self.refresh_snapshot(tables::HWINFO_TABLE, self.collector.hardware()?)?;
        self.refresh_snapshot(tables::OSINFO_TABLE, self.collector.os()?)?;
        self.refresh_snapshot(tables::PORTS_TABLE, self.collector.ports()?)?;
        self.refresh_snapshot(tables::HOTFIXES_TABLE, self.collector.hotfixes()?)?;

        let networks = self.collector.networks()?;
        for (key, table) in [
            ("iface", tables::NETWORK_IFACE_TABLE),
            ("protocol", tables::NETWORK_PROTOCOL_TABLE),
            ("address", tables::NETWORK_ADDRESS_TABLE),
        ] {
            let snapshot = networks.get(key).cloned().unwrap_or_else(|| json!([]));
            self.refresh_snapshot(table, snapshot)?;
        }

        self.stream_table(tables::PACKAGES_TABLE, |sink| self.collector.packages(sink))?;
        self.stream_table(tables::PROCESSES_TABLE, |sink| self.collector.processes(sink))?;

        info!("inventory scan finished");
        Ok(())
    }

    /// Snapshot-style table: one shot through the delta engine.
    fn refresh_snapshot(&self, table: &str, snapshot: Value) -> anyhow::Result<()> {
        let push = self.push.lock().clone();
        self.db
            .update_with_snapshot(table, &snapshot, &[], |op, data| {
                publish(&push, table, op, data);
            })
            .with_context(|| format!("refreshing table {table}"))?;
        Ok(())
    }

    /// Streaming table: rows arrive one by one through a transaction
    /// pipeline; rows the collector no longer reports are swept as
    /// deleted at the end.
    fn stream_table(
        &self,
        table: &str,
        feed: impl FnOnce(RowSink<'_>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let factory = PipelineFactory::new();
        let sink: EventSink = {
            let push = self.push.lock().clone();
            let table = table.to_owned();
            Arc::new(move |op, data| publish(&push, &table, op, data))
        };
        let id = factory
            .create(self.db.clone(), &[table.to_owned()], 0, 32, sink)
            .with_context(|| format!("opening pipeline for {table}"))?;
        let pipeline = factory.pipeline(id)?;

        let mut row_sink = |row: Value| {
            pipeline.sync_row(&SyncRowQuery::new(table).data(row));
        };
        feed(&mut row_sink)?;

        let push = self.push.lock().clone();
        pipeline
            .get_deleted(|op, data| publish(&push, table, op, data))
            .with_context(|| format!("sweeping table {table}"))?;

        drop(pipeline);
        factory.destroy(id)?;
        Ok(())
    }
}

impl Module for Inventory {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn setup(&self, config: &Value) -> anyhow::Result<()> {
        if let Some(secs) = config
            .get(Self::NAME)
            .and_then(|c| c.get("interval"))
            .and_then(Value::as_u64)
        {
            *self.interval.lock() = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn run(&self) -> anyhow::Result<()> {
        while !self.stop.is_set() {
            if let Err(err) = self.scan() {
                warn!("inventory scan failed: {err:#}");
            }
            let deadline = Instant::now() + *self.interval.lock();
            while !self.stop.is_set() && Instant::now() < deadline {
                std::thread::sleep(STOP_POLL);
            }
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop.request();
    }

    fn set_push_message(&self, push: PushMessage) {
        *self.push.lock() = Some(push);
    }
}

/// Publishes one delta document through the agent callback.
fn publish(push: &Option<PushMessage>, table: &str, op: Operation, data: &Value) {
    let Some(push) = push else {
        return;
    };
    let document = json!({
        "type": tables::event_type(table),
        "operation": op.as_str(),
        "data": data,
    });
    let message = Message {
        kind: MessageType::Stateful,
        payload: document,
        module_name: Inventory::NAME.to_owned(),
        module_type: Inventory::NAME.to_owned(),
        metadata: String::new(),
    };
    if push(message) < 0 {
        warn!("inventory delta for {table} was not accepted by the queue");
    }
}
