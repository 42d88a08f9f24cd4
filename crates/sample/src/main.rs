//! Small end-to-end run: a counter node, a worker thread publishing through the delegation
//! queue, and a few undo/redo steps.
//!
//! Configuration can be passed as a JSON file path in the first argument.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use nodebus_events::{
    Args, Bus, BusConfig, Inverse, LogLevel, ParamType, ParameterDescriptor, QueueGateway,
    X_MAP_UNDO_REDO_COUNTERS,
};

fn load_config() -> anyhow::Result<BusConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Ok(BusConfig::from_json(&raw)?)
        }
        None => Ok(BusConfig::default().with_parameter_type_info(true)),
    }
}

fn main() -> anyhow::Result<()> {
    nodebus_observability::init();

    let bus = Bus::new();
    bus.register_event(
        "SET_VALUE",
        [ParameterDescriptor::typed("value", ParamType::integer()).describe("New counter value.")],
        LogLevel::Info,
    )?;

    let value = Arc::new(AtomicI64::new(0));
    let value_in_handler = Arc::clone(&value);
    let _counter = bus
        .node("COUNTER")
        .static_node()
        .on("SET_VALUE", move |_bus, record| {
            let new: i64 = record.arg_as("value")?;
            let old = value_in_handler.swap(new, Ordering::SeqCst);
            Ok(vec![Inverse::new("SET_VALUE").arg("value", old)])
        })
        .register()?;

    let _display = bus
        .node("HISTORY_DISPLAY")
        .on(X_MAP_UNDO_REDO_COUNTERS, |_bus, record| {
            let undo: u64 = record.arg_as("undo_counter")?;
            let redo: u64 = record.arg_as("redo_counter")?;
            tracing::info!(undo, redo, "history changed");
            Ok(Vec::new())
        })
        .register()?;

    let gateway = Arc::new(QueueGateway::new());
    bus.start(load_config()?, Some(gateway.clone()))?;

    let worker_bus = bus.clone();
    let worker = thread::spawn(move || -> anyhow::Result<()> {
        for v in 1..=3 {
            worker_bus.publish("SET_VALUE", "COUNTER", Args::new().with("value", v))?;
        }
        Ok(())
    });
    worker
        .join()
        .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;

    while gateway.pump(&bus, Duration::from_millis(50))? {}
    tracing::info!(value = value.load(Ordering::SeqCst), "worker updates applied");

    bus.undo()?;
    bus.undo()?;
    tracing::info!(value = value.load(Ordering::SeqCst), "after two undos");

    bus.redo()?;
    tracing::info!(value = value.load(Ordering::SeqCst), "after one redo");

    Ok(())
}
