//! camnode - Main Entry Point
//!
//! Builds the node graph described by the configuration file and runs it
//! until Ctrl-C. Without a configuration path on the command line the
//! platform default is used, falling back to built-in defaults.

use anyhow::{anyhow, Context};
use camnode::{
    backend::{MockEngine, MockHal},
    config::{AppConfig, LoggingConfig},
    pipeline::{Backends, NodeBridge, NodeFactory, NodeMessage, NodeRegistry, NodeServer, ReplyKind},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MESSAGE_POLL: Duration = Duration::from_millis(200);

fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "camnode.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn log_message(msg: &NodeMessage) {
    let reply = &msg.reply;
    match reply.kind {
        // Per-frame events carry images; keep them out of the log.
        ReplyKind::Evt => tracing::trace!("[{}] event {}", msg.node_id, reply.name),
        ReplyKind::Resp if reply.is_ok() => {
            tracing::info!("[{}] {}: {}", msg.node_id, reply.name, reply.data)
        }
        ReplyKind::Resp => tracing::warn!(
            "[{}] {} failed ({}): {}",
            msg.node_id,
            reply.name,
            reply.code,
            reply.data
        ),
    }
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("loading {}", path.to_string_lossy()))?,
        None => AppConfig::load_or_default(),
    };
    let _log_guard = init_logging(&config.logging);

    tracing::info!(
        "Starting camnode as {} with {} node(s)",
        config.server.client_id,
        config.nodes.len()
    );

    let hal = MockHal::new();
    if config.demo.generator {
        hal.start_generator(config.demo.fps, config.demo.gop)
            .context("starting frame generator")?;
    }
    let engine = Arc::new(MockEngine::virtual_models());

    let (bridge, cmd_rx, responder) =
        NodeBridge::with_capacity(config.server.command_depth, config.server.message_depth);
    let registry = NodeRegistry::with_builtins(
        Backends::new(hal.clone(), engine),
        config.pipeline.clone(),
    );
    let factory = Arc::new(NodeFactory::new(registry, responder));
    let server = NodeServer::new(factory, cmd_rx)
        .spawn()
        .context("spawning node server")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("installing Ctrl-C handler")?;
    }

    for request in &config.nodes {
        bridge.create(request.clone());
    }

    while !interrupted.load(Ordering::SeqCst) {
        if let Some(msg) = bridge.recv_timeout(MESSAGE_POLL) {
            log_message(&msg);
        }
    }

    tracing::info!("Shutting down...");
    bridge.shutdown();
    server
        .join()
        .map_err(|_| anyhow!("node server thread panicked"))?;
    for msg in bridge.drain() {
        log_message(&msg);
    }
    hal.stop_generator();
    Ok(())
}
