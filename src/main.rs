//! vhost-sync daemon entry point.

use std::sync::Arc;

use log::{error, info};

mod config;
mod engine;
mod error;
mod registry;
mod runtime;
mod server;
mod trigger;
mod types;

use config::Config;
use engine::Reconciler;
use registry::EtcdRegistry;
use runtime::{ContainerRuntime, DockerRuntime};
use server::run_server;

/// Exit status when no node address can be determined.
const EXIT_NO_ADDRESS: i32 = 255;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting vhost-sync with config: {:?}", cfg);

    let node = match cfg.resolve_node_address() {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            std::process::exit(EXIT_NO_ADDRESS);
        }
    };
    info!("Registering endpoints as {}", node);

    let runtime = Arc::new(DockerRuntime::new(cfg.docker_socket.clone()));
    let registry = Arc::new(EtcdRegistry::new(
        &cfg.etcd_endpoint,
        &cfg.registry_root,
        cfg.request_timeout(),
    )?);
    let engine = Arc::new(
        Reconciler::new(node, runtime.clone(), registry).with_pass_timeout(cfg.pass_timeout()),
    );

    // Pass worker, with one pass queued for startup
    let (trigger_tx, trigger_rx) = trigger::channel();
    trigger::notify(&trigger_tx);
    let worker_handle = tokio::spawn(trigger::run_worker(Arc::clone(&engine), trigger_rx));

    // Container events
    let watch_handle = cfg.watch_events.then(|| {
        let tx = trigger_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = runtime.watch(tx).await {
                error!("Container event watch failed: {}", e);
            }
        })
    });

    // Periodic resync
    let resync_handle = cfg
        .resync_interval()
        .map(|every| tokio::spawn(trigger::run_resync(every, trigger_tx.clone())));
    drop(trigger_tx);

    // Trigger server, until shutdown signal
    let served = run_server(cfg.listen_addr(), engine).await;
    if let Err(e) = &served {
        error!("Trigger server failed: {}", e);
    }

    // Abort tasks
    worker_handle.abort();
    if let Some(handle) = watch_handle {
        handle.abort();
    }
    if let Some(handle) = resync_handle {
        handle.abort();
    }

    info!("Shutdown complete.");
    served
}
