use std::sync::Arc;

use arca_config::Settings;
use arca_node::{MemoryStorage, Node};
use arca_safebox::PermissiveVerifier;
use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = match std::env::args().nth(1) {
        Some(path) => match Settings::from_file(&path) {
            Ok(settings) => settings,
            Err(err) => {
                eprintln!("config error: {err}");
                std::process::exit(1);
            }
        },
        None => Settings::default(),
    };

    let magic = settings.magic();
    info!(network = %settings.network, magic, "starting");

    let mut nonce = vec![0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    info!(nonce = %hex::encode(&nonce), "connection nonce");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("runtime error: {err}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async move {
        let node = Node::new(
            settings,
            // Curve verification plugs in here; nothing in-tree does EC math.
            Arc::new(PermissiveVerifier),
            Box::new(MemoryStorage::new()),
            nonce,
        );
        let handle = node.handle();
        let cancel = CancellationToken::new();

        let loop_cancel = cancel.clone();
        let run = tokio::spawn(node.run(loop_cancel));

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(height = handle.height(), peers = handle.peer_count(), "shutting down");
                cancel.cancel();
            }
            _ = run => {}
        }
    });
}
