use docshare_core::{Document, DocumentStore, DocxBuilder, SqliteDocumentStore};
use docshare_hub::{
    ChangePublisher, Config, ServerEvent, Snapshot, SyncManager, apply_remote_update,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Typed on stdin to commit without waiting for the quiet period
const SAVE_COMMAND: &str = ":save";

/// Typed on stdin, followed by a path, to write the document as `.docx`
const EXPORT_COMMAND: &str = ":export";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docshare_hub=debug,docshare_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Docshare Hub v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {:?}", config.database_path);
    info!("User id: {}", config.user_id);

    // Open the document store
    let store: Arc<dyn DocumentStore> = match SqliteDocumentStore::open(&config.database_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open document store: {}", e);
            std::process::exit(1);
        }
    };

    let manager = Arc::new(SyncManager::new(&config));
    let publisher = Arc::new(ChangePublisher::new(
        store.clone(),
        manager.clone(),
        config.debounce,
    ));

    // Apply edits from peers to the local store
    let inbound = tokio::spawn(apply_inbound(manager.subscribe_events(), store.clone()));

    if let Err(e) = manager.start_server(None).await {
        error!("Could not start sync server: {}", e);
        std::process::exit(1);
    }
    info!(
        "Peers can join at ws://{}",
        manager.state().display_address()
    );

    let editor = tokio::spawn(edit_from_stdin(store.clone(), publisher.clone()));

    shutdown_signal().await;

    editor.abort();
    publisher.shutdown();
    manager.stop_server().await;
    inbound.abort();

    info!("Hub shut down gracefully");
}

async fn apply_inbound(mut events: broadcast::Receiver<ServerEvent>, store: Arc<dyn DocumentStore>) {
    loop {
        match events.recv().await {
            Ok(ServerEvent::MessageReceived { message }) => {
                if let Err(e) = apply_remote_update(&*store, &message) {
                    warn!(
                        "Failed to apply update to document {}: {}",
                        message.document_id, e
                    );
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Inbound handler lagged {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Minimal line editor: every line typed is appended to the most recent
/// document and goes through the change publisher.
async fn edit_from_stdin(store: Arc<dyn DocumentStore>, publisher: Arc<ChangePublisher>) {
    let document = match active_document(&*store) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to open a document for editing: {}", e);
            return;
        }
    };
    info!(
        "Editing document {} ({:?}); type lines to append, {} to commit now, {} <path> to export",
        document.id, document.title, SAVE_COMMAND, EXPORT_COMMAND
    );

    let Document {
        id,
        title,
        mut content,
    } = document;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim() == SAVE_COMMAND => {
                publisher.save_now(Snapshot::new(id, title.clone(), content.clone()));
            }
            Ok(Some(line)) if line.trim_start().starts_with(EXPORT_COMMAND) => {
                let path = line.trim_start()[EXPORT_COMMAND.len()..].trim();
                if path.is_empty() {
                    warn!("Usage: {} <path>", EXPORT_COMMAND);
                    continue;
                }
                let snapshot = Document::new(id, title.clone(), content.clone());
                match DocxBuilder::from_document(&snapshot).save(path) {
                    Ok(()) => info!("Exported document {} to {}", id, path),
                    Err(e) => error!("Failed to export document {}: {}", id, e),
                }
            }
            Ok(Some(line)) => {
                content.push_str(&line);
                content.push('\n');
                publisher.submit(Snapshot::new(id, title.clone(), content.clone()));
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

fn active_document(store: &dyn DocumentStore) -> docshare_core::Result<Document> {
    let latest = store.get_all().borrow().first().cloned();
    if let Some(doc) = latest {
        return Ok(doc);
    }
    let id = store.insert(&Document::new(0, "Untitled", ""))?;
    Ok(Document::new(id, "Untitled", ""))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
