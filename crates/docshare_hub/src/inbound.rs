use docshare_core::{Document, DocumentStore, Result, SyncAction, SyncMessage};
use tracing::debug;

/// Apply an update received from a peer to the local store.
///
/// Existing documents keep their title; unknown ids are created untitled.
/// Returns whether the store changed.
pub fn apply_remote_update(store: &dyn DocumentStore, message: &SyncMessage) -> Result<bool> {
    match message.action {
        SyncAction::Update => {
            let current = store.get_by_id(message.document_id).borrow().clone();
            let title = match current {
                Some(doc) if doc.content == message.content => {
                    debug!("Document {} already up to date", message.document_id);
                    return Ok(false);
                }
                Some(doc) => doc.title,
                None => String::new(),
            };

            store.insert(&Document::new(
                message.document_id,
                title,
                message.content.clone(),
            ))?;
            debug!(
                "Applied update from {} to document {}",
                message.user_id, message.document_id
            );
            Ok(true)
        }
    }
}
