//! Per-connection fault watcher with in-place restore.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::identity::Identity;
use crate::manager::Shared;
use crate::registry::Phase;
use crate::transport::ConnectionEvent;

/// Watch `events` for the connection `handle_id` until the registry drops it.
pub(crate) fn spawn_watcher(
    shared: Arc<Shared>,
    identity: Identity,
    handle_id: Uuid,
    mut events: mpsc::Receiver<ConnectionEvent>,
) {
    let Some(entry) = shared.registry.get(&identity) else {
        return;
    };
    if entry.handle.id() != handle_id {
        return;
    }
    let token = entry.watcher_token();
    let cooldown = entry.policy.cooldown;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if !event.is_disconnect() {
                tracing::warn!(identity = %identity.masked(), event = ?event, "connection reported error");
                continue;
            }

            tracing::warn!(identity = %identity.masked(), event = ?event, "connection dropped");
            if !shared.store.exists(&identity) {
                tracing::info!(identity = %identity.masked(), "no stored credential, not reconnecting");
                continue;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(cooldown) => {}
            }

            if !reconnect(&shared, &identity, handle_id).await {
                break;
            }
        }
        tracing::debug!(identity = %identity.masked(), handle = %handle_id, "watcher stopped");
    });
}

/// Restore the existing connection object in place. Returns false once the
/// connection is no longer the registry's current one.
async fn reconnect(shared: &Arc<Shared>, identity: &Identity, handle_id: Uuid) -> bool {
    let lock = shared.registry.lock_for(identity);
    let _guard = lock.lock().await;

    let Some(entry) = shared.registry.get(identity) else {
        return false;
    };
    if entry.handle.id() != handle_id {
        return false;
    }
    shared.registry.set_phase(identity, handle_id, Phase::Connecting);

    let blob = match shared.store.load(identity) {
        Ok(blob) => blob,
        Err(e) => {
            tracing::warn!(identity = %identity.masked(), error = %e, "credential unavailable for reconnect");
            evict_locked(shared, identity, handle_id, "reconnect").await;
            return false;
        }
    };

    match entry.handle.connection().restore(&blob).await {
        // In-place resume of the stored session; the credential file is left as is.
        Ok(_) => {
            shared.registry.set_phase(identity, handle_id, Phase::Live);
            tracing::info!(identity = %identity.masked(), "session reconnected");
            true
        }
        Err(e) => {
            tracing::warn!(identity = %identity.masked(), error = %e, "reconnect failed");
            evict_locked(shared, identity, handle_id, "reconnect").await;
            false
        }
    }
}

/// Forget a dead session: delete its credential, drop the registry slot and
/// close the connection. Caller holds the identity's lock.
pub(crate) async fn evict_locked(
    shared: &Arc<Shared>,
    identity: &Identity,
    handle_id: Uuid,
    cause: &'static str,
) {
    if let Err(e) = shared.store.delete(identity) {
        tracing::error!(identity = %identity.masked(), error = %e, "failed to delete credential");
    }
    if let Some(entry) = shared.registry.remove_handle(identity, handle_id) {
        entry.handle.connection().disconnect().await;
    }
    tracing::info!(identity = %identity.masked(), cause, "session evicted");
}
