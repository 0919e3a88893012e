use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::identity::Identity;
use crate::transport::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connecting,
    Live,
    Terminated,
}

/// Exclusively owned transport session for one identity.
///
/// The id changes whenever a new connection object is created, so fault
/// notifications from a discarded connection can be told apart from the
/// current one.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    connection: Arc<dyn Connection>,
}

impl ConnectionHandle {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }
}

/// Per-entry reconnection settings, chosen by the caller at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub cooldown: Duration,
}

/// Snapshot of one identity's registry slot.
#[derive(Clone)]
pub struct RegistryEntry {
    pub handle: ConnectionHandle,
    pub phase: Phase,
    pub policy: ReconnectPolicy,
    pub connected_at_ms: Option<u64>,
    pub last_seen_ms: u64,
    watcher: CancellationToken,
}

impl RegistryEntry {
    pub fn connecting(
        handle: ConnectionHandle,
        policy: ReconnectPolicy,
        watcher: CancellationToken,
    ) -> Self {
        Self {
            handle,
            phase: Phase::Connecting,
            policy,
            connected_at_ms: None,
            last_seen_ms: now_ms(),
            watcher,
        }
    }

    pub fn is_live(&self) -> bool {
        self.phase == Phase::Live
    }

    /// Cancelled once the entry leaves the registry.
    pub fn watcher_token(&self) -> CancellationToken {
        self.watcher.clone()
    }
}

/// Identity → connection table plus one send lock per identity.
///
/// Every mutation of an identity's slot happens while holding that
/// identity's lock from [`ConnectionRegistry::lock_for`]; `put` additionally
/// refuses to overwrite a different handle.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<Identity, RegistryEntry>,
    // Never pruned: one small mutex per identity ever seen.
    locks: DashMap<Identity, Arc<Mutex<()>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &Identity) -> Option<RegistryEntry> {
        self.entries.get(identity).map(|r| r.value().clone())
    }

    pub fn get_live(&self, identity: &Identity) -> Option<RegistryEntry> {
        self.get(identity).filter(RegistryEntry::is_live)
    }

    pub fn is_connected(&self, identity: &Identity) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|r| r.value().is_live())
    }

    /// Install `entry`. Returns false if a different handle already occupies
    /// the slot; re-putting the same handle replaces the snapshot.
    pub fn put(&self, identity: Identity, entry: RegistryEntry) -> bool {
        match self.entries.entry(identity) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().handle.id() != entry.handle.id() {
                    return false;
                }
                occupied.insert(entry);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    /// Move the entry for `handle_id` to `phase`. Returns false if the slot
    /// now holds another handle or is empty.
    pub fn set_phase(&self, identity: &Identity, handle_id: Uuid, phase: Phase) -> bool {
        let Some(mut entry) = self.entries.get_mut(identity) else {
            return false;
        };
        if entry.handle.id() != handle_id {
            return false;
        }
        let now = now_ms();
        if phase == Phase::Live && entry.connected_at_ms.is_none() {
            entry.connected_at_ms = Some(now);
        }
        entry.phase = phase;
        entry.last_seen_ms = now;
        true
    }

    /// Refresh the last-seen-live timestamp.
    pub fn touch(&self, identity: &Identity, handle_id: Uuid) {
        if let Some(mut entry) = self.entries.get_mut(identity)
            && entry.handle.id() == handle_id
        {
            entry.last_seen_ms = now_ms();
        }
    }

    /// Remove the slot and stop its reconnection watcher. The returned
    /// snapshot is marked terminated.
    pub fn remove(&self, identity: &Identity) -> Option<RegistryEntry> {
        let (_, entry) = self.entries.remove(identity)?;
        Some(terminate(entry))
    }

    /// Remove the slot only if it still holds `handle_id`.
    pub fn remove_handle(&self, identity: &Identity, handle_id: Uuid) -> Option<RegistryEntry> {
        let (_, entry) = self
            .entries
            .remove_if(identity, |_, e| e.handle.id() == handle_id)?;
        Some(terminate(entry))
    }

    /// The identity's lock, created on first use.
    pub fn lock_for(&self, identity: &Identity) -> Arc<Mutex<()>> {
        self.locks
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    pub fn live_identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self
            .entries
            .iter()
            .filter(|r| r.value().is_live())
            .map(|r| r.key().clone())
            .collect();
        identities.sort();
        identities
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn terminate(mut entry: RegistryEntry) -> RegistryEntry {
    entry.watcher.cancel();
    entry.phase = Phase::Terminated;
    entry
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
