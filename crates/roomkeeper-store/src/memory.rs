//! In-process realtime store.
//!
//! [`MemoryRealtimeStore`] plays the server: it owns the JSON tree, the
//! subscriptions, and the disconnect directives of every connection.
//! Clients talk to it through a [`MemoryConnection`], one per simulated
//! client process. Dropping or [`disconnect`](MemoryConnection::disconnect)ing
//! a connection fires its directives, the way a hosted store reacts to a
//! closed socket.
//!
//! Like a hosted JSON store, the tree only keeps scalar leaves: writing an
//! object at `a` stores one leaf per scalar under `a/...`, and reading `a`
//! reassembles the object. Empty objects and `null` are absence.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use roomkeeper_protocol::StorePath;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::fault::FaultPlan;
use crate::{ConnectionId, FaultKind, RealtimeStore, StoreError, StoreOp, Subscription};

struct Watcher {
    path: StorePath,
    sender: watch::Sender<Option<Value>>,
}

#[derive(Default)]
struct Tree {
    /// Scalar (or array) leaves keyed by full path.
    leaves: BTreeMap<String, Value>,
    watchers: Vec<Watcher>,
    directives: HashMap<ConnectionId, BTreeSet<StorePath>>,
    live: HashSet<ConnectionId>,
}

impl Tree {
    /// Reassembles the value at `path` from its leaves.
    fn snapshot(&self, path: &StorePath) -> Option<Value> {
        if let Some(leaf) = self.leaves.get(path.as_str()) {
            return Some(leaf.clone());
        }

        let prefix = descendant_prefix(path);
        let mut root = Map::new();
        for (key, leaf) in self.leaves.range(prefix.clone()..) {
            let Some(rel) = key.strip_prefix(prefix.as_str()) else {
                break;
            };
            insert_nested(&mut root, rel, leaf.clone());
        }

        if root.is_empty() {
            None
        } else {
            Some(Value::Object(root))
        }
    }

    /// Removes the leaf at `path` and every leaf below it.
    fn remove_subtree(&mut self, path: &StorePath) {
        self.leaves.remove(path.as_str());
        let prefix = descendant_prefix(path);
        let doomed: Vec<String> = self
            .leaves
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(prefix.as_str()))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            self.leaves.remove(&key);
        }
    }

    /// Removes scalar leaves sitting on an ancestor of `path`; a write
    /// below a scalar turns that scalar into an object.
    fn remove_ancestor_leaves(&mut self, path: &StorePath) {
        let mut ancestor = String::new();
        for segment in path.segments() {
            if !ancestor.is_empty() {
                self.leaves.remove(&ancestor);
                ancestor.push('/');
            }
            ancestor.push_str(segment);
        }
    }

    fn set(&mut self, path: &StorePath, value: Value) {
        self.remove_subtree(path);
        self.remove_ancestor_leaves(path);
        flatten_into(&mut self.leaves, path.as_str(), value);
    }

    /// Pushes fresh snapshots to every watcher whose view may have changed,
    /// and forgets watchers nobody listens to any more.
    fn notify(&mut self, changed: &StorePath) {
        self.watchers.retain(|w| w.sender.receiver_count() > 0);

        let updates: Vec<(usize, Option<Value>)> = self
            .watchers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.path.overlaps(changed))
            .map(|(i, w)| (i, self.snapshot(&w.path)))
            .collect();

        for (i, next) in updates {
            self.watchers[i].sender.send_if_modified(|current| {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            });
        }
    }
}

fn descendant_prefix(path: &StorePath) -> String {
    if path.is_root() {
        String::new()
    } else {
        format!("{}/", path.as_str())
    }
}

fn insert_nested(root: &mut Map<String, Value>, rel: &str, leaf: Value) {
    let mut node = root;
    let mut segments = rel.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            node.insert(segment.to_string(), leaf);
            return;
        }
        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        node = match child {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

fn flatten_into(leaves: &mut BTreeMap<String, Value>, at: &str, value: Value) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if at.is_empty() {
                    key
                } else {
                    format!("{at}/{key}")
                };
                flatten_into(leaves, &child_path, child);
            }
        }
        scalar => {
            leaves.insert(at.to_string(), scalar);
        }
    }
}

fn validate_keys(value: &Value) -> Result<(), StoreError> {
    if let Value::Object(map) = value {
        for (key, child) in map {
            if key.is_empty() || key.contains('/') {
                return Err(StoreError::Encoding(
                    roomkeeper_protocol::ProtocolError::InvalidPath(key.clone()),
                ));
            }
            validate_keys(child)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryRealtimeStore
// ---------------------------------------------------------------------------

/// The shared, in-process realtime store ("the server").
///
/// Cheap to clone; clones share the same tree.
#[derive(Clone, Default)]
pub struct MemoryRealtimeStore {
    tree: Arc<Mutex<Tree>>,
    faults: Arc<FaultPlan>,
    next_connection: Arc<AtomicU64>,
}

impl MemoryRealtimeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new client connection.
    pub fn connect(&self) -> MemoryConnection {
        let id = ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().live.insert(id);
        tracing::debug!(connection = %id, "store connection opened");
        MemoryConnection {
            id,
            store: self.clone(),
        }
    }

    /// Reads a value directly, bypassing connections and faults.
    pub fn peek(&self, path: &StorePath) -> Option<Value> {
        self.lock().snapshot(path)
    }

    /// Number of directives currently armed for `connection`.
    pub fn directive_count(&self, connection: ConnectionId) -> usize {
        self.lock()
            .directives
            .get(&connection)
            .map_or(0, BTreeSet::len)
    }

    /// Makes the next `op` on any connection fail with `kind`.
    pub fn fail_next(&self, op: StoreOp, kind: FaultKind) {
        self.faults.fail_next(op, kind);
    }

    /// Makes every `op` fail with `kind` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, op: StoreOp, kind: FaultKind) {
        self.faults.fail_always(op, kind);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops a connection server-side and runs its directives.
    fn drop_connection(&self, id: ConnectionId) {
        let mut tree = self.lock();
        if !tree.live.remove(&id) {
            return;
        }
        let directives = tree.directives.remove(&id).unwrap_or_default();
        for path in &directives {
            tree.remove_subtree(path);
        }
        for path in &directives {
            tree.notify(path);
        }
        tracing::debug!(
            connection = %id,
            directives = directives.len(),
            "store connection dropped, directives fired"
        );
    }
}

// ---------------------------------------------------------------------------
// MemoryConnection
// ---------------------------------------------------------------------------

/// One client's connection to a [`MemoryRealtimeStore`].
///
/// Dropping the connection behaves like losing the socket: the server
/// fires every directive this connection registered.
pub struct MemoryConnection {
    id: ConnectionId,
    store: MemoryRealtimeStore,
}

impl MemoryConnection {
    /// Simulates the connection dropping without a goodbye (crash, closed
    /// tab, network loss). Further operations fail with
    /// [`StoreError::ConnectionClosed`].
    pub fn disconnect(&self) {
        self.store.drop_connection(self.id);
    }

    /// Returns `true` until the connection is dropped.
    pub fn is_connected(&self) -> bool {
        self.store.lock().live.contains(&self.id)
    }

    /// The store this connection belongs to.
    pub fn store(&self) -> &MemoryRealtimeStore {
        &self.store
    }

    /// Common prologue of every operation: simulate a round-trip, then
    /// check liveness and injected faults.
    async fn begin(&self, op: StoreOp) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if !self.is_connected() {
            return Err(StoreError::ConnectionClosed(self.id));
        }
        self.store.faults.check(op)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store.drop_connection(self.id);
    }
}

impl RealtimeStore for MemoryConnection {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.begin(StoreOp::Read).await?;
        Ok(self.store.lock().snapshot(path))
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.begin(StoreOp::Write).await?;
        validate_keys(&value)?;
        let mut tree = self.store.lock();
        tree.set(path, value);
        tree.notify(path);
        Ok(())
    }

    async fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        self.begin(StoreOp::Delete).await?;
        let mut tree = self.store.lock();
        tree.remove_subtree(path);
        tree.notify(path);
        Ok(())
    }

    async fn on_disconnect_delete(&self, path: &StorePath) -> Result<(), StoreError> {
        self.begin(StoreOp::OnDisconnect).await?;
        self.store
            .lock()
            .directives
            .entry(self.id)
            .or_default()
            .insert(path.clone());
        Ok(())
    }

    async fn cancel_on_disconnect(&self, path: &StorePath) -> Result<(), StoreError> {
        self.begin(StoreOp::CancelOnDisconnect).await?;
        if let Some(paths) = self.store.lock().directives.get_mut(&self.id) {
            paths.remove(path);
        }
        Ok(())
    }

    async fn watch(&self, path: &StorePath) -> Result<Subscription, StoreError> {
        self.begin(StoreOp::Watch).await?;
        let mut tree = self.store.lock();
        let (sender, receiver) = watch::channel(tree.snapshot(path));
        tree.watchers.push(Watcher {
            path: path.clone(),
            sender,
        });
        Ok(receiver)
    }

    fn connection_id(&self) -> ConnectionId {
        self.id
    }
}
