use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::key_mapper::KeyMapper;
use super::{CLIENT_RPC, KEY_FIELD, SELECTED_FIELD, SELECTION_RPC};
use crate::config::DEFAULT_MIN_PUSH_ROWS;
use crate::protocol::DATA_REQUEST_RPC;
use crate::state::{StateObject, StateValue, changed_fields};
use crate::tracker::{Connector, ConnectorExtension, ResponseContext};

/// Source of rows for a [`DataCommunicator`].
pub trait DataProvider<T>: Send {
    fn size(&self) -> usize;
    fn fetch(&self, offset: usize, limit: usize) -> Vec<T>;
    /// Stable identity of an item across fetches.
    fn id(&self, item: &T) -> String;
}

/// In-memory provider. Clones share the same items.
pub struct ListDataProvider<T> {
    items: Arc<RwLock<Vec<T>>>,
    id: Arc<dyn Fn(&T) -> String + Send + Sync>,
}

impl<T> Clone for ListDataProvider<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            id: Arc::clone(&self.id),
        }
    }
}

impl<T: Clone + Send + Sync> ListDataProvider<T> {
    pub fn new(items: Vec<T>, id: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
            id: Arc::new(id),
        }
    }

    /// Edits the items in place. Call [`DataCommunicator::refresh`] or
    /// [`DataCommunicator::reset`] afterwards so the client catches up.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        f(&mut self.items.write())
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.items.read().get(index).cloned()
    }
}

impl<T: Clone + Send + Sync> DataProvider<T> for ListDataProvider<T> {
    fn size(&self) -> usize {
        self.items.read().len()
    }

    fn fetch(&self, offset: usize, limit: usize) -> Vec<T> {
        let items = self.items.read();
        items.iter().skip(offset).take(limit).cloned().collect()
    }

    fn id(&self, item: &T) -> String {
        (self.id)(item)
    }
}

type Generator<T> = Box<dyn Fn(&T, &mut StateObject) + Send>;

/// Requests arriving from the client through the data RPC interfaces.
pub(crate) trait DataRequests: Send {
    fn request_rows(&mut self, first: usize, count: usize);
    fn drop_rows(&mut self, keys: &[String]);
    fn select(&mut self, key: &str) -> bool;
    fn deselect(&mut self, key: &str) -> bool;
}

/// RPC target registered on the connector for the data and selection
/// interfaces.
#[derive(Clone)]
pub struct DataHandle {
    core: Arc<Mutex<dyn DataRequests>>,
}

impl DataHandle {
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut dyn DataRequests) -> R) -> R {
        let mut core = self.core.lock();
        f(&mut *core)
    }
}

struct Core<T> {
    provider: Box<dyn DataProvider<T>>,
    generators: Vec<Generator<T>>,
    keys: KeyMapper<String>,
    /// Item ids the client currently holds, mapped to their row index.
    active: HashMap<String, usize>,
    /// Last row object sent for each active key.
    sent: HashMap<String, StateObject>,
    push_range: Range<usize>,
    reset: bool,
    updated: Vec<T>,
    selected: HashSet<String>,
}

impl<T> Core<T> {
    fn generate(&self, item: &T, id: &str, key: &str) -> StateObject {
        let mut row = StateObject::new();
        for generator in &self.generators {
            generator(item, &mut row);
        }
        row.set(KEY_FIELD, key);
        if self.selected.contains(id) {
            row.set(SELECTED_FIELD, true);
        }
        row
    }

    fn release(&mut self, id: &str) {
        self.active.remove(id);
        if let Some(key) = self.keys.remove(&id.to_owned()) {
            self.sent.remove(&key);
        }
    }

    /// Queues the active item `id` for an `updateData` row.
    fn queue_update(&mut self, id: &str) {
        let Some(&index) = self.active.get(id) else {
            return;
        };
        match self.provider.fetch(index, 1).into_iter().next() {
            Some(item) if self.provider.id(&item) == id => self.updated.push(item),
            _ => trace!(id, index, "item moved before its row update"),
        }
    }

    fn before_response(&mut self, ctx: &mut ResponseContext<'_>) {
        let initial = ctx.is_initial();
        if initial || self.reset {
            let size = self.provider.size();
            trace!(connector = %ctx.connector(), size, "resetting client data");
            self.keys.clear();
            self.active.clear();
            self.sent.clear();
            ctx.call(CLIENT_RPC, "reset", vec![StateValue::from(size)]);
        }

        let mut trigger_reset = false;
        if !self.push_range.is_empty() {
            let start = self.push_range.start;
            let rows = self.provider.fetch(start, self.push_range.len());
            if rows.is_empty() && !initial && !self.reset {
                trigger_reset = true;
            }
            self.push_rows(ctx, start, rows);
        }

        if !self.updated.is_empty() {
            self.push_updates(ctx);
        }

        self.push_range = 0..0;
        self.reset = trigger_reset;
    }

    fn push_rows(&mut self, ctx: &mut ResponseContext<'_>, start: usize, items: Vec<T>) {
        let mut window = HashSet::with_capacity(items.len());
        let mut rows = Vec::with_capacity(items.len());
        for (offset, item) in items.iter().enumerate() {
            let id = self.provider.id(item);
            let key = self.keys.key(&id);
            let row = if self.active.contains_key(&id) && self.sent.contains_key(&key) {
                StateObject::new().with(KEY_FIELD, key.clone())
            } else {
                let full = self.generate(item, &id, &key);
                self.sent.insert(key.clone(), full.clone());
                full
            };
            self.active.insert(id.clone(), start + offset);
            window.insert(id);
            rows.push(StateValue::Object(row));
        }

        let leaving: Vec<String> = self
            .active
            .keys()
            .filter(|id| !window.contains(*id))
            .cloned()
            .collect();
        for id in &leaving {
            self.release(id);
        }
        debug!(
            connector = %ctx.connector(),
            start,
            rows = rows.len(),
            released = leaving.len(),
            "pushing rows"
        );
        ctx.call(CLIENT_RPC, "setData", vec![StateValue::from(start), StateValue::List(rows)]);
    }

    fn push_updates(&mut self, ctx: &mut ResponseContext<'_>) {
        let updated = std::mem::take(&mut self.updated);
        let mut rows = Vec::new();
        let mut seen = HashSet::new();
        for item in updated.iter().rev() {
            let id = self.provider.id(item);
            if !seen.insert(id.clone()) || !self.active.contains_key(&id) {
                continue;
            }
            let Some(key) = self.keys.key_of(&id).map(str::to_owned) else {
                continue;
            };
            let row = self.generate(item, &id, &key);
            let changes = match self.sent.get(&key) {
                Some(previous) => changed_fields(&row, previous),
                None => row.field_names().map(str::to_owned).collect(),
            };
            if changes.is_empty() {
                continue;
            }
            let mut partial = StateObject::new().with(KEY_FIELD, key.clone());
            for field in changes {
                let value = row.get(&field).cloned().unwrap_or(StateValue::Null);
                partial.set(field, value);
            }
            self.sent.insert(key, row);
            rows.push(StateValue::Object(partial));
        }
        if !rows.is_empty() {
            rows.reverse();
            ctx.call(CLIENT_RPC, "updateData", vec![StateValue::List(rows)]);
        }
    }
}

impl<T: Send> DataRequests for Core<T> {
    fn request_rows(&mut self, first: usize, count: usize) {
        let end = first.saturating_add(count).min(self.provider.size());
        self.push_range = first.min(end)..end;
    }

    fn drop_rows(&mut self, keys: &[String]) {
        for key in keys {
            match self.keys.get(key).cloned() {
                Some(id) => self.release(&id),
                None => trace!(key = %key, "dropRows for unknown key"),
            }
        }
    }

    fn select(&mut self, key: &str) -> bool {
        let Some(id) = self.keys.get(key).cloned() else {
            debug!(key, "ignoring selection of stale key");
            return false;
        };
        let changed = self.selected.insert(id.clone());
        if changed {
            self.queue_update(&id);
        }
        changed
    }

    fn deselect(&mut self, key: &str) -> bool {
        let Some(id) = self.keys.get(key).cloned() else {
            return false;
        };
        let changed = self.selected.remove(&id);
        if changed {
            self.queue_update(&id);
        }
        changed
    }
}

/// Serves a windowed, keyed view of a data provider to one connector.
///
/// Clones share state: keep one to call [`refresh`](Self::refresh) or
/// [`reset`](Self::reset) and install another on the connector with
/// [`into_connector`](Self::into_connector).
pub struct DataCommunicator<T> {
    core: Arc<Mutex<Core<T>>>,
}

impl<T> Clone for DataCommunicator<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + 'static> DataCommunicator<T> {
    pub fn new(provider: impl DataProvider<T> + 'static) -> Self {
        Self {
            core: Arc::new(Mutex::new(Core {
                provider: Box::new(provider),
                generators: Vec::new(),
                keys: KeyMapper::new(),
                active: HashMap::new(),
                sent: HashMap::new(),
                push_range: 0..DEFAULT_MIN_PUSH_ROWS,
                reset: false,
                updated: Vec::new(),
                selected: HashSet::new(),
            })),
        }
    }

    /// Rows pushed unasked in the first response.
    pub fn with_min_push_rows(self, rows: usize) -> Self {
        self.core.lock().push_range = 0..rows;
        self
    }

    /// Adds a generator that writes fields of the row object for an item.
    pub fn with_generator(self, generator: impl Fn(&T, &mut StateObject) + Send + 'static) -> Self {
        self.core.lock().generators.push(Box::new(generator));
        self
    }

    pub fn handle(&self) -> DataHandle {
        let core: Arc<Mutex<dyn DataRequests>> = self.core.clone();
        DataHandle { core }
    }

    /// Builds a connector of `type_name` served by this communicator.
    pub fn into_connector(self, type_name: &str) -> Connector {
        let handle = self.handle();
        Connector::new(type_name)
            .with_rpc(DATA_REQUEST_RPC, handle.clone())
            .with_rpc(SELECTION_RPC, handle)
            .with_client_rpc(CLIENT_RPC)
            .with_extension(self)
    }

    /// Queues an update for `item` if the client currently holds it.
    pub fn refresh(&self, item: &T) -> bool {
        let mut core = self.core.lock();
        let id = core.provider.id(item);
        if core.active.contains_key(&id) {
            core.updated.push(item.clone());
            true
        } else {
            false
        }
    }

    /// Drops everything the client holds; it re-requests rows after the
    /// next response.
    pub fn reset(&self) {
        self.core.lock().reset = true;
    }

    pub fn selected(&self) -> Vec<String> {
        let mut selected: Vec<String> = self.core.lock().selected.iter().cloned().collect();
        selected.sort();
        selected
    }

    pub fn key_of(&self, item_id: &str) -> Option<String> {
        self.core.lock().keys.key_of(&item_id.to_owned()).map(str::to_owned)
    }

    pub fn active_count(&self) -> usize {
        self.core.lock().active.len()
    }
}

impl<T: Clone + Send + 'static> ConnectorExtension for DataCommunicator<T> {
    fn before_client_response(&mut self, ctx: &mut ResponseContext<'_>) {
        self.core.lock().before_response(ctx);
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
