//! Lazily windowed row data for list- and grid-like connectors.
//!
//! The server half ([`DataCommunicator`]) pushes only the rows the client asks
//! for, identifying each by a short key. The client half ([`RowCache`]) keeps
//! the rows it was sent and answers with row requests and selections.

mod communicator;
mod key_mapper;

use std::collections::{BTreeMap, HashMap};

use crate::metadata::invoker::{arg, arg_i64, arg_str};
use crate::metadata::types::{INT, OBJECT, STRING};
use crate::metadata::{ClassEntry, InvocationError, Invoker, MethodEntry, Type};
use crate::protocol::DATA_REQUEST_RPC;
use crate::state::{StateObject, StateValue};

pub use communicator::{DataCommunicator, DataHandle, DataProvider, ListDataProvider};
pub use key_mapper::KeyMapper;

pub const SELECTION_RPC: &str = "SelectionServerRpc";
pub const CLIENT_RPC: &str = "DataCommunicatorClientRpc";

/// Row field carrying the row key.
pub const KEY_FIELD: &str = "k";
/// Row field set to `true` on selected rows.
pub const SELECTED_FIELD: &str = "s";

fn usize_arg(args: &[StateValue], index: usize) -> Result<usize, InvocationError> {
    let value = arg_i64(args, index)?;
    usize::try_from(value).map_err(|_| InvocationError::Argument {
        index,
        message: format!("{value} is not a valid row index"),
    })
}

fn rows_arg(args: &[StateValue], index: usize) -> Result<Vec<StateObject>, InvocationError> {
    let value = arg(args, index)?;
    let items = value.as_list().ok_or_else(|| InvocationError::Argument {
        index,
        message: format!("expected row list, got {}", value.kind()),
    })?;
    items
        .iter()
        .map(|item| match item {
            StateValue::Object(row) => Ok(row.clone()),
            StateValue::Map(fields) => Ok(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            other => Err(InvocationError::Argument {
                index,
                message: format!("expected row object, got {}", other.kind()),
            }),
        })
        .collect()
}

/// Metadata for the data interfaces. Include these in the eager bundle of
/// any table that uses data-backed connectors.
pub fn metadata_entries() -> Vec<ClassEntry> {
    vec![
        ClassEntry::rpc_interface(DATA_REQUEST_RPC)
            .method(
                MethodEntry::new("requestRows", vec![Type::new(INT), Type::new(INT)])
                    .no_loading_indicator()
                    .invoker(Invoker::method::<DataHandle, _>(|handle, ctx, args| {
                        let first = usize_arg(args, 0)?;
                        let count = usize_arg(args, 1)?;
                        handle.with(|core| core.request_rows(first, count));
                        ctx.mark_dirty();
                        Ok(())
                    })),
            )
            .method(
                MethodEntry::new("dropRows", vec![Type::list_of(Type::new(STRING))])
                    .no_loading_indicator()
                    .invoker(Invoker::method::<DataHandle, _>(|handle, _ctx, args| {
                        let keys: Vec<String> = arg(args, 0)?
                            .as_list()
                            .unwrap_or_default()
                            .iter()
                            .filter_map(|key| key.as_str().map(str::to_owned))
                            .collect();
                        handle.with(|core| core.drop_rows(&keys));
                        Ok(())
                    })),
            ),
        ClassEntry::rpc_interface(SELECTION_RPC)
            .method(
                MethodEntry::new("select", vec![Type::new(STRING)]).invoker(Invoker::method::<DataHandle, _>(
                    |handle, ctx, args| {
                        let key = arg_str(args, 0)?;
                        if handle.with(|core| core.select(key)) {
                            ctx.mark_dirty();
                        }
                        Ok(())
                    },
                )),
            )
            .method(
                MethodEntry::new("deselect", vec![Type::new(STRING)]).invoker(Invoker::method::<DataHandle, _>(
                    |handle, ctx, args| {
                        let key = arg_str(args, 0)?;
                        if handle.with(|core| core.deselect(key)) {
                            ctx.mark_dirty();
                        }
                        Ok(())
                    },
                )),
            ),
        ClassEntry::rpc_interface(CLIENT_RPC)
            .method(
                MethodEntry::new("reset", vec![Type::new(INT)]).invoker(Invoker::method::<RowCache, _>(
                    |cache, _ctx, args| {
                        cache.reset(usize_arg(args, 0)?);
                        Ok(())
                    },
                )),
            )
            .method(
                MethodEntry::new("setData", vec![Type::new(INT), Type::list_of(Type::new(OBJECT))]).invoker(
                    Invoker::method::<RowCache, _>(|cache, _ctx, args| {
                        cache.set_data(usize_arg(args, 0)?, rows_arg(args, 1)?);
                        Ok(())
                    }),
                ),
            )
            .method(
                MethodEntry::new("updateData", vec![Type::list_of(Type::new(OBJECT))]).invoker(
                    Invoker::method::<RowCache, _>(|cache, _ctx, args| {
                        cache.update_data(rows_arg(args, 0)?);
                        Ok(())
                    }),
                ),
            ),
    ]
}

/// Client-side store of the rows a data-backed connector was sent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RowCache {
    size: usize,
    rows: BTreeMap<usize, StateObject>,
    index_of: HashMap<String, usize>,
}

impl RowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn row(&self, index: usize) -> Option<&StateObject> {
        self.rows.get(&index)
    }

    pub fn cached(&self) -> usize {
        self.rows.len()
    }

    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.rows.get(&index)?.get(KEY_FIELD)?.as_str()
    }

    pub fn reset(&mut self, size: usize) {
        self.size = size;
        self.rows.clear();
        self.index_of.clear();
    }

    /// Stores a window of rows starting at `first`. Rows that only carry a
    /// key reuse the cached data for that key.
    pub fn set_data(&mut self, first: usize, rows: Vec<StateObject>) {
        let mut incoming = BTreeMap::new();
        for (offset, row) in rows.into_iter().enumerate() {
            let index = first + offset;
            let key = row.get(KEY_FIELD).and_then(StateValue::as_str).map(str::to_owned);
            let row = match &key {
                Some(key) if row.len() == 1 => self
                    .index_of
                    .get(key)
                    .and_then(|old| self.rows.get(old))
                    .cloned()
                    .unwrap_or(row),
                _ => row,
            };
            incoming.insert(index, row);
        }
        self.rows = incoming;
        self.index_of = self
            .rows
            .iter()
            .filter_map(|(index, row)| Some((row.get(KEY_FIELD)?.as_str()?.to_owned(), *index)))
            .collect();
        if let Some(last) = self.rows.keys().next_back() {
            self.size = self.size.max(last + 1);
        }
    }

    pub fn update_data(&mut self, rows: Vec<StateObject>) {
        for update in rows {
            let Some(index) = update
                .get(KEY_FIELD)
                .and_then(StateValue::as_str)
                .and_then(|key| self.index_of.get(key))
                .copied()
            else {
                continue;
            };
            if let Some(row) = self.rows.get_mut(&index) {
                for (field, value) in update.iter() {
                    if value.is_null() {
                        row.remove(field);
                    } else {
                        row.set(field, value.clone());
                    }
                }
            }
        }
    }
}
