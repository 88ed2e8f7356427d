//! A small widget catalog: the metadata table a generator would emit for a
//! root layout, buttons, labels and a lazily loaded data grid, plus the
//! server handlers and client widgets that go with it.
//!
//! The binary serves this UI and the integration tests drive it.

use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::data::{self, DataCommunicator, ListDataProvider, RowCache};
use crate::identity::ConnectorId;
use crate::metadata::bundle::{DEFERRED_BUNDLE, EAGER_BUNDLE};
use crate::metadata::invoker::{arg, arg_i64, arg_str};
use crate::metadata::types::{BOOLEAN, DOUBLE, INT, STRING};
use crate::metadata::{
    BundleKind, BundleSpec, BundleTable, ClassEntry, InvocationError, Invoker, MetadataError, MethodEntry,
    ProxyHandle, Type, TypeDataStore, TypeKind, ValueSerializer,
};
use crate::session::{SessionError, UiSession};
use crate::state::{CodecError, StateObject, StateValue};
use crate::tracker::Connector;

pub const ROOT: &str = "trellis.Root";
pub const BUTTON: &str = "trellis.Button";
pub const LABEL: &str = "trellis.Label";
pub const LABEL_STYLE: &str = "trellis.LabelStyle";
pub const INSETS: &str = "trellis.Insets";
pub const COLOR: &str = "trellis.Color";
pub const GRID: &str = "trellis.Grid";

pub const BUTTON_SERVER_RPC: &str = "ButtonServerRpc";
pub const BUTTON_CLIENT_RPC: &str = "ButtonClientRpc";
pub const PROGRESS_CLIENT_RPC: &str = "ProgressClientRpc";
pub const NOTIFICATION_CLIENT_RPC: &str = "NotificationClientRpc";

/// Lazy bundle holding the grid.
pub const GRID_BUNDLE: &str = "grid";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RootWidget {
    pub title: String,
    pub progress: Option<f64>,
    pub notifications: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ButtonWidget {
    pub caption: String,
    pub clicks: i64,
    pub focused: bool,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LabelWidget {
    pub text: String,
    pub style: String,
}

/// Client-side stand-in for a server button: calls made through it are
/// queued on the owning projection.
pub struct ButtonProxy(ProxyHandle);

impl ButtonProxy {
    pub fn click(&self) {
        self.0.invoke("click", Vec::new());
    }
}

/// Server-side click handler.
#[derive(Debug, Default)]
pub struct ButtonHandler {
    clicks: i64,
}

/// `#rrggbb` on the wire, `{r, g, b}` in state.
struct HexColor;

impl ValueSerializer for HexColor {
    fn serialize(&self, value: &StateValue) -> Result<Value, CodecError> {
        let color = value
            .as_object()
            .ok_or_else(|| CodecError::Custom(format!("expected color object, got {}", value.kind())))?;
        let channel = |name: &str| -> Result<u8, CodecError> {
            color
                .get(name)
                .and_then(StateValue::as_i64)
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| CodecError::Custom(format!("color channel '{name}' must be 0..=255")))
        };
        Ok(Value::String(format!(
            "#{:02x}{:02x}{:02x}",
            channel("r")?,
            channel("g")?,
            channel("b")?
        )))
    }

    fn deserialize(&self, json: &Value) -> Result<StateValue, CodecError> {
        let text = json
            .as_str()
            .and_then(|text| text.strip_prefix('#'))
            .filter(|hex| hex.len() == 6)
            .ok_or_else(|| CodecError::mismatch(COLOR, json))?;
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&text[range], 16).map_err(|err| CodecError::Custom(err.to_string()))
        };
        Ok(StateValue::Object(
            StateObject::new()
                .with("r", i64::from(channel(0..2)?))
                .with("g", i64::from(channel(2..4)?))
                .with("b", i64::from(channel(4..6)?)),
        ))
    }
}

pub fn color(r: u8, g: u8, b: u8) -> StateValue {
    StateValue::Object(
        StateObject::new()
            .with("r", i64::from(r))
            .with("g", i64::from(g))
            .with("b", i64::from(b)),
    )
}

fn text_setter<W: 'static>(apply: fn(&mut W, String)) -> Invoker {
    Invoker::method::<W, _>(move |widget, _, args| {
        let text = match arg(args, 0)? {
            StateValue::Null => String::new(),
            value => value
                .as_str()
                .ok_or_else(|| InvocationError::Argument {
                    index: 0,
                    message: format!("expected text, got {}", value.kind()),
                })?
                .to_owned(),
        };
        apply(widget, text);
        Ok(())
    })
}

fn eager() -> Vec<ClassEntry> {
    let mut entries = vec![
        ClassEntry::connector(ROOT)
            .constructor(|| Box::new(RootWidget::default()))
            .property_with_setter("title", Type::new(STRING), text_setter::<RootWidget>(|w, text| w.title = text)),
        ClassEntry::rpc_interface(BUTTON_SERVER_RPC)
            .method(MethodEntry::new("click", vec![]).invoker(Invoker::method::<ButtonHandler, _>(
                |handler, ctx, _| {
                    handler.clicks += 1;
                    let clicks = handler.clicks;
                    let state = ctx
                        .state_mut()
                        .ok_or_else(|| InvocationError::Failed("button has no state".into()))?;
                    state.set("clickCount", clicks);
                    ctx.call(BUTTON_CLIENT_RPC, "focus", Vec::new());
                    Ok(())
                },
            )))
            .proxy(|handle| Box::new(ButtonProxy(handle))),
        ClassEntry::rpc_interface(BUTTON_CLIENT_RPC).method(MethodEntry::new("focus", vec![]).invoker(
            Invoker::method::<ButtonWidget, _>(|widget, _, _| {
                widget.focused = true;
                Ok(())
            }),
        )),
        ClassEntry::rpc_interface(PROGRESS_CLIENT_RPC).method(
            MethodEntry::new("progress", vec![Type::new(DOUBLE)])
                .last_only()
                .no_loading_indicator()
                .invoker(Invoker::method::<RootWidget, _>(|widget, _, args| {
                    let value = arg(args, 0)?;
                    widget.progress = Some(value.as_f64().ok_or_else(|| InvocationError::Argument {
                        index: 0,
                        message: format!("expected number, got {}", value.kind()),
                    })?);
                    Ok(())
                })),
        ),
        ClassEntry::rpc_interface(NOTIFICATION_CLIENT_RPC).method(
            MethodEntry::new("notify", vec![Type::new(STRING)])
                .delayed()
                .invoker(Invoker::method::<RootWidget, _>(|widget, _, args| {
                    widget.notifications.push(arg_str(args, 0)?.to_owned());
                    Ok(())
                })),
        ),
    ];
    entries.extend(data::metadata_entries());
    entries
}

fn deferred() -> Vec<ClassEntry> {
    vec![
        ClassEntry::connector(BUTTON)
            .constructor(|| Box::new(ButtonWidget::default()))
            .property_with_setter(
                "caption",
                Type::new(STRING),
                text_setter::<ButtonWidget>(|w, text| w.caption = text),
            )
            .property_with_setter(
                "clickCount",
                Type::new(INT),
                Invoker::method::<ButtonWidget, _>(|widget, _, args| {
                    widget.clicks = arg_i64(args, 0)?;
                    Ok(())
                }),
            )
            .property("enabled", Type::new(BOOLEAN)),
        ClassEntry::enumeration(LABEL_STYLE, ["PLAIN", "BOLD", "MUTED"]),
        ClassEntry::bean(INSETS)
            .property("top", Type::new(INT))
            .property("right", Type::new(INT))
            .property("bottom", Type::new(INT))
            .property("left", Type::new(INT)),
        ClassEntry::new(COLOR, TypeKind::Value).serializer(|| Box::new(HexColor)),
        ClassEntry::connector(LABEL)
            .constructor(|| Box::new(LabelWidget::default()))
            .property_with_setter("value", Type::new(STRING), text_setter::<LabelWidget>(|w, text| w.text = text))
            .property_with_setter(
                "style",
                Type::new(LABEL_STYLE),
                text_setter::<LabelWidget>(|w, style| w.style = style),
            )
            .property("tags", Type::set_of(Type::new(STRING)))
            .property("attributes", Type::map_of(Type::new(STRING)))
            .property("items", Type::list_of(Type::new(STRING)))
            .property("padding", Type::new(INSETS))
            .property("color", Type::new(COLOR)),
    ]
}

fn grid() -> Vec<ClassEntry> {
    vec![
        ClassEntry::connector(GRID)
            .constructor(|| Box::new(RowCache::new()))
            .property("caption", Type::new(STRING)),
    ]
}

/// The catalog's bundle table.
pub fn bundles() -> BundleTable {
    BundleTable::new()
        .with_bundle(BundleSpec::new(
            EAGER_BUNDLE,
            BundleKind::Eager,
            [
                ROOT,
                BUTTON_SERVER_RPC,
                BUTTON_CLIENT_RPC,
                PROGRESS_CLIENT_RPC,
                NOTIFICATION_CLIENT_RPC,
                crate::protocol::DATA_REQUEST_RPC,
                data::SELECTION_RPC,
                data::CLIENT_RPC,
            ],
            eager,
        ))
        .with_bundle(BundleSpec::new(
            DEFERRED_BUNDLE,
            BundleKind::Deferred,
            [BUTTON, LABEL, LABEL_STYLE, INSETS, COLOR],
            deferred,
        ))
        .with_bundle(BundleSpec::new(GRID_BUNDLE, BundleKind::Lazy, [GRID], grid))
}

/// Bootstrapped store for the catalog. The grid bundle stays unloaded until
/// first use.
pub fn store() -> Result<Arc<TypeDataStore>, MetadataError> {
    let store = TypeDataStore::new(bundles());
    store.bootstrap()?;
    Ok(Arc::new(store))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: u32,
    pub name: String,
    pub age: i64,
}

pub fn people(count: u32) -> Vec<Person> {
    (0..count)
        .map(|id| Person {
            id,
            name: format!("person-{id}"),
            age: 20 + i64::from(id % 50),
        })
        .collect()
}

/// Ids and data handles of the demo UI.
pub struct DemoUi {
    pub root: ConnectorId,
    pub button: ConnectorId,
    pub label: ConnectorId,
    pub grid: ConnectorId,
    pub people: ListDataProvider<Person>,
    pub data: DataCommunicator<Person>,
}

/// Builds a session showing a button, a label and a grid of `rows` people.
pub fn build(config: Config, store: Arc<TypeDataStore>, rows: u32) -> Result<(UiSession, DemoUi), SessionError> {
    let min_push_rows = config.min_push_rows;
    let mut ui = UiSession::new(config, store, Connector::new(ROOT).with_field("title", "Trellis demo"))?;
    let root = ui.root_id().clone();

    let tracker = ui.tracker_mut();
    let button = tracker.attach(
        &root,
        Connector::new(BUTTON)
            .with_field("caption", "Click me")
            .with_field("clickCount", 0i64)
            .with_rpc(BUTTON_SERVER_RPC, ButtonHandler::default())
            .with_client_rpc(BUTTON_CLIENT_RPC),
    )?;
    let label = tracker.attach(
        &root,
        Connector::new(LABEL)
            .with_field("value", "")
            .with_field("style", StateValue::Enum("PLAIN".into()))
            .with_field("color", color(0x20, 0x20, 0x20)),
    )?;

    let people = ListDataProvider::new(people(rows), |person: &Person| person.id.to_string());
    let data = DataCommunicator::new(people.clone())
        .with_min_push_rows(min_push_rows)
        .with_generator(|person: &Person, row: &mut StateObject| {
            row.set("name", person.name.clone());
            row.set("age", person.age);
        });
    let grid = tracker.attach(
        &root,
        data.clone().into_connector(GRID).with_field("caption", "People"),
    )?;

    Ok((
        ui,
        DemoUi {
            root,
            button,
            label,
            grid,
            people,
            data,
        },
    ))
}

/// One server-side timer tick: updates the label, reports progress and
/// posts a notification.
pub fn tick(ui: &mut UiSession, demo: &DemoUi, n: u64) -> Result<(), SessionError> {
    ui.tracker_mut().set_field(&demo.label, "value", format!("tick {n}"))?;
    let progress = (n % 10) as f64 / 10.0;
    let root = demo.root.clone();
    for (interface, method, args) in [
        (PROGRESS_CLIENT_RPC, "progress", vec![StateValue::from(progress)]),
        (NOTIFICATION_CLIENT_RPC, "notify", vec![StateValue::from(format!("tick {n}"))]),
    ] {
        if let Err(err) = ui.call_client(&root, interface, method, args) {
            tracing::warn!(interface, error = %err, "tick call rejected");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn grid_bundle_loads_on_first_use() {
        let store = store().expect("store");
        assert!(store.has_type(LABEL));
        assert!(!store.is_bundle_loaded(GRID_BUNDLE));
        assert!(matches!(
            store.get_type(GRID),
            Err(MetadataError::NotYetAvailable { .. })
        ));
        store.ensure_loaded(GRID).expect("grid");
        assert!(store.is_bundle_loaded(GRID_BUNDLE));
    }

    #[test_timeout::timeout]
    fn colors_travel_as_hex() {
        let store = store().expect("store");
        let ty = Type::new(COLOR);
        let json = crate::state::codec::encode(&color(255, 0, 16), Some(&ty), &store).expect("encode");
        assert_eq!(json, json!("#ff0010"));
        let back = crate::state::codec::decode(&json, &ty, &store).expect("decode");
        assert_eq!(back, color(255, 0, 16));
    }
}
