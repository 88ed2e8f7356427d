//! Field-level deltas between a state object and its last-sent shadow.
//!
//! Nested beans are diffed recursively so only their changed fields travel.
//! Lists, sets and maps are replaced wholesale whenever they differ.

use serde_json::{Map, Value};

use super::codec::{encode, encode_object, property_type};
use super::{CodecError, StateObject, StateValue};
use crate::metadata::{Type, TypeDataStore, TypeKind};

/// Names of fields whose value differs between `current` and `shadow`,
/// including fields that disappeared from `current`.
pub fn changed_fields(current: &StateObject, shadow: &StateObject) -> Vec<String> {
    let mut changed: Vec<String> = current
        .iter()
        .filter(|(field, value)| shadow.get(field) != Some(*value))
        .map(|(field, _)| field.to_owned())
        .collect();
    changed.extend(
        shadow
            .field_names()
            .filter(|field| !current.contains(field))
            .map(str::to_owned),
    );
    changed
}

/// Encodes the fields of `current` that differ from `shadow`.
///
/// Without a shadow every field is encoded. Removed fields are sent as
/// explicit nulls.
pub fn encode_delta(
    current: &StateObject,
    shadow: Option<&StateObject>,
    type_name: Option<&str>,
    store: &TypeDataStore,
) -> Result<Map<String, Value>, CodecError> {
    let Some(shadow) = shadow else {
        return encode_object(current, type_name, store);
    };

    let mut delta = Map::new();
    for field in changed_fields(current, shadow) {
        let Some(value) = current.get(&field) else {
            delta.insert(field, Value::Null);
            continue;
        };
        let ty = property_type(type_name, &field, store)?;
        let nested = ty.as_ref().and_then(|ty| bean_type(ty, store));
        let json = match (value, shadow.get(&field), nested) {
            (StateValue::Object(now), Some(StateValue::Object(before)), Some(nested)) => {
                Value::Object(encode_delta(now, Some(before), Some(nested.as_str()), store).map_err(|e| e.in_field(&field))?)
            }
            _ => encode(value, ty.as_ref(), store).map_err(|e| e.in_field(&field))?,
        };
        delta.insert(field, json);
    }
    Ok(delta)
}

/// Applies a delta to `target`, returning the names of the fields it touched.
///
/// Fields absent from the delta are left alone, null fields are removed and
/// nested beans are merged field by field. Nothing is written unless the
/// whole delta decodes.
pub fn merge_delta(
    target: &mut StateObject,
    delta: &Map<String, Value>,
    type_name: Option<&str>,
    store: &TypeDataStore,
) -> Result<Vec<String>, CodecError> {
    let mut staged = target.clone();
    let changed = merge_into(&mut staged, delta, type_name, store)?;
    *target = staged;
    Ok(changed)
}

fn merge_into(
    target: &mut StateObject,
    delta: &Map<String, Value>,
    type_name: Option<&str>,
    store: &TypeDataStore,
) -> Result<Vec<String>, CodecError> {
    let mut changed = Vec::with_capacity(delta.len());
    for (field, json) in delta {
        let ty = property_type(type_name, field, store)?;
        if let (Some(type_name), None) = (type_name, &ty) {
            return Err(CodecError::UnknownProperty {
                type_name: type_name.to_owned(),
                property: field.clone(),
            });
        }

        if json.is_null() {
            if target.remove(field).is_some() {
                changed.push(field.clone());
            }
            continue;
        }

        let nested = ty.as_ref().and_then(|ty| bean_type(ty, store));
        if let (Some(nested), Value::Object(fields)) = (&nested, json) {
            if let Some(StateValue::Object(existing)) = target.get_mut(field) {
                merge_into(existing, fields, Some(nested.as_str()), store).map_err(|e| e.in_field(field))?;
                changed.push(field.clone());
                continue;
            }
        }

        let value = match &ty {
            Some(ty) => super::codec::decode(json, ty, store).map_err(|e| e.in_field(field))?,
            None => StateValue::from_json_untyped(json),
        };
        target.set(field.clone(), value);
        changed.push(field.clone());
    }
    Ok(changed)
}

fn bean_type(ty: &Type, store: &TypeDataStore) -> Option<String> {
    if ty.builtin().is_some() {
        return None;
    }
    let descriptor = store.get_type(ty.base_name()).ok()?;
    match descriptor.kind {
        TypeKind::Bean | TypeKind::Value if !descriptor.has_serializer() => Some(descriptor.name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::{INT, STRING};
    use crate::metadata::{BundleKind, BundleSpec, BundleTable, ClassEntry};
    use serde_json::json;

    fn store() -> TypeDataStore {
        let table = BundleTable::new().with_bundle(BundleSpec::new(
            "__eager",
            BundleKind::Eager,
            Vec::<String>::new(),
            || {
                vec![
                    ClassEntry::bean("Insets")
                        .property("top", Type::new(INT))
                        .property("left", Type::new(INT)),
                    ClassEntry::connector("Panel")
                        .property("caption", Type::new(STRING))
                        .property("padding", Type::new("Insets"))
                        .property("items", Type::list_of(Type::new(STRING))),
                ]
            },
        ));
        let store = TypeDataStore::new(table);
        store.bootstrap().expect("bootstrap");
        store
    }

    fn panel(caption: &str, top: i64, items: &[&str]) -> StateObject {
        StateObject::new()
            .with("caption", caption)
            .with("padding", StateObject::new().with("top", top).with("left", 0))
            .with(
                "items",
                items.iter().map(|item| StateValue::from(*item)).collect::<Vec<_>>(),
            )
    }

    #[test_timeout::timeout]
    fn no_shadow_sends_everything() {
        let store = store();
        let delta = encode_delta(&panel("A", 1, &["x"]), None, Some("Panel"), &store).expect("delta");
        assert_eq!(
            Value::Object(delta),
            json!({"caption": "A", "padding": {"top": 1, "left": 0}, "items": ["x"]})
        );
    }

    #[test_timeout::timeout]
    fn unchanged_state_yields_empty_delta() {
        let store = store();
        let state = panel("A", 1, &["x"]);
        let delta = encode_delta(&state, Some(&state.clone()), Some("Panel"), &store).expect("delta");
        assert!(delta.is_empty());
    }

    #[test_timeout::timeout]
    fn nested_beans_diff_by_field_and_lists_are_replaced() {
        let store = store();
        let before = panel("A", 1, &["x", "y"]);
        let after = panel("A", 5, &["x", "y", "z"]);
        let delta = encode_delta(&after, Some(&before), Some("Panel"), &store).expect("delta");
        assert_eq!(
            Value::Object(delta.clone()),
            json!({"padding": {"top": 5}, "items": ["x", "y", "z"]})
        );

        let mut projection = before.clone();
        let touched = merge_delta(&mut projection, &delta, Some("Panel"), &store).expect("merge");
        assert_eq!(projection, after);
        assert_eq!(touched, vec!["items".to_owned(), "padding".to_owned()]);
    }

    #[test_timeout::timeout]
    fn failed_merge_leaves_target_untouched() {
        let store = store();
        let mut projection = panel("A", 1, &[]);
        let original = projection.clone();
        let delta = json!({"caption": "B", "padding": {"top": "high"}});
        let err = merge_delta(&mut projection, delta.as_object().expect("object"), Some("Panel"), &store);
        assert!(err.is_err());
        assert_eq!(projection, original);
    }

    #[test_timeout::timeout]
    fn removed_fields_travel_as_null_and_are_dropped() {
        let store = store();
        let before = panel("A", 1, &["x"]);
        let mut after = before.clone();
        after.remove("caption");
        let delta = encode_delta(&after, Some(&before), Some("Panel"), &store).expect("delta");
        assert_eq!(Value::Object(delta.clone()), json!({"caption": null}));

        let mut projection = before.clone();
        let touched = merge_delta(&mut projection, &delta, Some("Panel"), &store).expect("merge");
        assert_eq!(projection, after);
        assert_eq!(touched, vec!["caption".to_owned()]);
    }
}
