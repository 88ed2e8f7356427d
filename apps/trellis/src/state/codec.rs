//! Typed JSON encoding of state values.
//!
//! The declared [`Type`] decides how a value is written and read back:
//! enums travel as their constant name, connectors as their id, beans as
//! JSON objects, and anything registered with a custom serializer goes
//! through it instead of the built-in rules.

use serde_json::{Map, Number, Value};

use super::{CodecError, StateObject, StateValue};
use crate::identity::ConnectorId;
use crate::metadata::{Builtin, Type, TypeDataStore, TypeKind};

pub fn encode(value: &StateValue, ty: Option<&Type>, store: &TypeDataStore) -> Result<Value, CodecError> {
    let Some(ty) = ty else {
        return Ok(value.to_json());
    };
    if value.is_null() {
        return Ok(Value::Null);
    }
    if let Some(serializer) = store.serializer(ty) {
        return serializer.serialize(value);
    }

    let mismatch = || CodecError::TypeMismatch {
        expected: ty.to_string(),
        found: value.kind().to_owned(),
    };

    match ty.builtin() {
        Some(Builtin::Boolean) => value.as_bool().map(Value::Bool).ok_or_else(mismatch),
        Some(Builtin::Integer) => value.as_i64().map(|v| Value::Number(v.into())).ok_or_else(mismatch),
        Some(Builtin::Float) => {
            let float = value.as_f64().ok_or_else(mismatch)?;
            Number::from_f64(float)
                .map(Value::Number)
                .ok_or_else(|| CodecError::Custom(format!("{float} cannot be represented in JSON")))
        }
        Some(Builtin::String) => match value {
            StateValue::String(text) => Ok(Value::String(text.clone())),
            _ => Err(mismatch()),
        },
        Some(Builtin::List) | Some(Builtin::Set) => {
            let items = value.as_list().ok_or_else(mismatch)?;
            let item_ty = ty.param(0);
            items
                .iter()
                .map(|item| encode(item, item_ty, store))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Some(Builtin::Map) => match value {
            StateValue::Map(entries) => {
                let value_ty = ty.param(1);
                let mut out = Map::with_capacity(entries.len());
                for (key, entry) in entries {
                    out.insert(key.clone(), encode(entry, value_ty, store).map_err(|e| e.in_field(key))?);
                }
                Ok(Value::Object(out))
            }
            _ => Err(mismatch()),
        },
        Some(Builtin::Connector) => value
            .as_connector()
            .map(|id| Value::String(id.as_str().to_owned()))
            .ok_or_else(mismatch),
        Some(Builtin::Object) | Some(Builtin::Void) => Ok(value.to_json()),
        None => {
            let descriptor = store.get_type(ty.base_name())?;
            match &descriptor.kind {
                TypeKind::Enum { constants } => {
                    let constant = match value {
                        StateValue::Enum(name) | StateValue::String(name) => name,
                        _ => return Err(mismatch()),
                    };
                    if !constants.contains(constant) {
                        return Err(CodecError::UnknownEnumConstant {
                            type_name: descriptor.name.clone(),
                            constant: constant.clone(),
                        });
                    }
                    Ok(Value::String(constant.clone()))
                }
                TypeKind::Bean | TypeKind::Value | TypeKind::Connector => match value {
                    StateValue::Object(object) => encode_object(object, Some(&descriptor.name), store).map(Value::Object),
                    _ => Err(mismatch()),
                },
                TypeKind::RpcInterface => Ok(value.to_json()),
            }
        }
    }
}

/// Encodes every field of `object`, typing each through the properties of
/// `type_name` when one is given.
pub fn encode_object(
    object: &StateObject,
    type_name: Option<&str>,
    store: &TypeDataStore,
) -> Result<Map<String, Value>, CodecError> {
    let mut out = Map::with_capacity(object.len());
    for (field, value) in object.iter() {
        let ty = property_type(type_name, field, store)?;
        let json = encode(value, ty.as_ref(), store).map_err(|e| e.in_field(field))?;
        out.insert(field.to_owned(), json);
    }
    Ok(out)
}

pub fn decode(json: &Value, ty: &Type, store: &TypeDataStore) -> Result<StateValue, CodecError> {
    if json.is_null() {
        return Ok(StateValue::Null);
    }
    if let Some(serializer) = store.serializer(ty) {
        return serializer.deserialize(json);
    }
    let expected = || CodecError::mismatch(ty.to_string(), json);

    match ty.builtin() {
        Some(Builtin::Boolean) => json.as_bool().map(StateValue::Bool).ok_or_else(expected),
        Some(Builtin::Integer) => json.as_i64().map(StateValue::Int).ok_or_else(expected),
        Some(Builtin::Float) => json.as_f64().map(StateValue::Float).ok_or_else(expected),
        Some(Builtin::String) => json
            .as_str()
            .map(|text| StateValue::String(text.to_owned()))
            .ok_or_else(expected),
        Some(Builtin::List) => decode_items(json, ty, store).map(StateValue::List),
        Some(Builtin::Set) => decode_items(json, ty, store).map(StateValue::Set),
        Some(Builtin::Map) => {
            let entries = json.as_object().ok_or_else(expected)?;
            let value_ty = ty.param(1);
            entries
                .iter()
                .map(|(key, value)| {
                    let decoded = match value_ty {
                        Some(value_ty) => decode(value, value_ty, store),
                        None => Ok(StateValue::from_json_untyped(value)),
                    };
                    decoded.map(|v| (key.clone(), v)).map_err(|e| e.in_field(key))
                })
                .collect::<Result<_, _>>()
                .map(StateValue::Map)
        }
        Some(Builtin::Connector) => json
            .as_str()
            .map(|id| StateValue::Connector(ConnectorId::new(id)))
            .ok_or_else(expected),
        Some(Builtin::Object) | Some(Builtin::Void) => Ok(StateValue::from_json_untyped(json)),
        None => {
            let descriptor = store.get_type(ty.base_name())?;
            match &descriptor.kind {
                TypeKind::Enum { constants } => {
                    let constant = json.as_str().ok_or_else(expected)?;
                    if !constants.iter().any(|c| c == constant) {
                        return Err(CodecError::UnknownEnumConstant {
                            type_name: descriptor.name.clone(),
                            constant: constant.to_owned(),
                        });
                    }
                    Ok(StateValue::Enum(constant.to_owned()))
                }
                TypeKind::Bean | TypeKind::Value | TypeKind::Connector => {
                    let fields = json.as_object().ok_or_else(expected)?;
                    decode_object(fields, &descriptor.name, store).map(StateValue::Object)
                }
                TypeKind::RpcInterface => Ok(StateValue::from_json_untyped(json)),
            }
        }
    }
}

pub fn decode_object(
    fields: &Map<String, Value>,
    type_name: &str,
    store: &TypeDataStore,
) -> Result<StateObject, CodecError> {
    fields
        .iter()
        .map(|(field, json)| {
            let ty = store.property(type_name, field)?.ok_or_else(|| CodecError::UnknownProperty {
                type_name: type_name.to_owned(),
                property: field.clone(),
            })?;
            decode(json, &ty.ty, store)
                .map(|value| (field.clone(), value))
                .map_err(|e| e.in_field(field))
        })
        .collect()
}

fn decode_items(json: &Value, ty: &Type, store: &TypeDataStore) -> Result<Vec<StateValue>, CodecError> {
    let items = json
        .as_array()
        .ok_or_else(|| CodecError::mismatch(ty.to_string(), json))?;
    let item_ty = ty.param(0);
    items
        .iter()
        .map(|item| match item_ty {
            Some(item_ty) => decode(item, item_ty, store),
            None => Ok(StateValue::from_json_untyped(item)),
        })
        .collect()
}

pub(crate) fn property_type(
    type_name: Option<&str>,
    field: &str,
    store: &TypeDataStore,
) -> Result<Option<Type>, CodecError> {
    match type_name {
        Some(type_name) => Ok(store.property(type_name, field)?.map(|p| p.ty)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::{INT, STRING};
    use crate::metadata::{BundleKind, BundleSpec, BundleTable, ClassEntry, ValueSerializer};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct UpperCase;

    impl ValueSerializer for UpperCase {
        fn serialize(&self, value: &StateValue) -> Result<Value, CodecError> {
            let text = value.as_str().ok_or_else(|| CodecError::Custom("not text".into()))?;
            Ok(Value::String(text.to_uppercase()))
        }

        fn deserialize(&self, json: &Value) -> Result<StateValue, CodecError> {
            let text = json.as_str().ok_or_else(|| CodecError::Custom("not text".into()))?;
            Ok(StateValue::String(text.to_lowercase()))
        }
    }

    fn store() -> TypeDataStore {
        let table = BundleTable::new().with_bundle(BundleSpec::new(
            "__eager",
            BundleKind::Eager,
            Vec::<String>::new(),
            || {
                vec![
                    ClassEntry::enumeration("Align", ["LEFT", "RIGHT"]),
                    ClassEntry::bean("Shout").serializer(|| Box::new(UpperCase)),
                    ClassEntry::bean("Cell")
                        .property("align", Type::new("Align"))
                        .property("tags", Type::set_of(Type::new(STRING)))
                        .property("sizes", Type::map_of(Type::new(INT)))
                        .property("shout", Type::new("Shout"))
                        .property("owner", Type::new("Connector")),
                ]
            },
        ));
        let store = TypeDataStore::new(table);
        store.bootstrap().expect("bootstrap");
        store
    }

    #[test_timeout::timeout]
    fn typed_bean_round_trips() {
        let store = store();
        let cell = StateObject::new()
            .with("align", StateValue::Enum("RIGHT".into()))
            .with("tags", StateValue::Set(vec!["b".into(), "a".into()]))
            .with("sizes", StateValue::Map(BTreeMap::from([("w".to_owned(), StateValue::Int(4))])))
            .with("shout", "hey")
            .with("owner", ConnectorId::new("3"));
        let json = encode(&StateValue::Object(cell.clone()), Some(&Type::new("Cell")), &store).expect("encode");
        assert_eq!(
            json,
            json!({"align": "RIGHT", "tags": ["b", "a"], "sizes": {"w": 4}, "shout": "HEY", "owner": "3"})
        );
        let back = decode(&json, &Type::new("Cell"), &store).expect("decode");
        assert_eq!(back, StateValue::Object(cell));
    }

    #[test_timeout::timeout]
    fn unknown_enum_constant_is_rejected() {
        let store = store();
        let err = decode(&json!("CENTER"), &Type::new("Align"), &store).unwrap_err();
        assert!(matches!(err, CodecError::UnknownEnumConstant { .. }));
        let err = encode(&StateValue::Enum("CENTER".into()), Some(&Type::new("Align")), &store).unwrap_err();
        assert!(matches!(err, CodecError::UnknownEnumConstant { .. }));
    }

    #[test_timeout::timeout]
    fn mismatches_name_the_field() {
        let store = store();
        let err = decode(&json!({"sizes": {"w": "wide"}}), &Type::new("Cell"), &store).unwrap_err();
        assert_eq!(
            err.to_string(),
            "field 'sizes': field 'w': expected int, found string"
        );
        let err = decode(&json!({"colour": 1}), &Type::new("Cell"), &store).unwrap_err();
        assert!(matches!(err, CodecError::UnknownProperty { .. }));
    }
}
