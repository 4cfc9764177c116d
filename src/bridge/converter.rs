// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Native value to Lua table conversion
//!
//! Objects are first serialized to a `serde_json::Value` pivot and then
//! mirrored depth-first into Lua tables. Each map or array under
//! construction is a branch on a stack; finishing a branch flips back to its
//! parent. Arrays carry the mlua array metatable so that the array/map
//! distinction survives, including for empty containers.

use mlua::{Lua, LuaSerdeExt, Table, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::error::{BridgeError, Result};

/// How JSON numbers are represented on the Lua side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NumberMode {
    /// Integers stay integers, everything else becomes a float
    #[default]
    Native,
    /// Every number becomes a fixed six-decimal string (`3` -> `"3.000000"`)
    DecimalString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Map,
    Array,
}

struct Branch {
    shape: Shape,
    parent: Option<usize>,
    container: Table,
    pending_key: Option<Value>,
    pending_value: Option<Value>,
}

/// One-shot converter: a second `convert` call is rejected
pub struct Converter<'a> {
    lua: &'a Lua,
    mode: NumberMode,
    branches: Vec<Branch>,
    current: usize,
    is_root: bool,
    used: bool,
}

impl<'a> Converter<'a> {
    pub fn new(lua: &'a Lua, mode: NumberMode) -> Self {
        Self {
            lua,
            mode,
            branches: Vec::new(),
            current: 0,
            is_root: true,
            used: false,
        }
    }

    pub fn convert<T: Serialize + ?Sized>(&mut self, obj: &T) -> Result<Value> {
        self.begin()?;
        let pivot = serde_json::to_value(obj)?;
        self.run(&pivot)
    }

    /// Same as [`Converter::convert`] for an already marshalled pivot tree
    pub fn convert_pivot(&mut self, pivot: &JsonValue) -> Result<Value> {
        self.begin()?;
        self.run(pivot)
    }

    fn begin(&mut self) -> Result<()> {
        if self.used {
            return Err(BridgeError::ConverterReused);
        }
        self.used = true;
        Ok(())
    }

    fn run(&mut self, pivot: &JsonValue) -> Result<Value> {
        match self.walk(pivot) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.branches.clear();
                Err(e)
            }
        }
    }

    fn walk(&mut self, node: &JsonValue) -> Result<Value> {
        match node {
            JsonValue::Object(map) => {
                self.append_branch(Shape::Map)?;
                for (key, child) in map {
                    let key = Value::String(self.lua.create_string(key)?);
                    self.branch_mut().pending_key = Some(key);
                    let value = self.walk(child)?;
                    self.store(value)?;
                }
                Ok(self.flip_branch())
            }
            JsonValue::Array(items) => {
                self.append_branch(Shape::Array)?;
                for (idx, child) in items.iter().enumerate() {
                    self.branch_mut().pending_key = Some(Value::Integer(idx as i64 + 1));
                    let value = self.walk(child)?;
                    self.store(value)?;
                }
                Ok(self.flip_branch())
            }
            scalar => {
                self.is_root = false;
                self.scalar(scalar)
            }
        }
    }

    fn scalar(&self, node: &JsonValue) -> Result<Value> {
        let value = match node {
            JsonValue::Null => Value::NULL,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => match self.mode {
                NumberMode::Native => match n.as_i64() {
                    Some(i) => Value::Integer(i),
                    None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
                },
                NumberMode::DecimalString => Value::String(
                    self.lua
                        .create_string(format!("{:.6}", n.as_f64().unwrap_or(f64::NAN)))?,
                ),
            },
            JsonValue::String(s) => Value::String(self.lua.create_string(s)?),
            JsonValue::Object(_) | JsonValue::Array(_) => {
                return Err(BridgeError::Conversion("container is not a scalar".into()));
            }
        };
        Ok(value)
    }

    fn append_branch(&mut self, shape: Shape) -> Result<()> {
        let container = self.lua.create_table()?;
        if shape == Shape::Array {
            container.set_metatable(Some(self.lua.array_metatable()));
        }

        let parent = if self.is_root {
            self.is_root = false;
            None
        } else {
            Some(self.current)
        };

        self.branches.push(Branch {
            shape,
            parent,
            container,
            pending_key: None,
            pending_value: None,
        });
        self.current = self.branches.len() - 1;
        Ok(())
    }

    /// Finish the current branch and return to its parent
    fn flip_branch(&mut self) -> Value {
        let branch = &self.branches[self.current];
        let value = Value::Table(branch.container.clone());
        if let Some(parent) = branch.parent {
            self.current = parent;
        }
        value
    }

    fn store(&mut self, value: Value) -> Result<()> {
        let branch = self.branch_mut();
        branch.pending_value = Some(value);
        let key = branch.pending_key.take();
        let value = branch.pending_value.take();
        match (key, value) {
            (Some(k), Some(v)) => {
                debug_assert!(matches!(
                    (branch.shape, &k),
                    (Shape::Map, Value::String(_)) | (Shape::Array, Value::Integer(_))
                ));
                branch.container.raw_set(k, v)?;
                Ok(())
            }
            _ => Err(BridgeError::Conversion("value without a pending key".into())),
        }
    }

    fn branch_mut(&mut self) -> &mut Branch {
        &mut self.branches[self.current]
    }

    #[cfg(test)]
    fn parents(&self) -> Vec<Option<usize>> {
        self.branches.iter().map(|b| b.parent).collect()
    }
}

/// Decode a Lua value back into the JSON pivot representation
pub fn to_pivot(lua: &Lua, value: Value) -> Result<JsonValue> {
    Ok(lua.from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-1".into()),
                namespace: Some("prod".into()),
                labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web".into(),
                    image: Some("nginx:1.27".into()),
                    args: Some(vec![]),
                    ..Default::default()
                }],
                termination_grace_period_seconds: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Pivot with every number rendered the way DecimalString mode does it
    fn stringify_numbers(value: JsonValue) -> JsonValue {
        match value {
            JsonValue::Number(n) => JsonValue::String(format!("{:.6}", n.as_f64().unwrap())),
            JsonValue::Array(items) => {
                JsonValue::Array(items.into_iter().map(stringify_numbers).collect())
            }
            JsonValue::Object(map) => JsonValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, stringify_numbers(v)))
                    .collect(),
            ),
            other => other,
        }
    }

    #[test]
    fn test_round_trip_pod() {
        let lua = Lua::new();
        let pod = sample_pod();

        let mut conv = Converter::new(&lua, NumberMode::Native);
        let value = conv.convert(&pod).unwrap();
        let back = to_pivot(&lua, value).unwrap();
        assert_eq!(back, serde_json::to_value(&pod).unwrap());
    }

    #[test]
    fn test_round_trip_decimal_strings() {
        let lua = Lua::new();
        let pod = sample_pod();

        let mut conv = Converter::new(&lua, NumberMode::DecimalString);
        let value = conv.convert(&pod).unwrap();
        let back = to_pivot(&lua, value).unwrap();
        assert_eq!(
            back,
            stringify_numbers(serde_json::to_value(&pod).unwrap())
        );
        assert_eq!(
            back["spec"]["terminationGracePeriodSeconds"],
            json!("30.000000")
        );
    }

    #[test]
    fn test_empty_containers_are_kept() {
        let lua = Lua::new();
        let mut conv = Converter::new(&lua, NumberMode::Native);
        let value = conv.convert(&json!({"a": {}, "b": [], "c": null})).unwrap();

        let table = match &value {
            Value::Table(t) => t.clone(),
            other => panic!("expected table, got {:?}", other),
        };
        assert!(matches!(table.get::<Value>("a").unwrap(), Value::Table(_)));
        assert!(matches!(table.get::<Value>("b").unwrap(), Value::Table(_)));
        assert_eq!(table.get::<Value>("c").unwrap(), Value::NULL);

        let back = to_pivot(&lua, value).unwrap();
        assert_eq!(back, json!({"a": {}, "b": [], "c": null}));
    }

    #[test]
    fn test_arrays_are_one_based_sequences() {
        let lua = Lua::new();
        let mut conv = Converter::new(&lua, NumberMode::Native);
        let value = conv.convert(&json!(["x", "y", 3, 1.5])).unwrap();
        lua.globals().set("v", value).unwrap();

        let (len, first, third, fourth): (i64, String, i64, f64) = lua
            .load("return #v, v[1], v[3], v[4]")
            .eval()
            .unwrap();
        assert_eq!((len, first.as_str(), third, fourth), (4, "x", 3, 1.5));
    }

    #[test]
    fn test_second_convert_is_rejected() {
        let lua = Lua::new();
        let mut conv = Converter::new(&lua, NumberMode::Native);
        conv.convert(&json!({"a": 1})).unwrap();
        assert!(matches!(
            conv.convert(&json!({"a": 1})),
            Err(BridgeError::ConverterReused)
        ));
    }

    #[test]
    fn test_parent_links() {
        let lua = Lua::new();
        let mut conv = Converter::new(&lua, NumberMode::Native);
        conv.convert(&json!({"a": {"b": [1, {"c": []}]}, "d": {}}))
            .unwrap();

        let parents = conv.parents();
        assert_eq!(parents[0], None);
        assert!(parents[1..].iter().all(|p| p.is_some()));
        // Every parent was created before its child
        for (idx, parent) in parents.iter().enumerate().skip(1) {
            assert!(parent.unwrap() < idx);
        }
        assert_eq!(conv.current, 0);
    }

    #[test]
    fn test_scalar_root() {
        let lua = Lua::new();
        let mut conv = Converter::new(&lua, NumberMode::Native);
        let value = conv.convert(&"hello").unwrap();
        let s: String = lua.unpack(value).unwrap();
        assert_eq!(s, "hello");
        assert!(!conv.is_root);
    }

    #[test]
    fn test_marshal_error_aborts() {
        let lua = Lua::new();
        let mut conv = Converter::new(&lua, NumberMode::Native);
        let bad: BTreeMap<Vec<u8>, u8> = BTreeMap::from([(vec![1u8], 1u8)]);
        assert!(matches!(
            conv.convert(&bad),
            Err(BridgeError::Conversion(_))
        ));
        assert!(conv.parents().is_empty());
    }
}
