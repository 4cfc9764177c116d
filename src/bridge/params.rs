// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Validation of parameter tables passed from scripts
//!
//! A [`ParamSchema`] lists the allowed keys, which of them are required and
//! the value type of each key.

use std::collections::BTreeMap;

use mlua::{Function, Table, Value};

use super::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    /// Table of string keys to scalar values
    StringMap,
    /// Sequence of scalars
    StringList,
    /// A string, or a function evaluated later
    StringOrBlock,
}

impl ParamType {
    fn describe(&self) -> &'static str {
        match self {
            ParamType::String => "a string",
            ParamType::StringMap => "a map of strings",
            ParamType::StringList => "an array of strings",
            ParamType::StringOrBlock => "a string or a function",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ParamValue {
    String(String),
    Map(BTreeMap<String, String>),
    List(Vec<String>),
    Block(Function),
}

#[derive(Debug, Default)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ParamValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn map(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        match self.values.get(key) {
            Some(ParamValue::Map(m)) => Some(m),
            _ => None,
        }
    }

    pub fn list(&self, key: &str) -> Option<&[String]> {
        match self.values.get(key) {
            Some(ParamValue::List(l)) => Some(l),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }
}

#[derive(Debug, Clone)]
pub struct ParamSchema {
    context: &'static str,
    keys: Vec<(&'static str, ParamType)>,
    required: Vec<&'static str>,
}

impl ParamSchema {
    pub fn new(context: &'static str) -> Self {
        Self {
            context,
            keys: Vec::new(),
            required: Vec::new(),
        }
    }

    pub fn allow(mut self, key: &'static str, ty: ParamType) -> Self {
        self.keys.push((key, ty));
        self
    }

    pub fn require(mut self, key: &'static str, ty: ParamType) -> Self {
        self.required.push(key);
        self.allow(key, ty)
    }

    pub fn parse(&self, table: &Table) -> Result<Params> {
        let mut params = Params::default();

        for pair in table.pairs::<Value, Value>() {
            let (key, value) = pair?;
            let key = match key {
                Value::String(s) => s.to_str()?.to_string(),
                other => {
                    return Err(BridgeError::argument(format!(
                        "{}: keys must be strings, found {}",
                        self.context,
                        other.type_name()
                    )));
                }
            };

            let ty = self
                .keys
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, ty)| *ty)
                .ok_or_else(|| {
                    let allowed: Vec<&str> = self.keys.iter().map(|(k, _)| *k).collect();
                    BridgeError::argument(format!(
                        "{} only accepts keys: {}, found '{}'",
                        self.context,
                        allowed.join(", "),
                        key
                    ))
                })?;

            let parsed = self.parse_value(&key, ty, value)?;
            params.values.insert(key, parsed);
        }

        for required in &self.required {
            if !params.values.contains_key(*required) {
                return Err(BridgeError::argument(format!(
                    "{} requires key '{}'",
                    self.context, required
                )));
            }
        }

        Ok(params)
    }

    fn parse_value(&self, key: &str, ty: ParamType, value: Value) -> Result<ParamValue> {
        let mismatch = || {
            BridgeError::argument(format!(
                "Value for key \"{}\" must be {}",
                key,
                ty.describe()
            ))
        };

        match (ty, value) {
            (ParamType::String | ParamType::StringOrBlock, Value::String(s)) => {
                Ok(ParamValue::String(s.to_str()?.to_string()))
            }
            (ParamType::StringOrBlock, Value::Function(f)) => Ok(ParamValue::Block(f)),
            (ParamType::StringMap, Value::Table(t)) => {
                let mut map = BTreeMap::new();
                for pair in t.pairs::<Value, Value>() {
                    let (k, v) = pair?;
                    let k = match k {
                        Value::String(s) => s.to_str()?.to_string(),
                        _ => return Err(mismatch()),
                    };
                    let v = scalar_string(&v)?.ok_or_else(mismatch)?;
                    map.insert(k, v);
                }
                Ok(ParamValue::Map(map))
            }
            (ParamType::StringList, Value::Table(t)) => {
                if has_non_sequence_keys(&t)? {
                    return Err(mismatch());
                }
                let mut list = Vec::new();
                for v in t.sequence_values::<Value>() {
                    list.push(scalar_string(&v?)?.ok_or_else(mismatch)?);
                }
                Ok(ParamValue::List(list))
            }
            _ => Err(mismatch()),
        }
    }
}

/// String form of a scalar Lua value; `None` for tables, functions, etc.
pub fn scalar_string(value: &Value) -> Result<Option<String>> {
    let s = match value {
        Value::String(s) => s.to_str()?.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
        Value::Number(n) => n.to_string(),
        Value::Boolean(b) => b.to_string(),
        _ => return Ok(None),
    };
    Ok(Some(s))
}

/// True when the table has any key outside its `1..=#t` sequence
pub fn has_non_sequence_keys(table: &Table) -> Result<bool> {
    let len = table.raw_len() as i64;
    for pair in table.pairs::<Value, Value>() {
        let (key, _) = pair?;
        match key {
            Value::Integer(i) if (1..=len).contains(&i) => {}
            _ => return Ok(true),
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    fn pod_schema() -> ParamSchema {
        ParamSchema::new("make_pod")
            .require("image", ParamType::String)
            .allow("name", ParamType::String)
            .allow("labels", ParamType::StringMap)
            .allow("command", ParamType::StringList)
    }

    fn table(lua: &Lua, src: &str) -> Table {
        lua.load(src).eval().unwrap()
    }

    #[test]
    fn test_parse_all_types() {
        let lua = Lua::new();
        let t = table(
            &lua,
            r#"{ image = "nginx", labels = { tier = "web", v = 2 }, command = { "sh", "-c" } }"#,
        );
        let params = pod_schema().parse(&t).unwrap();
        assert_eq!(params.string("image"), Some("nginx"));
        assert_eq!(params.map("labels").unwrap()["v"], "2");
        assert_eq!(params.list("command").unwrap(), ["sh", "-c"]);
        assert!(params.string("name").is_none());
    }

    #[test]
    fn test_missing_required_key() {
        let lua = Lua::new();
        let t = table(&lua, r#"{ name = "x" }"#);
        let err = pod_schema().parse(&t).unwrap_err();
        assert_eq!(err.to_string(), "make_pod requires key 'image'");
    }

    #[test]
    fn test_unknown_key() {
        let lua = Lua::new();
        let t = table(&lua, r#"{ image = "x", replicas = "3" }"#);
        let err = pod_schema().parse(&t).unwrap_err();
        assert!(err.to_string().contains("only accepts keys"));
        assert!(err.to_string().contains("'replicas'"));
    }

    #[test]
    fn test_wrong_value_type() {
        let lua = Lua::new();
        let t = table(&lua, r#"{ image = { "x" } }"#);
        let err = pod_schema().parse(&t).unwrap_err();
        assert_eq!(err.to_string(), "Value for key \"image\" must be a string");

        let t = table(&lua, r#"{ image = "x", command = { a = "b" } }"#);
        assert!(pod_schema().parse(&t).is_err());
    }

    #[test]
    fn test_string_or_block() {
        let lua = Lua::new();
        let schema = ParamSchema::new("query")
            .allow("labels", ParamType::StringOrBlock)
            .allow("fields", ParamType::StringOrBlock);
        let t = table(&lua, r#"{ labels = function() end, fields = "a==b" }"#);
        let params = schema.parse(&t).unwrap();
        assert!(matches!(params.get("labels"), Some(ParamValue::Block(_))));
        assert_eq!(params.string("fields"), Some("a==b"));
    }

    #[test]
    fn test_scalar_string() {
        assert_eq!(scalar_string(&Value::Integer(120)).unwrap().unwrap(), "120");
        assert_eq!(scalar_string(&Value::Number(2.0)).unwrap().unwrap(), "2");
        assert_eq!(scalar_string(&Value::Number(1.5)).unwrap().unwrap(), "1.5");
        assert_eq!(scalar_string(&Value::Boolean(true)).unwrap().unwrap(), "true");
        assert!(scalar_string(&Value::Nil).unwrap().is_none());
    }
}
