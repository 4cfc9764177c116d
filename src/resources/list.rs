// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::rc::Rc;

use chrono::Utc;
use mlua::{AnyUserData, Lua, Value};
use rand::seq::SliceRandom;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{KindInfo, meta_str, object};
use crate::bridge::{Arity, BridgeError, Converter, MethodDescriptor, Registry, Result};
use crate::output::{JsonFormatter, QueryResult, YamlFormatter};
use crate::query::{self, ResourceQuery};
use crate::session::State;

pub struct ListVars {
    query: ResourceQuery,
    items: Vec<JsonValue>,
}

/// List objects matching `query`; the name filter applies client-side
fn fetch(lua: &Lua, kind: &KindInfo, query: &ResourceQuery) -> Result<Vec<JsonValue>> {
    let state = State::from_lua(lua)?;
    let namespace = state.list_namespace(query.namespace.as_deref());
    let items = state
        .cluster()
        .list(&kind.api_resource, namespace.as_deref(), &query.options)?;

    let listed = items.len();
    let items: Vec<JsonValue> = items
        .into_iter()
        .filter(|o| query.matches_name(meta_str(o, "name")))
        .collect();

    debug!(
        kind = %kind.kind(),
        namespace = ?namespace,
        listed = listed,
        matched = items.len(),
        "Fetched list"
    );
    Ok(items)
}

pub(super) fn new_list(lua: &Lua, kind: &Rc<KindInfo>, query: ResourceQuery) -> Result<AnyUserData> {
    let items = fetch(lua, kind, &query)?;
    let registry = Registry::from_lua(lua)?;
    let id = registry.require_class(kind.list_class)?;
    let (_, ud) = registry.new_instance(lua, id, ListVars { query, items })?;
    Ok(ud)
}

/// `-1` is the last element; anything outside `-len..len` is absent
pub(super) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn items(lua: &Lua, this: &crate::bridge::Receiver) -> Result<Vec<JsonValue>> {
    let registry = Registry::from_lua(lua)?;
    let vars = registry.lookup::<ListVars>(this.instance)?;
    let items = vars.borrow().items.clone();
    Ok(items)
}

/// Instance method returning the object at a position chosen from the items
fn pick<F>(kind: &Rc<KindInfo>, name: &str, choose: F) -> MethodDescriptor
where
    F: Fn(&[JsonValue]) -> Option<JsonValue> + 'static,
{
    let kind = Rc::clone(kind);
    MethodDescriptor::instance(name, Arity::Exact(0), move |lua, this, _| {
        let chosen = choose(&items(lua, this)?);
        Ok(match chosen {
            Some(item) => Some(object::new_object(lua, &kind, item)?),
            None => None,
        })
    })
}

pub(super) fn methods(kind: &Rc<KindInfo>) -> Vec<MethodDescriptor> {
    let refresh = {
        let kind = Rc::clone(kind);
        MethodDescriptor::instance("get!", Arity::Any, move |lua, this, args| {
            let registry = Registry::from_lua(lua)?;
            let vars = registry.lookup::<ListVars>(this.instance)?;
            let query = if args.is_empty() {
                vars.borrow().query.clone()
            } else {
                query::parse_lua(lua, args)?
            };
            let items = fetch(lua, &kind, &query)?;
            {
                let mut vars = vars.borrow_mut();
                vars.query = query;
                vars.items = items;
            }
            Ok(this.value.clone())
        })
    };

    let at = {
        let kind = Rc::clone(kind);
        MethodDescriptor::instance("[]", Arity::Exact(1), move |lua, this, args| {
            let index = match args.front() {
                Some(Value::Integer(i)) => *i,
                Some(Value::Number(n)) if n.fract() == 0.0 => *n as i64,
                other => {
                    return Err(BridgeError::argument(format!(
                        "index must be an integer, found {}",
                        other.map(Value::type_name).unwrap_or("nothing")
                    ))
                    .into());
                }
            };
            let items = items(lua, this)?;
            Ok(match resolve_index(items.len(), index) {
                Some(i) => Some(object::new_object(lua, &kind, items[i].clone())?),
                None => None,
            })
        })
    };

    let inspect = MethodDescriptor::instance("inspect", Arity::Exact(0), |lua, this, _| {
        let items = items(lua, this)?;
        if items.is_empty() {
            return Ok("No resources found".to_string());
        }
        Ok(items
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}: {}/{}", i, meta_str(o, "namespace"), meta_str(o, "name")))
            .collect::<Vec<_>>()
            .join("\n"))
    });

    let items_method = {
        let kind = Rc::clone(kind);
        MethodDescriptor::instance("items", Arity::Exact(0), move |lua, this, _| {
            let handles = items(lua, this)?
                .into_iter()
                .map(|o| object::new_object(lua, &kind, o))
                .collect::<Result<Vec<_>>>()?;
            lua.create_sequence_from(handles)
        })
    };

    vec![
        refresh.alias("refresh"),
        refresh,
        at.alias("at"),
        at,
        inspect.alias("to_s"),
        inspect,
        MethodDescriptor::instance("count", Arity::Exact(0), |lua, this, _| {
            let registry = Registry::from_lua(lua)?;
            let vars = registry.lookup::<ListVars>(this.instance)?;
            let count = vars.borrow().items.len();
            Ok(count)
        }),
        pick(kind, "first", |items| items.first().cloned()),
        pick(kind, "last", |items| items.last().cloned()),
        pick(kind, "any", |items| items.choose(&mut rand::thread_rng()).cloned()),
        items_method,
        MethodDescriptor::instance("names", Arity::Exact(0), |lua, this, _| {
            let names: Vec<String> = items(lua, this)?
                .iter()
                .map(|o| meta_str(o, "name").to_string())
                .collect();
            lua.create_sequence_from(names)
        }),
        MethodDescriptor::instance("table", Arity::Exact(0), |lua, this, _| {
            let items = items(lua, this)?;
            Ok(QueryResult::summary(&items, Utc::now()).format(false))
        }),
        MethodDescriptor::instance("to_json", Arity::Exact(0), |lua, this, _| {
            Ok(JsonFormatter::format(&JsonValue::Array(items(lua, this)?)))
        }),
        MethodDescriptor::instance("to_yaml", Arity::Exact(0), |lua, this, _| {
            Ok(YamlFormatter::format(&JsonValue::Array(items(lua, this)?)))
        }),
        MethodDescriptor::instance("to_lua", Arity::Exact(0), |lua, this, _| {
            let state = State::from_lua(lua)?;
            let pivot = JsonValue::Array(items(lua, this)?);
            Ok(Converter::new(lua, state.number_mode()).convert_pivot(&pivot)?)
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(3, 0), Some(0));
        assert_eq!(resolve_index(3, 2), Some(2));
        assert_eq!(resolve_index(3, 3), None);
        assert_eq!(resolve_index(3, -1), Some(2));
        assert_eq!(resolve_index(3, -3), Some(0));
        assert_eq!(resolve_index(3, -4), None);
        assert_eq!(resolve_index(0, 0), None);
        assert_eq!(resolve_index(0, -1), None);
    }
}
