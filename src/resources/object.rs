// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::rc::Rc;

use mlua::{AnyUserData, Lua};
use serde_json::{Map, Value as JsonValue};
use tracing::info;

use super::{KindInfo, list, meta_str};
use crate::bridge::{Arity, BridgeError, Converter, MethodDescriptor, Receiver, Registry, Result};
use crate::kubernetes::ListOptions;
use crate::output::{JsonFormatter, YamlFormatter};
use crate::query::ResourceQuery;
use crate::selector::{self, Expression, Operator, SelectorKind};
use crate::session::State;

pub struct ObjectVars {
    object: JsonValue,
}

pub(super) fn new_object(lua: &Lua, kind: &KindInfo, object: JsonValue) -> Result<AnyUserData> {
    let registry = Registry::from_lua(lua)?;
    let id = registry.require_class(kind.kind())?;
    let (_, ud) = registry.new_instance(lua, id, ObjectVars { object })?;
    Ok(ud)
}

pub(super) fn object_of(lua: &Lua, this: &Receiver) -> Result<JsonValue> {
    let registry = Registry::from_lua(lua)?;
    let vars = registry.lookup::<ObjectVars>(this.instance)?;
    let object = vars.borrow().object.clone();
    Ok(object)
}

fn replace_object(lua: &Lua, this: &Receiver, object: JsonValue) -> Result<()> {
    let registry = Registry::from_lua(lua)?;
    let vars = registry.lookup::<ObjectVars>(this.instance)?;
    vars.borrow_mut().object = object;
    Ok(())
}

/// Name and namespace to address the object with; `*` resolves to `default`
pub(super) fn address(lua: &Lua, kind: &KindInfo, object: &JsonValue) -> Result<(String, String)> {
    let name = meta_str(object, "name");
    if name.is_empty() {
        return Err(BridgeError::argument(format!("{} has no name", kind.kind())));
    }
    let namespace = match meta_str(object, "namespace") {
        "" => State::from_lua(lua)?.default_namespace(),
        ns => ns.to_string(),
    };
    Ok((namespace, name.to_string()))
}

fn to_lua(lua: &Lua, value: &JsonValue) -> Result<mlua::Value> {
    let state = State::from_lua(lua)?;
    Converter::new(lua, state.number_mode()).convert_pivot(value)
}

pub(super) fn methods(kind: &Rc<KindInfo>) -> Vec<MethodDescriptor> {
    let refresh = {
        let kind = Rc::clone(kind);
        MethodDescriptor::instance("get!", Arity::Exact(0), move |lua, this, _| {
            let (namespace, name) = address(lua, &kind, &object_of(lua, this)?)?;
            let state = State::from_lua(lua)?;
            let fresh = state.cluster().get(&kind.api_resource, &namespace, &name)?;
            replace_object(lua, this, fresh)?;
            Ok(this.value.clone())
        })
    };

    let inspect = {
        let kind = Rc::clone(kind);
        MethodDescriptor::instance("inspect", Arity::Exact(0), move |lua, this, _| {
            let object = object_of(lua, this)?;
            Ok(format!(
                "{} {}/{}",
                kind.kind(),
                meta_str(&object, "namespace"),
                meta_str(&object, "name")
            ))
        })
    };

    vec![
        refresh.alias("refresh"),
        refresh,
        inspect.alias("to_s"),
        inspect,
        MethodDescriptor::instance("name", Arity::Exact(0), |lua, this, _| {
            Ok(meta_str(&object_of(lua, this)?, "name").to_string())
        }),
        MethodDescriptor::instance("namespace", Arity::Exact(0), |lua, this, _| {
            Ok(meta_str(&object_of(lua, this)?, "namespace").to_string())
        }),
        MethodDescriptor::instance("labels", Arity::Exact(0), |lua, this, _| {
            let object = object_of(lua, this)?;
            let labels = match &object["metadata"]["labels"] {
                JsonValue::Object(map) => JsonValue::Object(map.clone()),
                _ => JsonValue::Object(Map::new()),
            };
            Ok(to_lua(lua, &labels)?)
        }),
        MethodDescriptor::instance("to_json", Arity::Exact(0), |lua, this, _| {
            Ok(JsonFormatter::format(&object_of(lua, this)?))
        }),
        MethodDescriptor::instance("to_yaml", Arity::Exact(0), |lua, this, _| {
            Ok(YamlFormatter::format(&object_of(lua, this)?))
        }),
        MethodDescriptor::instance("to_lua", Arity::Exact(0), |lua, this, _| {
            Ok(to_lua(lua, &object_of(lua, this)?)?)
        }),
    ]
}

/// `create!` and `delete!` for kinds that support them
pub(super) fn mutable_methods(kind: &Rc<KindInfo>) -> Vec<MethodDescriptor> {
    let create = {
        let kind = Rc::clone(kind);
        MethodDescriptor::instance("create!", Arity::Exact(0), move |lua, this, _| {
            let object = object_of(lua, this)?;
            let (namespace, name) = address(lua, &kind, &object)?;
            let state = State::from_lua(lua)?;
            let created = state.cluster().create(&kind.api_resource, &namespace, &object)?;
            info!(kind = %kind.kind(), namespace = %namespace, name = %name, "Created");
            replace_object(lua, this, created)?;
            Ok(this.value.clone())
        })
    };

    let delete = {
        let kind = Rc::clone(kind);
        MethodDescriptor::instance("delete!", Arity::Exact(0), move |lua, this, _| {
            let (namespace, name) = address(lua, &kind, &object_of(lua, this)?)?;
            let state = State::from_lua(lua)?;
            state.cluster().delete(&kind.api_resource, &namespace, &name)?;
            info!(kind = %kind.kind(), namespace = %namespace, name = %name, "Deleted");
            Ok(true)
        })
    };

    vec![create.alias("create"), create, delete.alias("delete"), delete]
}

/// `pods` on objects that manage pods through a selector
pub(super) fn finder_methods(kind: &Rc<KindInfo>, pods: &Rc<KindInfo>) -> Vec<MethodDescriptor> {
    let kind = Rc::clone(kind);
    let pods = Rc::clone(pods);
    vec![MethodDescriptor::instance(
        "pods",
        Arity::Exact(0),
        move |lua, this, _| {
            let object = object_of(lua, this)?;
            let (namespace, name) = address(lua, &kind, &object)?;
            let match_labels = kind.pod_selector(&object)?;
            if match_labels.is_empty() {
                return Err(BridgeError::argument(format!(
                    "{} {}/{} has no pod selector",
                    kind.kind(),
                    namespace,
                    name
                ))
                .into());
            }

            let expressions = match_labels
                .into_iter()
                .map(|(k, v)| Expression::new(k, Operator::In, vec![v]))
                .collect::<Result<Vec<_>>>()?;
            let query = ResourceQuery {
                namespace: Some(namespace),
                name_filter: None,
                options: ListOptions {
                    label_selector: selector::render(SelectorKind::Label, &expressions)?,
                    field_selector: String::new(),
                },
            };
            Ok(list::new_list(lua, &pods, query)?)
        },
    )]
}
