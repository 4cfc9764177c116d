// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Pod-only surface: `make_pod{...}` and pod logs

use std::rc::Rc;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use mlua::{AnyUserData, Lua, MultiValue, Value};
use regex::Regex;
use tracing::debug;

use super::{KindInfo, object};
use crate::bridge::{
    Arity, BridgeError, MethodDescriptor, ParamSchema, ParamType, Receiver, Registry, Result,
};
use crate::session::State;

pub struct LogsVars {
    namespace: String,
    pod: String,
    text: Option<String>,
}

fn pod_schema() -> ParamSchema {
    ParamSchema::new("make_pod")
        .require("image", ParamType::String)
        .allow("name", ParamType::String)
        .allow("namespace", ParamType::String)
        .allow("labels", ParamType::StringMap)
        .allow("env", ParamType::StringMap)
        .allow("command", ParamType::StringList)
}

/// "registry.local/team/nginx:1.25" -> "nginx"
fn name_from_image(image: &str) -> &str {
    let last = image.rsplit('/').next().unwrap_or(image);
    last.split([':', '@']).next().unwrap_or(last)
}

/// Build an unsaved pod from a `make_pod` parameter table
fn build_pod(params: &mlua::Table) -> Result<Pod> {
    let params = pod_schema().parse(params)?;
    let image = params.string("image").unwrap_or_default().to_string();

    let name = match params.string("name") {
        Some(name) => name.to_string(),
        None => name_from_image(&image).to_string(),
    };
    if name.is_empty() {
        return Err(BridgeError::argument(format!(
            "cannot derive a pod name from image {:?}, pass `name`",
            image
        )));
    }

    let mut labels = params.map("labels").cloned().unwrap_or_default();
    labels.insert("name".to_string(), name.clone());

    let env = params.map("env").map(|env| {
        env.iter()
            .map(|(k, v)| EnvVar {
                name: k.clone(),
                value: Some(v.clone()),
                ..Default::default()
            })
            .collect::<Vec<_>>()
    });

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: params.string("namespace").map(String::from),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name,
                image: Some(image),
                command: params.list("command").map(|c| c.to_vec()),
                env,
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// `make_pod` global and the `PodLogs` class
pub(super) fn install(lua: &Lua, registry: &Registry, pods: &Rc<KindInfo>) -> Result<()> {
    let pods = Rc::clone(pods);
    lua.globals().set(
        "make_pod",
        lua.create_function(move |lua, args: MultiValue| {
            let params = match args.front() {
                Some(Value::Table(t)) if args.len() == 1 => t.clone(),
                _ => {
                    return Err(BridgeError::argument(
                        "make_pod expects a single table of parameters",
                    )
                    .into());
                }
            };
            let pod = build_pod(&params)?;
            let json = serde_json::to_value(&pod).map_err(BridgeError::from)?;
            debug!(name = ?pod.metadata.name, "Built pod");
            Ok(object::new_object(lua, &pods, json)?)
        })?,
    )?;

    let refresh = MethodDescriptor::instance("get!", Arity::Exact(0), |lua, this, _| {
        fetch(lua, this)?;
        Ok(this.value.clone())
    });
    let inspect = MethodDescriptor::instance("inspect", Arity::Exact(0), |lua, this, _| {
        let registry = Registry::from_lua(lua)?;
        let vars = registry.lookup::<LogsVars>(this.instance)?;
        let vars = vars.borrow();
        Ok(format!("PodLogs {}/{}", vars.namespace, vars.pod))
    });

    registry.define_class(
        lua,
        "PodLogs",
        vec![
            refresh.alias("refresh"),
            refresh,
            inspect.alias("to_s"),
            inspect,
            MethodDescriptor::instance("text", Arity::Exact(0), |lua, this, _| {
                Ok(text(lua, this)?)
            }),
            MethodDescriptor::instance("lines", Arity::Exact(0), |lua, this, _| {
                let text = text(lua, this)?;
                lua.create_sequence_from(text.lines())
            }),
            MethodDescriptor::instance("puts", Arity::Exact(0), |lua, this, _| {
                println!("{}", text(lua, this)?.trim_end_matches('\n'));
                Ok(())
            }),
            MethodDescriptor::instance("grep", Arity::Any, |lua, this, args| {
                let matches = grep(lua, this, args)?;
                lua.create_sequence_from(matches)
            }),
        ],
    )?;
    Ok(())
}

/// `logs` on pod objects
pub(super) fn object_methods() -> Vec<MethodDescriptor> {
    vec![MethodDescriptor::instance("logs", Arity::Exact(0), |lua, this, _| {
        let object = object::object_of(lua, this)?;
        let pods = super::KindInfo::of::<super::Pods>();
        let (namespace, pod) = object::address(lua, &pods, &object)?;

        let registry = Registry::from_lua(lua)?;
        let id = registry.require_class("PodLogs")?;
        let (_, ud): (_, AnyUserData) = registry.new_instance(
            lua,
            id,
            LogsVars {
                namespace,
                pod,
                text: None,
            },
        )?;
        Ok(ud)
    })]
}

/// Download the log, replacing any cached copy
fn fetch(lua: &Lua, this: &Receiver) -> Result<String> {
    let registry = Registry::from_lua(lua)?;
    let vars = registry.lookup::<LogsVars>(this.instance)?;
    let (namespace, pod) = {
        let vars = vars.borrow();
        (vars.namespace.clone(), vars.pod.clone())
    };
    let text = State::from_lua(lua)?.cluster().logs(&namespace, &pod)?;
    debug!(namespace = %namespace, pod = %pod, bytes = text.len(), "Fetched pod logs");
    vars.borrow_mut().text = Some(text.clone());
    Ok(text)
}

/// Cached log text, fetched on first use
fn text(lua: &Lua, this: &Receiver) -> Result<String> {
    let registry = Registry::from_lua(lua)?;
    let vars = registry.lookup::<LogsVars>(this.instance)?;
    let cached = vars.borrow().text.clone();
    match cached {
        Some(text) => Ok(text),
        None => fetch(lua, this),
    }
}

/// Lines matching any of the patterns, prefixed with `[namespace/pod] `
fn grep(lua: &Lua, this: &Receiver, args: MultiValue) -> Result<Vec<String>> {
    if args.is_empty() {
        return Err(BridgeError::argument(
            "At least one argument must be specified",
        ));
    }
    let patterns = args
        .iter()
        .map(|arg| match arg {
            Value::String(s) => {
                let s = s.to_str()?;
                Regex::new(&s).map_err(|e| BridgeError::argument(e.to_string()))
            }
            other => Err(BridgeError::argument(format!(
                "grep patterns must be strings, found {}",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    let prefix = {
        let registry = Registry::from_lua(lua)?;
        let vars = registry.lookup::<LogsVars>(this.instance)?;
        let vars = vars.borrow();
        format!("[{}/{}] ", vars.namespace, vars.pod)
    };

    Ok(text(lua, this)?
        .lines()
        .filter(|line| patterns.iter().any(|re| re.is_match(line)))
        .map(|line| format!("{}{}", prefix, line))
        .collect())
}
