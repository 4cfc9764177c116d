// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! One scripting session: the Lua state, its class registry and the cluster
//!
//! Evaluation is strictly single-threaded; every cluster call blocks the
//! evaluating thread until the API server answers.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::rc::Rc;

use mlua::{Function, Lua, MultiValue, Value};
use tracing::{debug, error};

use crate::bridge::converter::to_pivot;
use crate::bridge::{BridgeError, Instance, NumberMode, Registry, Result};
use crate::cli::OutputFormat;
use crate::kubernetes::Cluster;
use crate::output::format_value;
use crate::resources;
use crate::selector::dsl;

/// Exit status after a panic escaped evaluation
pub const FATAL_EXIT_CODE: i32 = 3;

/// Session namespace value meaning "all namespaces"
pub const ALL_NAMESPACES: &str = "*";

/// Host state reachable from every handler through the Lua app data
pub struct State {
    cluster: Rc<dyn Cluster>,
    namespace: RefCell<String>,
    number_mode: NumberMode,
}

impl State {
    pub fn from_lua(lua: &Lua) -> Result<Rc<State>> {
        lua.app_data_ref::<Rc<State>>()
            .map(|s| Rc::clone(&s))
            .ok_or_else(|| BridgeError::ClassDefinition("session state is not installed".into()))
    }

    pub fn cluster(&self) -> Rc<dyn Cluster> {
        Rc::clone(&self.cluster)
    }

    pub fn number_mode(&self) -> NumberMode {
        self.number_mode
    }

    /// Current namespace, `*` for all namespaces
    pub fn namespace(&self) -> String {
        self.namespace.borrow().clone()
    }

    /// An empty namespace selects all namespaces
    pub fn set_namespace(&self, namespace: &str) {
        let namespace = match namespace.trim() {
            "" => ALL_NAMESPACES,
            ns => ns,
        };
        debug!(namespace = %namespace, "Switched namespace");
        *self.namespace.borrow_mut() = namespace.to_string();
    }

    /// Namespace to list in; `None` lists all namespaces
    ///
    /// `requested` is a query's override: `Some("")` means all namespaces,
    /// `None` falls back to the session namespace.
    pub fn list_namespace(&self, requested: Option<&str>) -> Option<String> {
        match requested {
            Some("") => None,
            Some(ns) => Some(ns.to_string()),
            None => {
                let current = self.namespace.borrow();
                (current.as_str() != ALL_NAMESPACES).then(|| current.clone())
            }
        }
    }

    /// Namespace for single-object calls; all namespaces maps to `default`
    pub fn default_namespace(&self) -> String {
        let current = self.namespace.borrow();
        if current.as_str() == ALL_NAMESPACES {
            "default".to_string()
        } else {
            current.clone()
        }
    }
}

/// A panic caught at the top of evaluation
#[derive(Debug)]
pub struct FatalSignal(pub String);

/// Run `f`, turning a panic into a [`FatalSignal`]
pub fn guard<T>(f: impl FnOnce() -> T) -> std::result::Result<T, FatalSignal> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(message = %message, "Panic during evaluation");
        FatalSignal(message)
    })
}

pub struct Session {
    lua: Lua,
    registry: Rc<Registry>,
    state: Rc<State>,
}

impl Session {
    pub fn new(cluster: Rc<dyn Cluster>, namespace: &str, number_mode: NumberMode) -> Result<Self> {
        let lua = Lua::new();
        let registry = Registry::install(&lua)?;

        let state = Rc::new(State {
            cluster,
            namespace: RefCell::new(String::new()),
            number_mode,
        });
        state.set_namespace(namespace);
        lua.set_app_data(Rc::clone(&state));

        dsl::install(&lua, &registry)?;
        resources::install(&lua, &registry)?;

        let session = Self {
            lua,
            registry,
            state,
        };
        session.install_globals()?;
        debug!(
            classes = session.registry.class_names().len(),
            namespace = %session.state.namespace(),
            "Session ready"
        );
        Ok(session)
    }

    fn install_globals(&self) -> Result<()> {
        let globals = self.lua.globals();

        globals.set(
            "namespace",
            self.lua.create_function(|lua, args: MultiValue| {
                let state = State::from_lua(lua)?;
                match args.front() {
                    None | Some(Value::Nil) => {}
                    Some(Value::String(s)) if args.len() == 1 => state.set_namespace(&s.to_str()?),
                    _ => {
                        return Err(BridgeError::argument(
                            "namespace takes at most one string argument",
                        )
                        .into());
                    }
                }
                Ok(state.namespace())
            })?,
        )?;

        globals.set(
            "getenv",
            self.lua
                .create_function(|_, name: String| Ok(std::env::var(name).unwrap_or_default()))?,
        )?;

        globals.set(
            "import",
            self.lua.create_function(|lua, path: String| {
                let source = std::fs::read_to_string(&path).map_err(|e| {
                    BridgeError::argument(format!("cannot import {}: {}", path, e))
                })?;
                debug!(path = %path, "Importing script");
                lua.load(source).set_name(format!("@{}", path)).eval::<MultiValue>()
            })?,
        )?;

        Ok(())
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn namespace(&self) -> String {
        self.state.namespace()
    }

    /// Evaluate a chunk, as an expression first and as statements otherwise
    pub fn eval(&self, chunk: &str, name: &str) -> mlua::Result<MultiValue> {
        let expression = format!("return {}", chunk);
        match self.lua.load(&expression).set_name(name).into_function() {
            Ok(f) => f.call::<MultiValue>(()),
            Err(_) => self.lua.load(chunk).set_name(name).eval::<MultiValue>(),
        }
    }

    pub fn exec_file(&self, path: &Path) -> anyhow::Result<MultiValue> {
        use anyhow::Context;
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let values = self
            .lua
            .load(source)
            .set_name(format!("@{}", path.display()))
            .eval::<MultiValue>()
            .map_err(|e| anyhow::anyhow!(crate::bridge::error::describe(&e)))?;
        Ok(values)
    }

    /// True while `chunk` is an unfinished statement (open block, string, ...)
    pub fn is_incomplete(&self, chunk: &str) -> bool {
        let expression = format!("return {}", chunk);
        if self.lua.load(&expression).into_function().is_ok() {
            return false;
        }
        matches!(
            self.lua.load(chunk).into_function(),
            Err(mlua::Error::SyntaxError {
                incomplete_input: true,
                ..
            })
        )
    }

    /// Remember the last result as `_`
    pub fn set_last(&self, values: &MultiValue) -> Result<()> {
        if let Some(value) = values.iter().find(|v| !v.is_nil()) {
            self.lua.globals().set("_", value.clone())?;
        }
        Ok(())
    }

    /// Printable form of each non-nil result
    pub fn render(&self, values: &MultiValue, format: &OutputFormat) -> Result<Vec<String>> {
        let tostring: Function = self.lua.globals().get("tostring")?;
        let mut out = Vec::new();
        for value in values.iter() {
            let text = match value {
                Value::Nil => continue,
                Value::UserData(ud) if Instance::from_value(value).is_some() => {
                    match self.registry.call_method::<String>(ud, "inspect", (), &self.lua) {
                        Ok(s) => s,
                        Err(_) => tostring.call::<String>(value.clone())?,
                    }
                }
                Value::Table(_) => {
                    let pivot = to_pivot(&self.lua, value.clone())?;
                    format_value(&pivot, format)
                }
                other => tostring.call::<String>(other.clone())?,
            };
            out.push(text);
        }
        Ok(out)
    }

    /// Names of string-keyed globals
    pub fn global_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lua
            .globals()
            .pairs::<Value, Value>()
            .filter_map(|pair| match pair {
                Ok((Value::String(k), _)) => k.to_str().ok().map(|s| s.to_string()),
                _ => None,
            })
            .collect();
        names.sort();
        names
    }

    /// Members reachable with `.`/`:` on a global: methods of an instance or keys of a table
    pub fn member_names(&self, global: &str) -> Vec<String> {
        let value: Value = match self.lua.globals().get(global) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        let mut names = match &value {
            Value::UserData(_) => match Instance::from_value(&value) {
                Some(instance) => self.registry.method_names(instance.class()),
                None => Vec::new(),
            },
            Value::Table(t) => t
                .pairs::<Value, Value>()
                .filter_map(|pair| match pair {
                    Ok((Value::String(k), _)) => k.to_str().ok().map(|s| s.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        names.sort();
        names
    }
}
