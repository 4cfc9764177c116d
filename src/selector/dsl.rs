// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Lua classes for building selectors fluently
//!
//! ```lua
//! local sel = labels(function(l)
//!   l.app:is_in("web", "api")
//!   l:label("release"):not_in({ "canary" })
//!   l.tier:exists()
//! end)
//! print(sel)  -- app in (web, api),release notin (canary),tier
//!
//! pods(function(q) q.status.phase:eq("Running") end)
//! ```
//!
//! A collector is handed to the block as its only argument. Keys report
//! matches through an `on_match` callback, so a key holds no reference back
//! to the collector that created it.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{AnyUserData, Function, Lua, MultiValue, Value};
use tracing::trace;

use super::{Expression, Operator, SelectorKind, render};
use crate::bridge::params::{has_non_sequence_keys, scalar_string};
use crate::bridge::registry::Trap;
use crate::bridge::{Arity, BridgeError, MethodDescriptor, Receiver, Registry, Result};

/// Keys pre-bound on every collector
pub const WELL_KNOWN_KEYS: &[&str] = &[
    "app", "name", "org", "owner", "project", "revision", "service", "team", "tier", "v",
    "version",
];

const LABEL_MATCHERS: &[(&str, Operator)] = &[
    ("in", Operator::In),
    ("is_in", Operator::In),
    ("within", Operator::In),
    ("notin", Operator::NotIn),
    ("not_in", Operator::NotIn),
    ("is_not_in", Operator::NotIn),
    ("exists", Operator::PresenceOnly),
    ("any", Operator::PresenceOnly),
    ("is_set", Operator::PresenceOnly),
    ("defined", Operator::PresenceOnly),
    ("present", Operator::PresenceOnly),
    ("anything", Operator::PresenceOnly),
    ("is_present", Operator::PresenceOnly),
    ("equals", Operator::Equals),
    ("eq", Operator::Equals),
    ("is", Operator::Equals),
    ("not_equals", Operator::NotEquals),
    ("ne", Operator::NotEquals),
    ("is_not", Operator::NotEquals),
];

const FIELD_MATCHERS: &[(&str, Operator)] = &[
    ("equals", Operator::Equals),
    ("eq", Operator::Equals),
    ("is", Operator::Equals),
    ("in", Operator::In),
    ("is_in", Operator::In),
    ("not_equals", Operator::NotEquals),
    ("ne", Operator::NotEquals),
    ("is_not", Operator::NotEquals),
    ("notin", Operator::NotIn),
    ("not_in", Operator::NotIn),
];

type OnMatch = Rc<dyn Fn(Expression) -> Result<()>>;

pub struct KeyVars {
    path: Vec<String>,
    on_match: OnMatch,
}

pub struct CollectorVars {
    kind: SelectorKind,
    expressions: Rc<RefCell<Vec<Expression>>>,
    well_known: Vec<(String, AnyUserData)>,
}

pub struct SelectorVars {
    expressions: Vec<Expression>,
    rendered: String,
}

fn key_class(kind: SelectorKind) -> &'static str {
    match kind {
        SelectorKind::Label => "LabelKey",
        SelectorKind::Field => "FieldKey",
    }
}

fn collector_class(kind: SelectorKind) -> &'static str {
    match kind {
        SelectorKind::Label => "LabelCollector",
        SelectorKind::Field => "FieldCollector",
    }
}

fn selector_class(kind: SelectorKind) -> &'static str {
    match kind {
        SelectorKind::Label => "LabelSelector",
        SelectorKind::Field => "FieldSelector",
    }
}

/// Define the key, collector and selector classes and the `labels`/`fields` globals
pub fn install(lua: &Lua, registry: &Registry) -> Result<()> {
    for kind in [SelectorKind::Label, SelectorKind::Field] {
        define_key(lua, registry, kind)?;
        define_collector(lua, registry, kind)?;
        define_selector(lua, registry, kind)?;
    }

    let globals = lua.globals();
    globals.set(
        "labels",
        lua.create_function(|lua, args: MultiValue| {
            let block = block_arg(args)?;
            let (ud, _) = new_selector(lua, SelectorKind::Label, block)?;
            Ok(ud)
        })?,
    )?;
    globals.set(
        "fields",
        lua.create_function(|lua, args: MultiValue| {
            let block = block_arg(args)?;
            let (ud, _) = new_selector(lua, SelectorKind::Field, block)?;
            Ok(ud)
        })?,
    )?;
    Ok(())
}

/// Run a query block through a fresh collector and render the result
pub fn evaluate(lua: &Lua, kind: SelectorKind, block: Function) -> Result<String> {
    let (_, rendered) = new_selector(lua, kind, block)?;
    trace!(kind = %kind, selector = %rendered, "Evaluated selector block");
    Ok(rendered)
}

/// Constructor contract shared by collectors and selectors
fn block_arg(args: MultiValue) -> Result<Function> {
    if args.len() != 1 {
        return Err(BridgeError::argument(format!(
            "Exactly one argument must be supplied (given {})",
            args.len()
        )));
    }
    match args.into_iter().next() {
        Some(Value::Function(f)) => Ok(f),
        Some(other) => Err(BridgeError::argument(format!(
            "Argument must be a function, found {}",
            other.type_name()
        ))),
        None => Err(BridgeError::argument("Exactly one argument must be supplied")),
    }
}

/// Flatten match operands into strings
fn collect_values(args: MultiValue) -> Result<Vec<String>> {
    fn push(value: Value, out: &mut Vec<String>) -> Result<()> {
        match value {
            Value::Table(t) => {
                if has_non_sequence_keys(&t)? {
                    return Err(BridgeError::argument(
                        "a map is an invalid operand for a selector expression",
                    ));
                }
                for v in t.sequence_values::<Value>() {
                    push(v?, out)?;
                }
                Ok(())
            }
            other => match scalar_string(&other)? {
                Some(s) if s.trim().is_empty() => Err(BridgeError::argument(format!(
                    "found an invalid string {:?}",
                    s
                ))),
                Some(s) => {
                    out.push(s);
                    Ok(())
                }
                None => Err(BridgeError::argument(format!(
                    "{} is an invalid operand for a selector expression",
                    other.type_name()
                ))),
            },
        }
    }

    let mut values = Vec::new();
    for arg in args {
        push(arg, &mut values)?;
    }
    Ok(values)
}

fn new_key(
    lua: &Lua,
    registry: &Registry,
    kind: SelectorKind,
    path: Vec<String>,
    on_match: OnMatch,
) -> Result<AnyUserData> {
    let id = registry.require_class(key_class(kind))?;
    let (_, ud) = registry.new_instance(lua, id, KeyVars { path, on_match })?;
    Ok(ud)
}

fn match_method(name: &str, operator: Operator) -> MethodDescriptor {
    MethodDescriptor::instance(name, Arity::Any, move |lua, this, args| {
        let registry = Registry::from_lua(lua)?;
        let vars = registry.lookup::<KeyVars>(this.instance)?;
        let (key, on_match) = {
            let vars = vars.borrow();
            (vars.path.join("."), Rc::clone(&vars.on_match))
        };
        let expression = Expression::new(key, operator, collect_values(args)?)?;
        on_match(expression)?;
        Ok(())
    })
}

fn define_key(lua: &Lua, registry: &Registry, kind: SelectorKind) -> Result<()> {
    let matchers = match kind {
        SelectorKind::Label => LABEL_MATCHERS,
        SelectorKind::Field => FIELD_MATCHERS,
    };
    let mut methods: Vec<MethodDescriptor> = matchers
        .iter()
        .map(|(name, op)| match_method(name, *op))
        .collect();

    methods.push(MethodDescriptor::instance("to_s", Arity::Exact(0), |lua, this, _| {
        let registry = Registry::from_lua(lua)?;
        let vars = registry.lookup::<KeyVars>(this.instance)?;
        let path = vars.borrow().path.join(".");
        Ok(path)
    }));

    // A key built outside of a collector has nowhere to report to
    methods.push(MethodDescriptor::class("new", Arity::Exact(1), move |lua, args| {
        let registry = Registry::from_lua(lua)?;
        let name = match args.front().map(scalar_string).transpose()?.flatten() {
            Some(name) => name,
            None => return Err(BridgeError::argument("key name must be a string").into()),
        };
        let detached: OnMatch = {
            let name = name.clone();
            Rc::new(move |_: Expression| -> Result<()> {
                Err(BridgeError::argument(format!(
                    "key '{}' is not attached to a collector",
                    name
                )))
            })
        };
        Ok(new_key(lua, &registry, kind, vec![name], detached)?)
    }));

    let id = registry.define_class(lua, key_class(kind), methods)?;

    // `f.status.phase` extends the dotted path. On a label key the path is
    // a field path seen during the label pass, so its matches are dropped.
    let trap: Trap = Rc::new(move |lua: &Lua, this: &Receiver, name: &str| {
        let registry = Registry::from_lua(lua)?;
        let vars = registry.lookup::<KeyVars>(this.instance)?;
        let (mut path, on_match) = {
            let vars = vars.borrow();
            let on_match = match kind {
                SelectorKind::Field => Rc::clone(&vars.on_match),
                SelectorKind::Label => discard(),
            };
            (vars.path.clone(), on_match)
        };
        path.push(name.to_string());
        let ud = new_key(lua, &registry, kind, path, on_match)?;
        Ok(Value::UserData(ud))
    });
    registry.set_trap(id, trap)?;
    Ok(())
}

fn new_collector(
    lua: &Lua,
    kind: SelectorKind,
    block: Function,
) -> Result<(AnyUserData, Rc<RefCell<Vec<Expression>>>)> {
    let registry = Registry::from_lua(lua)?;
    let expressions = Rc::new(RefCell::new(Vec::new()));

    // Well-known keys are labels; a field pass discards their matches
    let mut well_known = Vec::with_capacity(WELL_KNOWN_KEYS.len());
    for name in WELL_KNOWN_KEYS {
        let on_match = match kind {
            SelectorKind::Label => sink(&expressions),
            SelectorKind::Field => discard(),
        };
        let key = new_key(
            lua,
            &registry,
            SelectorKind::Label,
            vec![name.to_string()],
            on_match,
        )?;
        well_known.push((name.to_string(), key));
    }

    let id = registry.require_class(collector_class(kind))?;
    let (_, ud) = registry.new_instance(
        lua,
        id,
        CollectorVars {
            kind,
            expressions: Rc::clone(&expressions),
            well_known,
        },
    )?;

    block.call::<()>(ud.clone())?;
    Ok((ud, expressions))
}

fn sink(expressions: &Rc<RefCell<Vec<Expression>>>) -> OnMatch {
    let expressions = Rc::clone(expressions);
    Rc::new(move |expr: Expression| -> Result<()> {
        expressions.borrow_mut().push(expr);
        Ok(())
    })
}

fn discard() -> OnMatch {
    Rc::new(|_: Expression| -> Result<()> { Ok(()) })
}

/// `label(name)` / `field(name)` on a collector
fn key_method(name: &str, wanted: SelectorKind) -> MethodDescriptor {
    MethodDescriptor::instance(name, Arity::Exact(1), move |lua, this, args| {
        let registry = Registry::from_lua(lua)?;
        let vars = registry.lookup::<CollectorVars>(this.instance)?;
        let (kind, expressions) = {
            let vars = vars.borrow();
            (vars.kind, Rc::clone(&vars.expressions))
        };
        let key_name = match args.front().map(scalar_string).transpose()?.flatten() {
            Some(k) if !k.trim().is_empty() => k,
            _ => return Err(BridgeError::argument("key name must be a non-empty string").into()),
        };
        let path: Vec<String> = key_name.split('.').map(String::from).collect();
        let on_match = if kind == wanted {
            sink(&expressions)
        } else {
            discard()
        };
        Ok(new_key(lua, &registry, wanted, path, on_match)?)
    })
}

fn define_collector(lua: &Lua, registry: &Registry, kind: SelectorKind) -> Result<()> {
    let methods = vec![
        key_method("label", SelectorKind::Label),
        key_method("field", SelectorKind::Field),
        MethodDescriptor::instance("to_s", Arity::Exact(0), |lua, this, _| {
            let registry = Registry::from_lua(lua)?;
            let vars = registry.lookup::<CollectorVars>(this.instance)?;
            let vars = vars.borrow();
            let rendered = render(vars.kind, &vars.expressions.borrow())?;
            Ok(rendered)
        }),
        MethodDescriptor::class("new", Arity::Any, move |lua, args| {
            let block = block_arg(args)?;
            let (ud, _) = new_collector(lua, kind, block)?;
            Ok(ud)
        }),
    ];
    let id = registry.define_class(lua, collector_class(kind), methods)?;

    // Unknown members are key names: well-known keys first, else a fresh key
    let trap: Trap = Rc::new(|lua: &Lua, this: &Receiver, name: &str| {
        let registry = Registry::from_lua(lua)?;
        let vars = registry.lookup::<CollectorVars>(this.instance)?;
        let (kind, expressions, known) = {
            let vars = vars.borrow();
            let known = vars
                .well_known
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, ud)| ud.clone());
            (vars.kind, Rc::clone(&vars.expressions), known)
        };
        let ud = match known {
            Some(ud) => ud,
            None => new_key(lua, &registry, kind, vec![name.to_string()], sink(&expressions))?,
        };
        Ok(Value::UserData(ud))
    });
    registry.set_trap(id, trap)?;
    Ok(())
}

fn new_selector(lua: &Lua, kind: SelectorKind, block: Function) -> Result<(AnyUserData, String)> {
    let (_, expressions) = new_collector(lua, kind, block)?;
    let expressions = expressions.borrow().clone();
    let rendered = render(kind, &expressions)?;

    let registry = Registry::from_lua(lua)?;
    let id = registry.require_class(selector_class(kind))?;
    let (_, ud) = registry.new_instance(
        lua,
        id,
        SelectorVars {
            expressions,
            rendered: rendered.clone(),
        },
    )?;
    Ok((ud, rendered))
}

fn define_selector(lua: &Lua, registry: &Registry, kind: SelectorKind) -> Result<()> {
    let to_s = MethodDescriptor::instance("to_s", Arity::Exact(0), |lua, this, _| {
        let registry = Registry::from_lua(lua)?;
        let vars = registry.lookup::<SelectorVars>(this.instance)?;
        let rendered = vars.borrow().rendered.clone();
        Ok(rendered)
    });
    let methods = vec![
        to_s.alias("inspect"),
        to_s,
        MethodDescriptor::instance("count", Arity::Exact(0), |lua, this, _| {
            let registry = Registry::from_lua(lua)?;
            let vars = registry.lookup::<SelectorVars>(this.instance)?;
            let count = vars.borrow().expressions.len();
            Ok(count)
        }),
        MethodDescriptor::class("new", Arity::Any, move |lua, args| {
            let block = block_arg(args)?;
            let (ud, _) = new_selector(lua, kind, block)?;
            Ok(ud)
        }),
    ];
    registry.define_class(lua, selector_class(kind), methods)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::error::describe;

    fn setup() -> Lua {
        let lua = Lua::new();
        let registry = Registry::install(&lua).unwrap();
        install(&lua, &registry).unwrap();
        lua
    }

    fn eval_string(lua: &Lua, src: &str) -> String {
        lua.load(src).eval::<String>().unwrap()
    }

    #[test]
    fn test_label_block() {
        let lua = setup();
        let s = eval_string(
            &lua,
            r#"return tostring(labels(function(l)
                l.app:is_in("a", "b")
                l.tier:exists()
            end))"#,
        );
        assert_eq!(s, "app in (a, b),tier");
    }

    #[test]
    fn test_arbitrary_keys_and_synonyms() {
        let lua = setup();
        let s = eval_string(
            &lua,
            r#"return tostring(labels(function(l)
                l.release:not_in({ "canary", { "beta" } })
                l:label("example.com/owner")["in"](l:label("example.com/owner"), "ops")
                l.team:eq("core")
                l.zone:ne(1)
            end))"#,
        );
        assert_eq!(
            s,
            "release notin (canary, beta),example.com/owner in (ops),team=core,zone!=1"
        );
    }

    #[test]
    fn test_each_match_appends_one_expression() {
        let lua = setup();
        let count: usize = lua
            .load(
                r#"return labels(function(l)
                    l.app:is_in("a")
                    l.app:is_in("b")
                    l.v:any()
                end):count()"#,
            )
            .eval()
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_field_paths() {
        let lua = setup();
        let s = eval_string(
            &lua,
            r#"return tostring(fields(function(f)
                f.status.phase:eq("Running")
                f:field("spec.nodeName"):not_in("n1", "n2")
                f:label("app"):is_in("ignored")
            end))"#,
        );
        assert_eq!(s, "status.phase==Running,spec.nodeName!=n1,spec.nodeName!=n2");
    }

    #[test]
    fn test_label_pass_ignores_fields() {
        let lua = setup();
        let s = eval_string(
            &lua,
            r#"return tostring(labels(function(q)
                q:field("status.phase"):eq("Running")
                q:label("app"):is_in("web")
            end))"#,
        );
        assert_eq!(s, "app in (web)");
    }

    #[test]
    fn test_rejects_map_operand() {
        let lua = setup();
        let err = lua
            .load(r#"labels(function(l) l.app:is_in({ a = "b" }) end)"#)
            .exec()
            .unwrap_err();
        assert!(describe(&err).contains("a map is an invalid operand"));
    }

    #[test]
    fn test_rejects_blank_string() {
        let lua = setup();
        let err = lua
            .load(r#"labels(function(l) l.app:is_in("  ") end)"#)
            .exec()
            .unwrap_err();
        assert!(describe(&err).contains("invalid string"));
    }

    #[test]
    fn test_collector_construction_contract() {
        let lua = setup();
        let err = lua.load("kube.LabelCollector.new()").exec().unwrap_err();
        assert!(describe(&err).contains("Exactly one argument"));

        let err = lua
            .load("kube.LabelCollector.new(function() end, function() end)")
            .exec()
            .unwrap_err();
        assert!(describe(&err).contains("Exactly one argument"));

        let err = lua.load(r#"kube.LabelCollector.new("app")"#).exec().unwrap_err();
        assert!(describe(&err).contains("must be a function"));

        let s = eval_string(
            &lua,
            r#"return tostring(kube.LabelCollector.new(function(l) l.app:exists() end))"#,
        );
        assert_eq!(s, "app");
    }

    #[test]
    fn test_detached_key_reports_error() {
        let lua = setup();
        let err = lua
            .load(r#"kube.LabelKey.new("app"):is_in("x")"#)
            .exec()
            .unwrap_err();
        assert!(describe(&err).contains("not attached"));
    }

    #[test]
    fn test_evaluate() {
        let lua = setup();
        let block: Function = lua
            .load(r#"return function(l) l.name:is_in("web-1") end"#)
            .eval()
            .unwrap();
        assert_eq!(
            evaluate(&lua, SelectorKind::Label, block.clone()).unwrap(),
            "name in (web-1)"
        );
        assert_eq!(evaluate(&lua, SelectorKind::Field, block).unwrap(), "");
    }

    #[test]
    fn test_mixed_block_splits_by_pass() {
        let lua = setup();
        let block: Function = lua
            .load(
                r#"return function(q)
                    q.app:is_in("web")
                    q.status.phase:eq("Running")
                end"#,
            )
            .eval()
            .unwrap();
        assert_eq!(
            evaluate(&lua, SelectorKind::Label, block.clone()).unwrap(),
            "app in (web)"
        );
        assert_eq!(
            evaluate(&lua, SelectorKind::Field, block).unwrap(),
            "status.phase==Running"
        );
    }
}
