// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Class/instance registry
//!
//! Exposes host types to Lua as classes and keeps the host-side state of
//! every instance in an arena owned by the session. Lua only ever sees an
//! [`Instance`] userdata carrying the class id and an arena index, so
//! recovering the native state from a handle is an O(1) slot lookup that
//! does not depend on Lua value identity or on the garbage collector.
//!
//! Classes are published under the global `kube` table. Method calls go
//! through the instance's `__index` metamethod: integer keys dispatch to the
//! class's `[]` method, string keys resolve to a bound method, then to the
//! class trap (if any), else `nil`.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use mlua::{
    AnyUserData, Function, IntoLuaMulti, Lua, MetaMethod, MultiValue, Table, UserData,
    UserDataMethods, Value,
};
use tracing::{debug, trace};

use super::error::{BridgeError, Result};

/// Name of the global table holding every class
pub const ROOT_TABLE: &str = "kube";

/// Index of a class in the registry
pub type ClassId = usize;

/// Arena index of an instance, stable for the whole session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of arguments a method accepts, not counting the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn check(&self, given: usize) -> Result<()> {
        let ok = match *self {
            Arity::Exact(n) => given == n,
            Arity::Range(lo, hi) => (lo..=hi).contains(&given),
            Arity::AtLeast(n) => given >= n,
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(BridgeError::argument(format!(
                "wrong number of arguments (given {}, expected {})",
                given, self
            )))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Range(lo, hi) => write!(f, "{}..{}", lo, hi),
            Arity::AtLeast(n) => write!(f, "{}+", n),
            Arity::Any => write!(f, "any"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Class,
    Instance,
}

/// The receiver of an instance method: the decoded handle plus the original
/// Lua value, so handlers can return `self` for chaining
#[derive(Clone)]
pub struct Receiver {
    pub instance: Instance,
    pub value: AnyUserData,
}

type ClassFn = Rc<dyn Fn(&Lua, MultiValue) -> mlua::Result<MultiValue>>;
type InstanceFn = Rc<dyn Fn(&Lua, &Receiver, MultiValue) -> mlua::Result<MultiValue>>;

/// Hook receiving member names a class does not define
pub type Trap = Rc<dyn Fn(&Lua, &Receiver, &str) -> mlua::Result<Value>>;

#[derive(Clone)]
enum Handler {
    Class(ClassFn),
    Instance(InstanceFn),
}

#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    arity: Arity,
    handler: Handler,
}

impl MethodDescriptor {
    pub fn instance<F, R>(name: &str, arity: Arity, f: F) -> Self
    where
        F: Fn(&Lua, &Receiver, MultiValue) -> mlua::Result<R> + 'static,
        R: IntoLuaMulti,
    {
        let handler: InstanceFn =
            Rc::new(move |lua: &Lua, this: &Receiver, args: MultiValue| {
                f(lua, this, args)?.into_lua_multi(lua)
            });
        Self {
            name: name.to_string(),
            arity,
            handler: Handler::Instance(handler),
        }
    }

    pub fn class<F, R>(name: &str, arity: Arity, f: F) -> Self
    where
        F: Fn(&Lua, MultiValue) -> mlua::Result<R> + 'static,
        R: IntoLuaMulti,
    {
        let handler: ClassFn = Rc::new(move |lua: &Lua, args: MultiValue| {
            f(lua, args)?.into_lua_multi(lua)
        });
        Self {
            name: name.to_string(),
            arity,
            handler: Handler::Class(handler),
        }
    }

    /// Same method published under another name
    pub fn alias(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    pub fn kind(&self) -> MethodKind {
        match self.handler {
            Handler::Class(_) => MethodKind::Class,
            Handler::Instance(_) => MethodKind::Instance,
        }
    }
}

/// Lua-side view of a registered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instance {
    class: ClassId,
    handle: Handle,
}

impl Instance {
    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Decode a Lua value into an instance, if it is one
    pub fn from_value(value: &Value) -> Option<Instance> {
        match value {
            Value::UserData(ud) => ud.borrow::<Instance>().ok().map(|i| *i),
            _ => None,
        }
    }
}

impl UserData for Instance {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function(
            MetaMethod::Index,
            |lua, (ud, key): (AnyUserData, Value)| {
                let registry = Registry::from_lua(lua)?;
                registry.index(lua, ud, key)
            },
        );

        methods.add_meta_function(MetaMethod::ToString, |lua, ud: AnyUserData| {
            let registry = Registry::from_lua(lua)?;
            let this = *ud.borrow::<Instance>()?;
            match registry.method(this.class, "to_s")? {
                Some(to_s) => to_s.call::<String>(ud),
                None => Ok(format!("<{} #{}>", registry.class_name(this.class)?, this.handle)),
            }
        });

        methods.add_meta_function(
            MetaMethod::Eq,
            |_, (a, b): (AnyUserData, AnyUserData)| {
                let a = a.borrow::<Instance>().map(|i| *i);
                let b = b.borrow::<Instance>().map(|i| *i);
                Ok(matches!((a, b), (Ok(a), Ok(b)) if a == b))
            },
        );

        methods.add_meta_function(MetaMethod::Len, |lua, ud: AnyUserData| {
            let registry = Registry::from_lua(lua)?;
            let this = *ud.borrow::<Instance>()?;
            match registry.method(this.class, "count")? {
                Some(count) => count.call::<Value>(ud),
                None => Err(BridgeError::argument(format!(
                    "{} has no length",
                    registry.class_name(this.class)?
                ))
                .into()),
            }
        });
    }
}

struct ClassEntry {
    name: String,
    table: Table,
    methods: Vec<(String, Arity, MethodKind)>,
    trap: Option<Trap>,
    object_count: usize,
}

struct Slot {
    class: ClassId,
    vars: Rc<dyn Any>,
}

/// Session-owned arena of classes and instance state
///
/// Stored in the Lua app data as `Rc<Registry>`. `RefCell` borrows are
/// released before any Lua function is called, so handlers may freely
/// re-enter the registry.
pub struct Registry {
    root: Table,
    classes: RefCell<Vec<ClassEntry>>,
    slots: RefCell<Vec<Slot>>,
}

impl Registry {
    /// Create the registry, publish the `kube` table and attach to the Lua state
    pub fn install(lua: &Lua) -> Result<Rc<Registry>> {
        let root = lua.create_table()?;
        lua.globals().set(ROOT_TABLE, root.clone())?;
        let registry = Rc::new(Registry {
            root,
            classes: RefCell::new(Vec::new()),
            slots: RefCell::new(Vec::new()),
        });
        lua.set_app_data(Rc::clone(&registry));
        Ok(registry)
    }

    pub fn from_lua(lua: &Lua) -> Result<Rc<Registry>> {
        lua.app_data_ref::<Rc<Registry>>()
            .map(|r| Rc::clone(&r))
            .ok_or_else(|| BridgeError::ClassDefinition("registry is not installed".into()))
    }

    /// Define a named class with its methods
    ///
    /// Every class also receives the class method `object_count`.
    pub fn define_class(
        &self,
        lua: &Lua,
        name: &str,
        methods: Vec<MethodDescriptor>,
    ) -> Result<ClassId> {
        if !is_class_name(name) || self.class_id(name).is_some() {
            return Err(BridgeError::ClassDefinition(name.to_string()));
        }

        let table = lua.create_table()?;
        let id = {
            let mut classes = self.classes.borrow_mut();
            classes.push(ClassEntry {
                name: name.to_string(),
                table: table.clone(),
                methods: Vec::new(),
                trap: None,
                object_count: 0,
            });
            classes.len() - 1
        };

        let object_count = MethodDescriptor::class("object_count", Arity::Exact(0), move |lua, _| {
            let registry = Registry::from_lua(lua)?;
            Ok(registry.object_count(id)?)
        });

        let mut all = methods;
        all.push(object_count);
        self.append_methods(lua, id, all)?;
        self.root.set(name, table)?;

        debug!(class = %name, id, "Defined class");
        Ok(id)
    }

    /// Add methods to an already defined class
    pub fn append_methods(
        &self,
        lua: &Lua,
        class: ClassId,
        methods: Vec<MethodDescriptor>,
    ) -> Result<()> {
        let (class_name, table) = {
            let classes = self.classes.borrow();
            let entry = classes
                .get(class)
                .ok_or_else(|| BridgeError::ClassDefinition(format!("class #{}", class)))?;
            (entry.name.clone(), entry.table.clone())
        };

        for method in methods {
            let func = bind(lua, class, &class_name, &table, &method)?;
            table.set(method.name.as_str(), func)?;
            trace!(class = %class_name, method = %method.name, "Bound method");

            let mut classes = self.classes.borrow_mut();
            if let Some(entry) = classes.get_mut(class) {
                entry.methods.retain(|(n, _, _)| n != &method.name);
                entry.methods.push((method.name.clone(), method.arity, method.kind()));
            }
        }
        Ok(())
    }

    /// Install the hook that receives unknown member names
    pub fn set_trap(&self, class: ClassId, trap: Trap) -> Result<()> {
        let mut classes = self.classes.borrow_mut();
        let entry = classes
            .get_mut(class)
            .ok_or_else(|| BridgeError::ClassDefinition(format!("class #{}", class)))?;
        entry.trap = Some(trap);
        Ok(())
    }

    /// Allocate a new instance of `class` owning `vars`
    pub fn new_instance<T: 'static>(
        &self,
        lua: &Lua,
        class: ClassId,
        vars: T,
    ) -> Result<(Instance, AnyUserData)> {
        let handle = {
            let mut classes = self.classes.borrow_mut();
            let entry = classes
                .get_mut(class)
                .ok_or_else(|| BridgeError::ClassDefinition(format!("class #{}", class)))?;
            entry.object_count += 1;

            let mut slots = self.slots.borrow_mut();
            slots.push(Slot {
                class,
                vars: Rc::new(RefCell::new(vars)),
            });
            Handle(slots.len() - 1)
        };

        let instance = Instance { class, handle };
        let ud = lua.create_userdata(instance)?;
        Ok((instance, ud))
    }

    /// Recover the native state of an instance
    ///
    /// Returns the same `Rc` for every call with the same live handle.
    pub fn lookup<T: 'static>(&self, instance: Instance) -> Result<Rc<RefCell<T>>> {
        let not_found = || BridgeError::InstanceNotFound {
            class: self
                .class_name(instance.class)
                .unwrap_or_else(|_| format!("class #{}", instance.class)),
            handle: instance.handle.0,
        };

        let vars = {
            let slots = self.slots.borrow();
            let slot = slots
                .get(instance.handle.0)
                .filter(|s| s.class == instance.class)
                .ok_or_else(not_found)?;
            Rc::clone(&slot.vars)
        };
        vars.downcast::<RefCell<T>>().map_err(|_| not_found())
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.classes.borrow().iter().position(|c| c.name == name)
    }

    /// Like [`Registry::class_id`], for classes that must already be defined
    pub fn require_class(&self, name: &str) -> Result<ClassId> {
        self.class_id(name)
            .ok_or_else(|| BridgeError::ClassDefinition(format!("{} is not defined", name)))
    }

    pub fn class_name(&self, class: ClassId) -> Result<String> {
        self.classes
            .borrow()
            .get(class)
            .map(|c| c.name.clone())
            .ok_or_else(|| BridgeError::ClassDefinition(format!("class #{}", class)))
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.borrow().iter().map(|c| c.name.clone()).collect()
    }

    pub fn method_names(&self, class: ClassId) -> Vec<String> {
        self.classes
            .borrow()
            .get(class)
            .map(|c| c.methods.iter().map(|(n, _, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    pub fn object_count(&self, class: ClassId) -> Result<usize> {
        self.classes
            .borrow()
            .get(class)
            .map(|c| c.object_count)
            .ok_or_else(|| BridgeError::ClassDefinition(format!("class #{}", class)))
    }

    /// Call an instance method by name, as scripts would with `obj:name(...)`
    pub fn call_method<R: mlua::FromLuaMulti>(
        &self,
        ud: &AnyUserData,
        name: &str,
        args: impl IntoLuaMulti,
        lua: &Lua,
    ) -> mlua::Result<R> {
        let this = *ud.borrow::<Instance>()?;
        let func = self.method(this.class, name)?.ok_or_else(|| {
            BridgeError::argument(format!(
                "undefined method '{}' for {}",
                name,
                self.class_name(this.class).unwrap_or_default()
            ))
        })?;
        let mut values = args.into_lua_multi(lua)?;
        values.push_front(Value::UserData(ud.clone()));
        func.call::<R>(values)
    }

    fn method(&self, class: ClassId, name: &str) -> Result<Option<Function>> {
        let table = self.table(class)?;
        Ok(table.raw_get::<Option<Function>>(name)?)
    }

    fn table(&self, class: ClassId) -> Result<Table> {
        self.classes
            .borrow()
            .get(class)
            .map(|c| c.table.clone())
            .ok_or_else(|| BridgeError::ClassDefinition(format!("class #{}", class)))
    }

    fn index(&self, lua: &Lua, ud: AnyUserData, key: Value) -> mlua::Result<Value> {
        let this = *ud.borrow::<Instance>()?;
        match key {
            Value::Integer(_) | Value::Number(_) => match self.method(this.class, "[]")? {
                Some(at) => at.call::<Value>((ud, key)),
                None => Ok(Value::Nil),
            },
            Value::String(s) => {
                let name = s.to_str()?.to_string();
                if let Some(func) = self.method(this.class, &name)? {
                    return Ok(Value::Function(func));
                }
                let trap = self
                    .classes
                    .borrow()
                    .get(this.class)
                    .and_then(|c| c.trap.clone());
                match trap {
                    Some(trap) => {
                        let receiver = Receiver {
                            instance: this,
                            value: ud,
                        };
                        trap(lua, &receiver, &name)
                    }
                    None => Ok(Value::Nil),
                }
            }
            _ => Ok(Value::Nil),
        }
    }
}

fn bind(
    lua: &Lua,
    class: ClassId,
    class_name: &str,
    class_table: &Table,
    method: &MethodDescriptor,
) -> Result<Function> {
    let arity = method.arity;
    let qualified = format!("{}#{}", class_name, method.name);

    let func = match &method.handler {
        Handler::Instance(handler) => {
            let handler = Rc::clone(handler);
            let class_name = class_name.to_string();
            lua.create_function(move |lua, mut args: MultiValue| {
                let receiver = match args.pop_front() {
                    Some(Value::UserData(ud)) => match ud.borrow::<Instance>().map(|i| *i) {
                        Ok(instance) if instance.class == class => Some(Receiver {
                            instance,
                            value: ud.clone(),
                        }),
                        _ => None,
                    },
                    _ => None,
                };
                let receiver = receiver.ok_or_else(|| {
                    BridgeError::argument(format!(
                        "{} must be called on a {} instance (use ':')",
                        qualified, class_name
                    ))
                })?;
                arity
                    .check(args.len())
                    .map_err(|e| BridgeError::argument(format!("{}: {}", qualified, e)))?;
                handler(lua, &receiver, args)
            })?
        }
        Handler::Class(handler) => {
            let handler = Rc::clone(handler);
            let own_table: *const c_void = class_table.to_pointer();
            lua.create_function(move |lua, mut args: MultiValue| {
                // Accept both `Class.m()` and `Class:m()`
                if let Some(Value::Table(t)) = args.front()
                    && t.to_pointer() == own_table
                {
                    args.pop_front();
                }
                arity
                    .check(args.len())
                    .map_err(|e| BridgeError::argument(format!("{}: {}", qualified, e)))?;
                handler(lua, args)
            })?
        }
    };
    Ok(func)
}

fn is_class_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
