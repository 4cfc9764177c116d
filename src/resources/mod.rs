// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes resource kinds exposed to scripts
//!
//! Every kind gets a list class (`Pods`), an object class (`Pod`), a query
//! verb (`pods(...)`) and a singular getter (`pod("ns/name")`). The wiring is
//! the same for all kinds; a [`ResourceKind`] impl only names the API type
//! and the capabilities mixed into the object class.

mod list;
mod object;
mod pod;

use std::collections::BTreeMap;
use std::rc::Rc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::ApiResource;
use mlua::{Lua, MultiValue, Value};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::bridge::{BridgeError, Registry, Result};
use crate::query;
use crate::session::{ALL_NAMESPACES, State};

pub trait ResourceKind: 'static {
    type Object: kube::Resource<DynamicType = ()> + DeserializeOwned;

    /// Class of query results, e.g. `Pods`
    const LIST_CLASS: &'static str;
    /// Query verb, e.g. `pods`
    const VERB: &'static str;
    /// Getter for a single object, e.g. `pod`
    const SINGULAR: &'static str;
    /// Objects can be created and deleted
    const MUTABLE: bool = false;
    /// Objects manage pods through a label selector
    const FINDS_PODS: bool = false;

    fn pod_selector(_object: &Self::Object) -> Option<BTreeMap<String, String>> {
        None
    }
}

type SelectorFn = fn(&JsonValue) -> Result<Option<BTreeMap<String, String>>>;

/// Type-erased view of a [`ResourceKind`]
pub struct KindInfo {
    pub api_resource: ApiResource,
    pub list_class: &'static str,
    pub verb: &'static str,
    pub singular: &'static str,
    pub mutable: bool,
    pod_selector: Option<SelectorFn>,
}

impl KindInfo {
    pub fn of<K: ResourceKind>() -> Self {
        Self {
            api_resource: ApiResource::erase::<K::Object>(&()),
            list_class: K::LIST_CLASS,
            verb: K::VERB,
            singular: K::SINGULAR,
            mutable: K::MUTABLE,
            pod_selector: K::FINDS_PODS.then_some(selector_of::<K> as SelectorFn),
        }
    }

    /// Object class name, e.g. `Pod`
    pub fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    pub fn finds_pods(&self) -> bool {
        self.pod_selector.is_some()
    }

    /// Labels of the pods an object manages, falling back to its own labels
    pub fn pod_selector(&self, object: &JsonValue) -> Result<BTreeMap<String, String>> {
        let selector = match self.pod_selector {
            Some(f) => f(object)?,
            None => None,
        };
        Ok(match selector {
            Some(s) if !s.is_empty() => s,
            _ => labels_of(object),
        })
    }
}

fn selector_of<K: ResourceKind>(object: &JsonValue) -> Result<Option<BTreeMap<String, String>>> {
    // Typed decoding checks apiVersion and kind, which list items may lack
    let mut object = object.clone();
    if let JsonValue::Object(ref mut map) = object {
        map.remove("apiVersion");
        map.remove("kind");
    }
    let typed: K::Object = serde_json::from_value(object)?;
    Ok(K::pod_selector(&typed))
}

pub struct Pods;

impl ResourceKind for Pods {
    type Object = Pod;
    const LIST_CLASS: &'static str = "Pods";
    const VERB: &'static str = "pods";
    const SINGULAR: &'static str = "pod";
    const MUTABLE: bool = true;
}

pub struct Services;

impl ResourceKind for Services {
    type Object = Service;
    const LIST_CLASS: &'static str = "Services";
    const VERB: &'static str = "services";
    const SINGULAR: &'static str = "service";
    const FINDS_PODS: bool = true;

    fn pod_selector(object: &Service) -> Option<BTreeMap<String, String>> {
        object.spec.as_ref()?.selector.clone()
    }
}

pub struct Deployments;

impl ResourceKind for Deployments {
    type Object = Deployment;
    const LIST_CLASS: &'static str = "Deployments";
    const VERB: &'static str = "deployments";
    const SINGULAR: &'static str = "deployment";
    const FINDS_PODS: bool = true;

    fn pod_selector(object: &Deployment) -> Option<BTreeMap<String, String>> {
        object.spec.as_ref()?.selector.match_labels.clone()
    }
}

pub struct ReplicaSets;

impl ResourceKind for ReplicaSets {
    type Object = ReplicaSet;
    const LIST_CLASS: &'static str = "ReplicaSets";
    const VERB: &'static str = "replicasets";
    const SINGULAR: &'static str = "replicaset";
    const FINDS_PODS: bool = true;

    fn pod_selector(object: &ReplicaSet) -> Option<BTreeMap<String, String>> {
        object.spec.as_ref()?.selector.match_labels.clone()
    }
}

pub struct DaemonSets;

impl ResourceKind for DaemonSets {
    type Object = DaemonSet;
    const LIST_CLASS: &'static str = "DaemonSets";
    const VERB: &'static str = "daemonsets";
    const SINGULAR: &'static str = "daemonset";
    const FINDS_PODS: bool = true;

    fn pod_selector(object: &DaemonSet) -> Option<BTreeMap<String, String>> {
        object.spec.as_ref()?.selector.match_labels.clone()
    }
}

pub fn all_kinds() -> Vec<Rc<KindInfo>> {
    vec![
        Rc::new(KindInfo::of::<Pods>()),
        Rc::new(KindInfo::of::<Services>()),
        Rc::new(KindInfo::of::<Deployments>()),
        Rc::new(KindInfo::of::<ReplicaSets>()),
        Rc::new(KindInfo::of::<DaemonSets>()),
    ]
}

pub(crate) fn meta_str<'a>(object: &'a JsonValue, field: &str) -> &'a str {
    object["metadata"][field].as_str().unwrap_or_default()
}

pub(crate) fn labels_of(object: &JsonValue) -> BTreeMap<String, String> {
    object["metadata"]["labels"]
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Define every kind's classes and the query globals
pub fn install(lua: &Lua, registry: &Registry) -> Result<()> {
    let kinds = all_kinds();
    let pods = Rc::clone(&kinds[0]);

    for kind in &kinds {
        registry.define_class(lua, kind.list_class, list::methods(kind))?;
        let object_class = registry.define_class(lua, kind.kind(), object::methods(kind))?;

        // Capabilities are mixed into the object class
        if kind.mutable {
            registry.append_methods(lua, object_class, object::mutable_methods(kind))?;
        }
        if kind.finds_pods() {
            registry.append_methods(lua, object_class, object::finder_methods(kind, &pods))?;
        }

        install_verbs(lua, kind)?;
        debug!(kind = %kind.kind(), verb = %kind.verb, "Installed resource kind");
    }

    let pod_class = registry.require_class(pods.kind())?;
    registry.append_methods(lua, pod_class, pod::object_methods())?;
    pod::install(lua, registry, &pods)?;
    Ok(())
}

fn install_verbs(lua: &Lua, kind: &Rc<KindInfo>) -> Result<()> {
    let globals = lua.globals();

    let list_kind = Rc::clone(kind);
    globals.set(
        kind.verb,
        lua.create_function(move |lua, args: MultiValue| {
            let query = query::parse_lua(lua, args)?;
            Ok(list::new_list(lua, &list_kind, query)?)
        })?,
    )?;

    let get_kind = Rc::clone(kind);
    globals.set(
        kind.singular,
        lua.create_function(move |lua, args: MultiValue| {
            let target = match args.front() {
                Some(Value::String(s)) if args.len() == 1 => s.to_str()?.to_string(),
                _ => {
                    return Err(BridgeError::argument(format!(
                        "{} expects a single \"name\" or \"namespace/name\" argument",
                        get_kind.singular
                    ))
                    .into());
                }
            };
            let state = State::from_lua(lua)?;
            // `*/name` and `/name` fall back like a bare name
            let (namespace, name) = match target.split_once('/') {
                Some((ns, name)) if ns != ALL_NAMESPACES && !ns.is_empty() => {
                    (ns.to_string(), name.to_string())
                }
                Some((_, name)) => (state.default_namespace(), name.to_string()),
                None => (state.default_namespace(), target),
            };
            let object = state
                .cluster()
                .get(&get_kind.api_resource, &namespace, &name)?;
            Ok(object::new_object(lua, &get_kind, object)?)
        })?,
    )?;
    Ok(())
}
