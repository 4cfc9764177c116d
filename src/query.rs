//! Resource query argument parsing
//!
//! Normalizes what an operator types after a resource verb into a namespace
//! override, an optional name filter and the list options:
//!
//! ```lua
//! pods()                                   -- session namespace
//! pods "kube-system/"                      -- one namespace
//! pods "*/"                                -- all namespaces
//! pods "*/web-*"                           -- name glob, all namespaces
//! pods { labels = "app=web" }              -- literal selectors
//! pods("web-*", { fields = function(f) f.status.phase:eq("Running") end })
//! pods(function(q) q.app:is_in("web") end) -- block used for labels and fields
//! ```

use std::sync::LazyLock;

use mlua::{Function, Lua, MultiValue, Value};
use regex::Regex;
use tracing::debug;

use crate::bridge::{BridgeError, ParamSchema, ParamType, ParamValue, Result};
use crate::kubernetes::ListOptions;
use crate::selector::SelectorKind;
use crate::selector::dsl;

const VALID_NAME: &str = "[a-z0-9]([-a-z0-9]*[a-z0-9])?";

const INVALID_GLOB: &str =
    "Invalid glob expression - try `pods \"<namespace>/\"`, `pods \"*/\"` or `pods \"*/foo-*\"`";

struct GlobPatterns {
    within_namespace: Regex,
    begins_with: Regex,
    ends_with: Regex,
    contains: Regex,
}

static GLOBS: LazyLock<GlobPatterns> = LazyLock::new(|| {
    let ns = format!(r"(?P<namespace>{}|\*)", VALID_NAME);
    let compile = |p: String| Regex::new(&p).unwrap_or_else(|e| panic!("bad glob pattern {}: {}", p, e));
    GlobPatterns {
        // "foo/", "*/", "foo/*"
        within_namespace: compile(format!(r"^{}/(\*)?$", ns)),
        // "foo-*"
        begins_with: compile(format!(r"^({}/)?(?P<name>{}(-)?)\*$", ns, VALID_NAME)),
        // "*-bar"
        ends_with: compile(format!(r"^({}/)?\*(?P<name>(-)?{})$", ns, VALID_NAME)),
        // "*-bar-*"
        contains: compile(format!(r"^({}/)?\*(?P<name>(-)?{}(-)?)\*$", ns, VALID_NAME)),
    }
});

/// Where a selector string comes from
#[derive(Debug, Clone)]
pub enum SelectorSource<B> {
    Literal(String),
    Block(B),
}

#[derive(Debug, Clone)]
pub struct QueryParams<B> {
    pub labels: Option<SelectorSource<B>>,
    pub fields: Option<SelectorSource<B>>,
}

/// One positional argument of a query call
#[derive(Debug, Clone)]
pub enum QueryArg<B> {
    Glob(String),
    Params(QueryParams<B>),
    Block(B),
    /// An array of globs
    Sequence,
    Unsupported(&'static str),
}

/// Canonical form of a query
#[derive(Debug, Clone, Default)]
pub struct ResourceQuery {
    /// `None`: no override, the session namespace applies.
    /// `Some("")`: all namespaces.
    pub namespace: Option<String>,
    pub name_filter: Option<Regex>,
    pub options: ListOptions,
}

impl ResourceQuery {
    pub fn matches_name(&self, name: &str) -> bool {
        self.name_filter.as_ref().is_none_or(|re| re.is_match(name))
    }
}

/// Parse query arguments; `eval` renders a selector block of the given kind
pub fn parse<B, E>(args: &[QueryArg<B>], mut eval: E) -> Result<ResourceQuery>
where
    E: FnMut(SelectorKind, &B) -> Result<String>,
{
    if args.len() > 2 {
        return Err(BridgeError::argument("Maximum 2 arguments allowed"));
    }

    let mut query = ResourceQuery::default();
    let mut has_glob = false;
    let mut has_selectors = false;

    for arg in args {
        match arg {
            QueryArg::Glob(s) => {
                if has_glob {
                    return Err(second_argument("glob"));
                }
                parse_glob(s, &mut query)?;
                has_glob = true;
            }
            QueryArg::Params(params) => {
                if has_selectors {
                    return Err(second_argument("selector"));
                }
                if let Some(labels) = &params.labels {
                    query.options.label_selector = resolve(labels, SelectorKind::Label, &mut eval)?;
                }
                if let Some(fields) = &params.fields {
                    query.options.field_selector = resolve(fields, SelectorKind::Field, &mut eval)?;
                }
                has_selectors = true;
            }
            QueryArg::Block(block) => {
                if has_selectors {
                    return Err(second_argument("selector"));
                }
                query.options.label_selector = eval(SelectorKind::Label, block)?;
                query.options.field_selector = eval(SelectorKind::Field, block)?;
                has_selectors = true;
            }
            QueryArg::Sequence => {
                return Err(BridgeError::argument(
                    "Multiple glob queries are not implemented",
                ));
            }
            QueryArg::Unsupported(ty) => {
                return Err(BridgeError::argument(format!(
                    "Unsupported query argument of type {}",
                    ty
                )));
            }
        }
    }

    debug!(
        namespace = ?query.namespace,
        name_filter = ?query.name_filter.as_ref().map(|r| r.as_str()),
        label_selector = %query.options.label_selector,
        field_selector = %query.options.field_selector,
        "Parsed resource query"
    );
    Ok(query)
}

fn second_argument(kind: &str) -> BridgeError {
    BridgeError::argument(format!(
        "Found second {} argument, only single one is allowed",
        kind
    ))
}

fn resolve<B, E>(source: &SelectorSource<B>, kind: SelectorKind, eval: &mut E) -> Result<String>
where
    E: FnMut(SelectorKind, &B) -> Result<String>,
{
    match source {
        SelectorSource::Literal(s) => Ok(s.clone()),
        SelectorSource::Block(b) => eval(kind, b),
    }
}

fn parse_glob(s: &str, query: &mut ResourceQuery) -> Result<()> {
    let globs = &*GLOBS;

    let namespace_of = |caps: &regex::Captures<'_>| {
        caps.name("namespace").map(|m| match m.as_str() {
            "*" => String::new(),
            ns => ns.to_string(),
        })
    };
    let name_of = |caps: &regex::Captures<'_>| {
        caps.name("name")
            .map(|m| regex::escape(m.as_str()))
            .unwrap_or_default()
    };

    let (namespace, pattern) = if let Some(caps) = globs.within_namespace.captures(s) {
        (namespace_of(&caps), None)
    } else if let Some(caps) = globs.begins_with.captures(s) {
        let p = name_of(&caps);
        (namespace_of(&caps), Some(format!("^({})-?({})$", p, VALID_NAME)))
    } else if let Some(caps) = globs.ends_with.captures(s) {
        let p = name_of(&caps);
        (namespace_of(&caps), Some(format!("^({})-?({})$", VALID_NAME, p)))
    } else if let Some(caps) = globs.contains.captures(s) {
        let p = name_of(&caps);
        (
            namespace_of(&caps),
            Some(format!("^({})?-?({})-?({})?$", VALID_NAME, p, VALID_NAME)),
        )
    } else if s == "*" {
        (None, None)
    } else {
        return Err(BridgeError::argument(INVALID_GLOB));
    };

    if namespace.is_some() {
        query.namespace = namespace;
    }
    if let Some(p) = pattern {
        let re = Regex::new(&p).map_err(|e| BridgeError::argument(e.to_string()))?;
        query.name_filter = Some(re);
    }
    Ok(())
}

/// Decode Lua call arguments into query arguments
pub fn decode_args(args: MultiValue) -> Result<Vec<QueryArg<Function>>> {
    let schema = ParamSchema::new("query")
        .allow("labels", ParamType::StringOrBlock)
        .allow("fields", ParamType::StringOrBlock);

    let source = |value: Option<&ParamValue>| match value {
        Some(ParamValue::String(s)) => Some(SelectorSource::Literal(s.clone())),
        Some(ParamValue::Block(f)) => Some(SelectorSource::Block(f.clone())),
        _ => None,
    };

    let mut decoded = Vec::with_capacity(args.len());
    for arg in args {
        let arg = match arg {
            Value::String(s) => QueryArg::Glob(s.to_str()?.to_string()),
            Value::Function(f) => QueryArg::Block(f),
            Value::Table(t) if t.raw_len() > 0 => QueryArg::Sequence,
            Value::Table(t) => {
                let params = schema.parse(&t)?;
                QueryArg::Params(QueryParams {
                    labels: source(params.get("labels")),
                    fields: source(params.get("fields")),
                })
            }
            other => QueryArg::Unsupported(other.type_name()),
        };
        decoded.push(arg);
    }
    Ok(decoded)
}

/// Parse the arguments of a scripted query call, evaluating blocks through the selector DSL
pub fn parse_lua(lua: &Lua, args: MultiValue) -> Result<ResourceQuery> {
    let decoded = decode_args(args)?;
    parse(&decoded, |kind, block: &Function| {
        dsl::evaluate(lua, kind, block.clone())
    })
}
