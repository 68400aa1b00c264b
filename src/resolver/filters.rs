//! Structural module filters
//!
//! A [`Filter`] carries identity: the resolver caches by *which* filter was
//! passed, not by what it checks. Two `by_props(&["a"])` calls produce two
//! distinct cache entries unless the caller reuses one filter (or goes
//! through the resolver's interning helpers).

use std::fmt;
use std::sync::Arc;

use crate::host::{ObjectRef, Value};

struct FilterInner {
    label: String,
    matcher: Box<dyn Fn(&ObjectRef) -> bool + Send + Sync>,
}

/// Identity-bearing predicate over a module's exports
#[derive(Clone)]
pub struct Filter {
    inner: Arc<FilterInner>,
}

impl Filter {
    pub fn new<F>(label: impl Into<String>, matcher: F) -> Self
    where
        F: Fn(&ObjectRef) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FilterInner {
                label: label.into(),
                matcher: Box::new(matcher),
            }),
        }
    }

    pub fn matches(&self, exports: &ObjectRef) -> bool {
        (self.inner.matcher)(exports)
    }

    /// Human readable description, used in logs
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn ptr_eq(&self, other: &Filter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Identity key; stable as long as some clone of this filter is alive
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({})", self.inner.label)
    }
}

/// Modules exposing every one of `props`
pub fn by_props(props: &[&str]) -> Filter {
    let props: Vec<String> = props.iter().map(|p| p.to_string()).collect();
    Filter::new(format!("props({})", props.join(",")), move |exports| {
        props.iter().all(|p| exports.has(p))
    })
}

/// Modules whose `displayName` equals `name`
pub fn by_display_name(name: &str) -> Filter {
    let name = name.to_string();
    Filter::new(format!("displayName({})", name), move |exports| {
        exports.get("displayName").as_ref().and_then(Value::as_str) == Some(name.as_str())
    })
}

/// Modules whose `type.name` equals `name`
pub fn by_type_name(name: &str) -> Filter {
    let name = name.to_string();
    Filter::new(format!("typeName({})", name), move |exports| {
        exports
            .get("type")
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|ty| ty.get("name"))
            .as_ref()
            .and_then(Value::as_str)
            == Some(name.as_str())
    })
}

/// Stores whose `getName()` returns `name`; a throwing `getName` is a miss
pub fn by_store_name(name: &str) -> Filter {
    let name = name.to_string();
    Filter::new(format!("storeName({})", name), move |exports| {
        if !matches!(exports.get("getName"), Some(Value::Function(_))) {
            return false;
        }
        matches!(
            exports.call_method("getName", Vec::new()),
            Ok(Value::String(store)) if store == name
        )
    })
}
