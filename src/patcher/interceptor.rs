//! Interceptor layers
//!
//! Composition order on one patched function:
//! - `Before` layers run in insertion order and may rewrite the arguments
//! - the topmost `Instead` layer (if any) replaces the original call
//! - `After` layers run in reverse insertion order and may rewrite the result

use std::fmt;
use std::sync::Arc;

use crate::core::consumer::ConsumerId;
use crate::core::error::Result;
use crate::host::{Function, Value};

/// `(this, args) -> replacement args`
pub type BeforeFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Option<Vec<Value>>> + Send + Sync>;

/// `(this, args, result) -> replacement result`
pub type AfterFn = Arc<dyn Fn(&Value, &[Value], &Value) -> Result<Option<Value>> + Send + Sync>;

/// `(this, args, original) -> result`; `original` is `None` when the patched
/// property did not exist.
pub type InsteadFn =
    Arc<dyn Fn(&Value, Vec<Value>, Option<&Function>) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorKind {
    Pre,
    Post,
    Replace,
}

/// One callback layered onto a patched function
#[derive(Clone)]
pub enum Interceptor {
    Before(BeforeFn),
    After(AfterFn),
    Instead(InsteadFn),
}

impl Interceptor {
    pub fn before<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Option<Vec<Value>>> + Send + Sync + 'static,
    {
        Interceptor::Before(Arc::new(f))
    }

    pub fn after<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value], &Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Interceptor::After(Arc::new(f))
    }

    pub fn instead<F>(f: F) -> Self
    where
        F: Fn(&Value, Vec<Value>, Option<&Function>) -> Result<Value> + Send + Sync + 'static,
    {
        Interceptor::Instead(Arc::new(f))
    }

    pub fn kind(&self) -> InterceptorKind {
        match self {
            Interceptor::Before(_) => InterceptorKind::Pre,
            Interceptor::After(_) => InterceptorKind::Post,
            Interceptor::Instead(_) => InterceptorKind::Replace,
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interceptor::{:?}", self.kind())
    }
}

/// An interceptor as stored in a patch record
#[derive(Debug)]
pub(crate) struct Layer {
    pub id: u64,
    pub interceptor: Interceptor,
    pub installer: ConsumerId,
}
