//! Patch records and the dispatcher installed in place of a patched function

use std::sync::Arc;

use crate::core::error::{PatchworkError, Result};
use crate::host::{Function, ObjectRef, Value};

use super::interceptor::{Interceptor, Layer};

/// Identity of a patched property: `(owner identity, property name)`
pub(crate) type PatchKey = (usize, String);

/// What the patched property held before the dispatcher went in
#[derive(Clone)]
pub(crate) enum Original {
    Absent,
    Undefined,
    Function(Function),
}

impl Original {
    /// Read `owner[key]`; anything other than a function or nothing is refused
    pub fn capture(owner: &ObjectRef, key: &str) -> Result<Self> {
        match owner.get(key) {
            None => Ok(Original::Absent),
            Some(Value::Undefined) => Ok(Original::Undefined),
            Some(Value::Function(f)) => Ok(Original::Function(f)),
            Some(other) => Err(PatchworkError::PatchTargetInvalid {
                key: key.to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    pub fn function(&self) -> Option<&Function> {
        match self {
            Original::Function(f) => Some(f),
            _ => None,
        }
    }
}

/// The single composition point for one `(owner, key)` pair
pub(crate) struct PatchRecord {
    /// Distinguishes this record from earlier ones on the same key
    pub serial: u64,
    pub owner: ObjectRef,
    pub key: String,
    pub original: Original,
    pub dispatcher: Function,
    pub layers: Vec<Arc<Layer>>,
}

impl PatchRecord {
    /// Whether the owner still holds this record's dispatcher
    pub fn is_installed(&self) -> bool {
        matches!(
            self.owner.get(&self.key),
            Some(Value::Function(current)) if current.ptr_eq(&self.dispatcher)
        )
    }

    /// Put the original back, or delete the property if it was absent.
    ///
    /// If something else has replaced our dispatcher on the owner in the
    /// meantime, the foreign value is left alone.
    pub fn restore(&self) -> bool {
        if !self.is_installed() {
            return false;
        }
        match &self.original {
            Original::Function(original) => {
                self.owner.set(self.key.clone(), original.clone());
            }
            Original::Undefined => {
                self.owner.set(self.key.clone(), Value::Undefined);
            }
            Original::Absent => {
                self.owner.delete(&self.key);
            }
        }
        true
    }
}

/// Run one call through a snapshot of the layer stack
pub(crate) fn dispatch(
    key: &str,
    layers: &[Arc<Layer>],
    original: Option<&Function>,
    this: &Value,
    mut args: Vec<Value>,
) -> Result<Value> {
    for layer in layers {
        if let Interceptor::Before(before) = &layer.interceptor {
            if let Some(replaced) = before(this, &args)? {
                args = replaced;
            }
        }
    }

    let replacement = layers.iter().rev().find_map(|layer| match &layer.interceptor {
        Interceptor::Instead(instead) => Some(instead),
        _ => None,
    });

    let mut ret = match (replacement, original) {
        (Some(instead), _) => instead(this, args.clone(), original)?,
        (None, Some(original)) => original.call(this, args.clone())?,
        (None, None) => return Err(PatchworkError::NotCallable(key.to_string())),
    };

    for layer in layers.iter().rev() {
        if let Interceptor::After(after) = &layer.interceptor {
            if let Some(replaced) = after(this, &args, &ret)? {
                ret = replaced;
            }
        }
    }

    Ok(ret)
}
