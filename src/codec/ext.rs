//! Ext-type hook registry: application types carried over MsgPack's Ext
//! wire type, keyed by an integer tag in `-128..127`.
//!
//! Per design note (b) in the original specification: rather than invent a
//! fixed enumeration of "extra" shapes, the registry hands tagged bytes to
//! a caller-registered pair of hooks. Unregistered tags pass through as
//! opaque `Value::Ext(tag, bytes)`.

use super::Value;
use std::collections::HashMap;
use std::sync::Arc;

type EncodeHook = Arc<dyn Fn(&Value) -> Option<Vec<u8>> + Send + Sync>;
type DecodeHook = Arc<dyn Fn(&[u8]) -> Value + Send + Sync>;

#[derive(Clone, Default)]
pub struct ExtRegistry {
    encoders: HashMap<i8, EncodeHook>,
    decoders: HashMap<i8, DecodeHook>,
}

impl ExtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers both directions for a single tag.
    pub fn register(
        &mut self,
        tag: i8,
        encode: impl Fn(&Value) -> Option<Vec<u8>> + Send + Sync + 'static,
        decode: impl Fn(&[u8]) -> Value + Send + Sync + 'static,
    ) {
        self.encoders.insert(tag, Arc::new(encode));
        self.decoders.insert(tag, Arc::new(decode));
    }

    /// Encodes `value` as `Value::Ext(tag, bytes)` if a hook for `tag` is
    /// registered and accepts the value; otherwise returns `None`.
    pub fn try_encode(&self, tag: i8, value: &Value) -> Option<Value> {
        let hook = self.encoders.get(&tag)?;
        let bytes = hook(value)?;
        Some(Value::Ext(tag, bytes))
    }

    /// Reinterprets a raw `Value::Ext(tag, bytes)` through the registered
    /// decode hook, if any; otherwise returns the Ext value unchanged.
    pub fn resolve(&self, value: Value) -> Value {
        if let Value::Ext(tag, bytes) = &value {
            if let Some(hook) = self.decoders.get(tag) {
                return hook(bytes);
            }
        }
        value
    }
}
