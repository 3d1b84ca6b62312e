use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::Payload;

/// Free-form request handed to every selected unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnitInput {
    /// The caller's request text
    pub text: String,
    /// Additional structured input; the core never interprets it
    #[serde(default)]
    pub data: Payload,
}

impl UnitInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: Payload::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

impl From<&str> for UnitInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for UnitInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Opaque execution context shared by every unit of one session.
///
/// Units that know the concrete type recover it with
/// [`SharedContext::downcast_ref`]; the core only clones the handle.
#[derive(Clone, Default)]
pub struct SharedContext {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

impl SharedContext {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Some(Arc::new(value)),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_deref().and_then(|v| v.downcast_ref::<T>())
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("present", &self.inner.is_some())
            .finish()
    }
}
