//! Opaque per-frame payloads

use core::any::Any;
use core::fmt;
use std::sync::Arc;

/// Caller-typed value carried by a frame
///
/// The value is stored type-erased and shared, so cloning a frame or a
/// payload never clones the value itself. Reading it back requires naming
/// the type it was created with.
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
    /// Erase `value` into a payload
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an already shared value
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    /// Borrow the value as `T`
    ///
    /// # Panics
    ///
    /// Panics when the payload was not created from a `T`. Extracting by the
    /// wrong type is an instrumentation bug, not a runtime condition.
    #[track_caller]
    pub fn extract<T: Any>(&self) -> &T {
        match self.0.downcast_ref::<T>() {
            Some(value) => value,
            None => panic!(
                "payload extracted as {} but holds a different type",
                core::any::type_name::<T>()
            ),
        }
    }

    /// Borrow the value as `T`, or `None` if it holds another type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// True when the payload holds a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Payload(..)")
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&'static str> for Payload {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}
