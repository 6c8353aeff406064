//! Provider registry.
//!
//! Backends are selected by a provider identifier (for example `aws` or
//! `azure`). A [`Registry`] maps each identifier to a factory and is filled
//! explicitly at process start, then handed to whatever needs to build a
//! backend instance. There is no global registration state.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use seistore_core::registry::Registry;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct Plain;
//! impl Greeter for Plain {
//!     fn greet(&self) -> String {
//!         "hello".into()
//!     }
//! }
//!
//! let mut registry: Registry<dyn Greeter, ()> = Registry::new("greeter");
//! registry.register("plain", |_: &()| Ok(Arc::new(Plain) as Arc<dyn Greeter>));
//!
//! let greeter = registry.build("plain", &()).unwrap();
//! assert_eq!(greeter.greet(), "hello");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

type Factory<T, A> = Arc<dyn Fn(&A) -> Result<Arc<T>> + Send + Sync>;

/// Map from provider identifier to a factory building `T` from arguments `A`.
pub struct Registry<T: ?Sized, A> {
    role: &'static str,
    factories: BTreeMap<String, Factory<T, A>>,
}

impl<T: ?Sized, A> Registry<T, A> {
    /// Creates an empty registry. `role` names what the registry builds and
    /// appears in lookup errors.
    #[must_use]
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            factories: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) the factory for `provider`.
    pub fn register<F>(&mut self, provider: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&A) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        self.factories.insert(provider.into(), Arc::new(factory));
        self
    }

    /// Returns true when a factory is registered for `provider`.
    #[must_use]
    pub fn contains(&self, provider: &str) -> bool {
        self.factories.contains_key(provider)
    }

    /// Returns the registered provider identifiers, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds an instance for `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no factory is registered for
    /// `provider`, or the factory's own error.
    pub fn build(&self, provider: &str, args: &A) -> Result<Arc<T>> {
        let factory = self.factories.get(provider).ok_or_else(|| {
            Error::InvalidInput(format!(
                "no {} registered for provider '{provider}' (known: {})",
                self.role,
                self.providers().join(", ")
            ))
        })?;
        factory(args)
    }
}

impl<T: ?Sized, A> fmt::Debug for Registry<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("role", &self.role)
            .field("providers", &self.providers())
            .finish()
    }
}
