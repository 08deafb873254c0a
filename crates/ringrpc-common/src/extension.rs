//! Named capability lookup.
//!
//! Every pluggable capability (serializer, compressor, load balancer,
//! registry backend) is resolved by name through an [`ExtensionLoader`].
//! Factories are registered up front; the first [`get`](ExtensionLoader::get)
//! for a name builds the instance and every later call returns the same one.
//!
//! Loaders are plain values owned by whoever needs them (a client, a server,
//! the codec table), so there is no process-wide registry.

use dashmap::DashMap;
use std::sync::Arc;

use crate::protocol::error::{Result, RingrpcError};

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

/// Resolves named implementations of one capability type `T`.
///
/// # Example
///
/// ```
/// use ringrpc_common::ExtensionLoader;
/// use std::sync::Arc;
///
/// trait Greeting: Send + Sync {
///     fn text(&self) -> &'static str;
/// }
///
/// struct Hello;
/// impl Greeting for Hello {
///     fn text(&self) -> &'static str { "hello" }
/// }
///
/// let loader: ExtensionLoader<dyn Greeting> = ExtensionLoader::new()
///     .with("hello", || Arc::new(Hello) as Arc<dyn Greeting>);
///
/// let a = loader.get("hello").unwrap();
/// let b = loader.get("hello").unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub struct ExtensionLoader<T: ?Sized> {
    factories: DashMap<String, Factory<T>>,
    instances: DashMap<String, Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionLoader<T> {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            instances: DashMap::new(),
        }
    }

    /// Registers (or replaces) the factory for `name`.
    ///
    /// A cached instance built from a previous factory is dropped so the next
    /// lookup sees the new implementation.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        let name = name.into();
        self.instances.remove(&name);
        self.factories.insert(name, Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Returns the instance registered under `name`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::Extension`] if no factory is registered for
    /// `name`.
    pub fn get(&self, name: &str) -> Result<Arc<T>> {
        if let Some(instance) = self.instances.get(name) {
            return Ok(Arc::clone(instance.value()));
        }

        let factory = self
            .factories
            .get(name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| RingrpcError::Extension(name.to_string()))?;

        let instance = self
            .instances
            .entry(name.to_string())
            .or_insert_with(|| factory())
            .value()
            .clone();

        Ok(instance)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for ExtensionLoader<T> {
    fn default() -> Self {
        Self::new()
    }
}
