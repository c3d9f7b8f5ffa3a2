//! Typed, thread-safe property bag for execution contexts.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;

/// A typed key into a [`ContextProperties`] bag.
///
/// The key carries its value type as a phantom parameter, so retrieval is
/// type-witnessed: a key declared for one type can never observe a value of
/// another.
pub struct PropertyKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> PropertyKey<T> {
    /// Creates a new key with a unique name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    /// Returns the key name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for PropertyKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PropertyKey<T> {}

impl<T> std::fmt::Debug for PropertyKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyKey").field("name", &self.name).finish()
    }
}

/// A thread-safe bag mapping typed keys to values of the key's declared type.
///
/// Setting an existing key replaces its value; keys are unique within the bag.
#[derive(Default)]
pub struct ContextProperties {
    values: RwLock<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

impl ContextProperties {
    /// Creates a new empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a value by key.
    #[must_use]
    pub fn get<T>(&self, key: &PropertyKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.values
            .read()
            .get(key.name)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Sets a value by key, replacing any previous value.
    pub fn set<T>(&self, key: &PropertyKey<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.values.write().insert(key.name, Box::new(value));
    }

    /// Checks if a key has a value.
    #[must_use]
    pub fn contains<T>(&self, key: &PropertyKey<T>) -> bool {
        self.values.read().contains_key(key.name)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

impl std::fmt::Debug for ContextProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextProperties")
            .field("len", &self.len())
            .finish()
    }
}
