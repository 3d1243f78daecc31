use std::sync::Arc;

/// Insertion-ordered association list of keyed interceptors.
///
/// Re-registering an existing key replaces the interceptor in place, so the
/// chain order is that of first registration.
pub struct InterceptorRegistry<I: ?Sized> {
    entries: Vec<(String, Arc<I>)>,
}

impl<I: ?Sized> Default for InterceptorRegistry<I> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<I: ?Sized> InterceptorRegistry<I> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `interceptor` under `key`, returning the one it replaced.
    pub fn insert(&mut self, key: impl Into<String>, interceptor: Arc<I>) -> Option<Arc<I>> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, interceptor)),
            None => {
                self.entries.push((key, interceptor));
                None
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<I>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, interceptor)| interceptor)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<I>> {
        self.entries.iter().map(|(_, interceptor)| interceptor)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Key for an interceptor registered without one: type name plus instance address.
///
/// Registering the same `Arc` twice yields the same key and therefore
/// overwrites instead of duplicating.
pub fn identity_key<I: ?Sized>(name: &str, interceptor: &Arc<I>) -> String {
    format!("{}:{:p}", name, Arc::as_ptr(interceptor).cast::<()>())
}
