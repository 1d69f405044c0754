//! Service Resolver
//!
//! Type-keyed store of shared services (the plugin registry, mostly).

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

#[derive(Default)]
pub struct ServiceResolver {
    services: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide a service, replacing any previous one of the same type
    pub fn provide<T: Any + Send + Sync>(&self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    pub fn with<T: Any + Send + Sync>(self, service: Arc<T>) -> Self {
        self.provide(service);
        self
    }

    pub fn resolve<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let service = Arc::clone(self.services.get(&TypeId::of::<T>())?.value());
        service.downcast::<T>().ok()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for ServiceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceResolver")
            .field("services", &self.services.len())
            .finish()
    }
}
