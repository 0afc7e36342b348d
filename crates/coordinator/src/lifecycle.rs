use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tcc_repository::{EventPublisher, TransactionStore};
use tracing::{error, info, warn};

use crate::error::LifecycleError;
use crate::recovery::RecoveryScheduler;

// ═══════════════════════════════════════════════════════════════════════════
// COMPONENT REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

/// Process-wide lookup of started components, one instance per type.
#[derive(Default)]
pub struct Registry {
    components: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(&self, component: Arc<T>) -> Result<(), LifecycleError> {
        let mut components = self.components.write();
        if components.contains_key(&TypeId::of::<T>()) {
            return Err(LifecycleError::AlreadyRegistered(type_name::<T>()));
        }
        components.insert(TypeId::of::<T>(), component);
        Ok(())
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let component = self.components.read().get(&TypeId::of::<T>())?.clone();
        component.downcast::<T>().ok()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.components.read().contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SHUTDOWN
// ═══════════════════════════════════════════════════════════════════════════

/// A component that holds resources needing orderly release
#[async_trait]
pub trait Closeable: Send + Sync {
    fn name(&self) -> &str;

    async fn close(&self) -> Result<()>;
}

/// Closes registered components in registration order.
///
/// A failing or hanging component is logged and skipped; the rest are still
/// closed.
pub struct ShutdownHook {
    components: Mutex<Vec<Arc<dyn Closeable>>>,
    per_component_timeout: Duration,
}

impl ShutdownHook {
    pub fn new(per_component_timeout: Duration) -> Self {
        Self {
            components: Mutex::new(Vec::new()),
            per_component_timeout,
        }
    }

    pub fn register(&self, component: Arc<dyn Closeable>) {
        self.components.lock().push(component);
    }

    pub fn len(&self) -> usize {
        self.components.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.lock().is_empty()
    }

    /// Close everything registered so far. Returns the names of components
    /// that failed or timed out. Calling it again is a no-op.
    pub async fn close_all(&self) -> Vec<String> {
        let components = std::mem::take(&mut *self.components.lock());
        let mut failed = Vec::new();

        for component in components {
            let name = component.name().to_string();
            match tokio::time::timeout(self.per_component_timeout, component.close()).await {
                Ok(Ok(())) => info!(component = %name, "Component closed"),
                Ok(Err(e)) => {
                    error!(component = %name, error = %e, "Component failed to close");
                    failed.push(name);
                }
                Err(_) => {
                    error!(
                        component = %name,
                        timeout_ms = self.per_component_timeout.as_millis() as u64,
                        "Component close timed out"
                    );
                    failed.push(name);
                }
            }
        }

        failed
    }
}

#[async_trait]
impl Closeable for RecoveryScheduler {
    fn name(&self) -> &str {
        "recovery-scheduler"
    }

    async fn close(&self) -> Result<()> {
        let grace = self.config().compensation_timeout();
        if !self.stop(grace).await {
            warn!("Recovery scan aborted mid-transaction, it will be picked up again");
        }
        Ok(())
    }
}

/// Drains the event pipeline on close
pub struct PipelineCloser {
    publisher: Arc<EventPublisher>,
    drain_timeout: Duration,
}

impl PipelineCloser {
    pub fn new(publisher: Arc<EventPublisher>, drain_timeout: Duration) -> Self {
        Self {
            publisher,
            drain_timeout,
        }
    }
}

#[async_trait]
impl Closeable for PipelineCloser {
    fn name(&self) -> &str {
        "event-pipeline"
    }

    async fn close(&self) -> Result<()> {
        let report = self.publisher.shutdown(self.drain_timeout).await;
        if report.abandoned > 0 {
            return Err(anyhow!(
                "{} events abandoned after {:?}",
                report.abandoned,
                self.drain_timeout
            ));
        }
        Ok(())
    }
}

/// Closes the storage backend
pub struct StoreCloser {
    store: Arc<dyn TransactionStore>,
}

impl StoreCloser {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Closeable for StoreCloser {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn close(&self) -> Result<()> {
        self.store.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
        hang: bool,
    }

    impl Probe {
        fn new(name: &'static str, order: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                order: order.clone(),
                fail: false,
                hang: false,
            }
        }
    }

    #[async_trait]
    impl Closeable for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn close(&self) -> Result<()> {
            self.order.lock().push(self.name);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail {
                return Err(anyhow!("{} broke", self.name));
            }
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup_by_type() {
        struct Counter(AtomicUsize);

        let registry = Registry::new();
        registry.register(Arc::new(Counter(AtomicUsize::new(7)))).unwrap();
        registry.register(Arc::new(String::from("name"))).unwrap();

        let counter = registry.get::<Counter>().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 7);
        assert_eq!(registry.get::<String>().unwrap().as_str(), "name");
        assert!(registry.get::<u64>().is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = Registry::new();
        registry.register(Arc::new(1u32)).unwrap();

        let err = registry.register(Arc::new(2u32)).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyRegistered(name) if name == "u32"));
        assert_eq!(*registry.get::<u32>().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_all_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let hook = ShutdownHook::new(Duration::from_secs(1));
        for name in ["scheduler", "pipeline", "store"] {
            hook.register(Arc::new(Probe::new(name, &order)));
        }

        assert!(hook.close_all().await.is_empty());
        assert_eq!(*order.lock(), vec!["scheduler", "pipeline", "store"]);

        // Second call has nothing left to close
        assert!(hook.close_all().await.is_empty());
        assert_eq!(order.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_shutdown() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let hook = ShutdownHook::new(Duration::from_millis(100));
        hook.register(Arc::new(Probe {
            fail: true,
            ..Probe::new("broken", &order)
        }));
        hook.register(Arc::new(Probe {
            hang: true,
            ..Probe::new("stuck", &order)
        }));
        hook.register(Arc::new(Probe::new("store", &order)));

        let failed = hook.close_all().await;
        assert_eq!(failed, vec!["broken".to_string(), "stuck".to_string()]);
        assert_eq!(*order.lock(), vec!["broken", "stuck", "store"]);
    }
}
