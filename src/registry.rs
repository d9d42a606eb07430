//! Path-keyed registry of virtual port instances.
//!
//! Keeps registration order, which is also the order inbound packets are
//! fanned out in. A path maps to at most one instance.

use crate::port::VirtualPortInstance;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct PortRegistry {
    entries: Mutex<Vec<Arc<VirtualPortInstance>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<VirtualPortInstance>> {
        self.entries
            .lock()
            .iter()
            .find(|instance| instance.path() == path)
            .cloned()
    }

    /// Return the instance for `path`, building it with `create` if absent.
    ///
    /// The lookup and the insert happen under one lock, so concurrent callers
    /// with the same path all get the same instance and `create` runs once.
    /// The boolean is true when `create` ran.
    pub fn get_or_try_insert<E>(
        &self,
        path: &str,
        create: impl FnOnce() -> Result<VirtualPortInstance, E>,
    ) -> Result<(Arc<VirtualPortInstance>, bool), E> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter().find(|instance| instance.path() == path) {
            return Ok((Arc::clone(existing), false));
        }
        let instance = Arc::new(create()?);
        entries.push(Arc::clone(&instance));
        Ok((instance, true))
    }

    pub fn remove(&self, path: &str) -> Option<Arc<VirtualPortInstance>> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|instance| instance.path() == path)?;
        Some(entries.remove(index))
    }

    /// Snapshot of all instances in registration order.
    pub fn snapshot(&self) -> Vec<Arc<VirtualPortInstance>> {
        self.entries.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|instance| instance.path().to_string())
            .collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockBinding;
    use std::convert::Infallible;

    fn make(path: &str) -> Result<VirtualPortInstance, Infallible> {
        Ok(VirtualPortInstance::new(path, Arc::new(MockBinding::new())))
    }

    #[test]
    fn test_insert_once_per_path() {
        let registry = PortRegistry::new();
        let (first, created) = registry
            .get_or_try_insert("/dev/ttyUSB0", || make("/dev/ttyUSB0"))
            .unwrap();
        assert!(created);

        let (second, created) = registry
            .get_or_try_insert("/dev/ttyUSB0", || -> Result<_, Infallible> {
                panic!("must not build a second instance")
            })
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_create_registers_nothing() {
        let registry = PortRegistry::new();
        let result = registry.get_or_try_insert("/dev/ttyUSB0", || Err::<VirtualPortInstance, _>("boom"));
        assert_eq!(result.unwrap_err(), "boom");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_order_is_kept() {
        let registry = PortRegistry::new();
        for path in ["/dev/ttyUSB2", "/dev/ttyUSB0", "/dev/ttyUSB1"] {
            registry.get_or_try_insert(path, || make(path)).unwrap();
        }
        assert_eq!(
            registry.paths(),
            vec!["/dev/ttyUSB2", "/dev/ttyUSB0", "/dev/ttyUSB1"]
        );
    }

    #[test]
    fn test_remove() {
        let registry = PortRegistry::new();
        registry.get_or_try_insert("/dev/ttyUSB0", || make("/dev/ttyUSB0")).unwrap();
        registry.get_or_try_insert("/dev/ttyUSB1", || make("/dev/ttyUSB1")).unwrap();

        let removed = registry.remove("/dev/ttyUSB0").unwrap();
        assert_eq!(removed.path(), "/dev/ttyUSB0");
        assert!(!registry.contains("/dev/ttyUSB0"));
        assert!(registry.remove("/dev/ttyUSB0").is_none());
        assert_eq!(registry.paths(), vec!["/dev/ttyUSB1"]);
    }

    #[test]
    fn test_concurrent_same_path() {
        let registry = Arc::new(PortRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .get_or_try_insert("/dev/ttyACM0", || make("/dev/ttyACM0"))
                        .unwrap()
                        .0
                })
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }
}
