//! Registry of collaborators the router dispatches to

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::addon::{Adapter, ApiHandler, Device, Notifier, Outlet};
use crate::{Error, Result};

/// Adapters, notifiers and API handlers known to one router
///
/// Owned and mutated by the router task only.
#[derive(Default)]
pub struct DispatchRegistry {
    /// Ordered so device scans are deterministic
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
    api_handlers: HashMap<String, Arc<dyn ApiHandler>>,
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("notifiers", &self.notifiers.keys().collect::<Vec<_>>())
            .field("api_handlers", &self.api_handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Everything removed from a registry at teardown
#[derive(Default)]
pub struct Drained {
    pub adapters: Vec<Arc<dyn Adapter>>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
    pub api_handlers: Vec<Arc<dyn ApiHandler>>,
}

impl DispatchRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, returning the one it replaced
    pub fn add_adapter(&mut self, adapter: Arc<dyn Adapter>) -> Option<Arc<dyn Adapter>> {
        self.adapters.insert(adapter.id().to_string(), adapter)
    }

    pub fn remove_adapter(&mut self, adapter_id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.remove(adapter_id)
    }

    /// Register a notifier, returning the one it replaced
    pub fn add_notifier(&mut self, notifier: Arc<dyn Notifier>) -> Option<Arc<dyn Notifier>> {
        self.notifiers.insert(notifier.id().to_string(), notifier)
    }

    pub fn remove_notifier(&mut self, notifier_id: &str) -> Option<Arc<dyn Notifier>> {
        self.notifiers.remove(notifier_id)
    }

    /// Register an API handler, returning the one it replaced
    pub fn add_api_handler(&mut self, handler: Arc<dyn ApiHandler>) -> Option<Arc<dyn ApiHandler>> {
        self.api_handlers
            .insert(handler.package_name().to_string(), handler)
    }

    pub fn remove_api_handler(&mut self, package_name: &str) -> Option<Arc<dyn ApiHandler>> {
        self.api_handlers.remove(package_name)
    }

    /// Get an adapter by ID
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTarget`] if no adapter has this ID
    pub fn adapter(&self, adapter_id: &str) -> Result<Arc<dyn Adapter>> {
        self.adapters
            .get(adapter_id)
            .cloned()
            .ok_or_else(|| Error::UnknownTarget(format!("adapter '{adapter_id}'")))
    }

    /// Find a device and the adapter that owns it
    ///
    /// With an adapter ID only that adapter is searched, otherwise every
    /// adapter is scanned in ID order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTarget`] if the adapter or device is unknown
    pub fn device(
        &self,
        adapter_id: Option<&str>,
        device_id: &str,
    ) -> Result<(Arc<dyn Adapter>, Arc<dyn Device>)> {
        if let Some(adapter_id) = adapter_id {
            let adapter = self.adapter(adapter_id)?;
            let device = adapter.device(device_id).ok_or_else(|| {
                Error::UnknownTarget(format!("device '{device_id}' of adapter '{adapter_id}'"))
            })?;
            return Ok((adapter, device));
        }

        self.adapters
            .values()
            .find_map(|adapter| adapter.device(device_id).map(|d| (Arc::clone(adapter), d)))
            .ok_or_else(|| Error::UnknownTarget(format!("device '{device_id}'")))
    }

    /// Get a notifier by ID
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTarget`] if no notifier has this ID
    pub fn notifier(&self, notifier_id: &str) -> Result<Arc<dyn Notifier>> {
        self.notifiers
            .get(notifier_id)
            .cloned()
            .ok_or_else(|| Error::UnknownTarget(format!("notifier '{notifier_id}'")))
    }

    /// Find an outlet of a notifier
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTarget`] if the notifier or outlet is unknown
    pub fn outlet(&self, notifier_id: &str, outlet_id: &str) -> Result<Arc<dyn Outlet>> {
        self.notifier(notifier_id)?.outlet(outlet_id).ok_or_else(|| {
            Error::UnknownTarget(format!("outlet '{outlet_id}' of notifier '{notifier_id}'"))
        })
    }

    /// Get the API handler of a package
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTarget`] if no handler serves this package
    pub fn api_handler(&self, package_name: &str) -> Result<Arc<dyn ApiHandler>> {
        self.api_handlers
            .get(package_name)
            .cloned()
            .ok_or_else(|| Error::UnknownTarget(format!("API handler '{package_name}'")))
    }

    /// Remove and return every registered collaborator
    pub fn drain(&mut self) -> Drained {
        Drained {
            adapters: std::mem::take(&mut self.adapters).into_values().collect(),
            notifiers: self.notifiers.drain().map(|(_, n)| n).collect(),
            api_handlers: self.api_handlers.drain().map(|(_, h)| h).collect(),
        }
    }

    /// Total number of registered collaborators
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len() + self.notifiers.len() + self.api_handlers.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;

    struct Lamp(&'static str);

    #[async_trait]
    impl Device for Lamp {
        fn id(&self) -> &str {
            self.0
        }

        fn as_dict(&self) -> Value {
            json!({ "id": self.0 })
        }

        fn property(&self, _name: &str) -> Option<Value> {
            None
        }

        async fn set_property(&self, name: &str, value: Value) -> Result<Value> {
            Ok(json!({ "name": name, "value": value }))
        }
    }

    struct Hub {
        id: &'static str,
        devices: Vec<&'static str>,
    }

    #[async_trait]
    impl Adapter for Hub {
        fn id(&self) -> &str {
            self.id
        }

        fn name(&self) -> &str {
            "Hub"
        }

        fn package_name(&self) -> &str {
            "hub-adapter"
        }

        fn device(&self, device_id: &str) -> Option<Arc<dyn Device>> {
            self.devices
                .iter()
                .copied()
                .find(|d| *d == device_id)
                .map(|d| Arc::new(Lamp(d)) as Arc<dyn Device>)
        }
    }

    fn registry() -> DispatchRegistry {
        let mut registry = DispatchRegistry::new();
        registry.add_adapter(Arc::new(Hub {
            id: "a1",
            devices: vec!["d1"],
        }));
        registry.add_adapter(Arc::new(Hub {
            id: "a2",
            devices: vec!["d2"],
        }));
        registry
    }

    #[test]
    fn device_lookup_with_and_without_adapter() {
        let registry = registry();

        let (adapter, device) = registry.device(Some("a1"), "d1").unwrap();
        assert_eq!(adapter.id(), "a1");
        assert_eq!(device.id(), "d1");

        let (adapter, _) = registry.device(None, "d2").unwrap();
        assert_eq!(adapter.id(), "a2");

        // Scoped lookups do not fall back to other adapters
        assert!(registry.device(Some("a1"), "d2").is_err());
    }

    #[test]
    fn unknown_targets() {
        let registry = registry();
        assert!(matches!(registry.device(None, "ghost"), Err(Error::UnknownTarget(_))));
        assert!(matches!(registry.adapter("a9"), Err(Error::UnknownTarget(_))));
        assert!(matches!(registry.outlet("n1", "o1"), Err(Error::UnknownTarget(_))));
        assert!(matches!(registry.api_handler("pkg"), Err(Error::UnknownTarget(_))));
    }

    #[test]
    fn replace_remove_and_drain() {
        let mut registry = registry();
        assert_eq!(registry.len(), 2);

        let replaced = registry.add_adapter(Arc::new(Hub {
            id: "a1",
            devices: vec![],
        }));
        assert!(replaced.is_some());
        assert!(registry.device(None, "d1").is_err());

        assert!(registry.remove_adapter("a2").is_some());
        assert!(registry.remove_adapter("a2").is_none());

        let drained = registry.drain();
        assert_eq!(drained.adapters.len(), 1);
        assert!(registry.is_empty());
    }
}
