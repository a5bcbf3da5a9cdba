//! Provider Registry
//!
//! The table of providers the dispatcher can route to, in registration order.
//!
//! Entries are immutable once published. Reconfiguration builds a replacement
//! entry and swaps it in under the write lock, so readers always see either
//! the old or the new descriptor, never a mix. Readers clone the `Arc` and
//! release the lock before doing any async work.
//!
//! The admission gate and load counters are shared by every version of an
//! entry. A limit change resizes the gate in place rather than replacing it.

use std::sync::Arc;

use parking_lot::RwLock;

use super::config::ProviderConfig;
use super::pool::{LoadSnapshot, ProviderGate, ProviderLoad};
use crate::error::RegistryError;
use crate::provider::ProviderClient;

/// One published provider: descriptor, gate, load and client
pub(crate) struct ProviderEntry {
    pub(crate) config: ProviderConfig,
    pub(crate) gate: Arc<ProviderGate>,
    pub(crate) load: Arc<ProviderLoad>,
    pub(crate) client: Arc<dyn ProviderClient>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .field("load", &self.load)
            .finish_non_exhaustive()
    }
}

impl ProviderEntry {
    fn new(config: ProviderConfig, client: Arc<dyn ProviderClient>) -> Self {
        Self {
            gate: Arc::new(ProviderGate::new(config.concurrency_limit)),
            load: Arc::new(ProviderLoad::default()),
            config,
            client,
        }
    }

    /// Copy of this entry with a new descriptor, resizing the shared gate
    fn reconfigured(&self, config: ProviderConfig) -> Self {
        if config.concurrency_limit != self.config.concurrency_limit {
            self.gate
                .resize(self.config.concurrency_limit, config.concurrency_limit);
        }
        Self {
            config,
            gate: Arc::clone(&self.gate),
            load: Arc::clone(&self.load),
            client: Arc::clone(&self.client),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether a slot is free right now
    pub(crate) fn has_capacity(&self) -> bool {
        self.gate.available() > 0
    }
}

fn validate(config: &ProviderConfig) -> Result<(), RegistryError> {
    if config.concurrency_limit == 0 {
        return Err(RegistryError::InvalidLimit {
            name: config.name.clone(),
            limit: config.concurrency_limit,
        });
    }
    if !config.speed_weight.is_finite() || config.speed_weight <= 0.0 {
        return Err(RegistryError::InvalidWeight {
            name: config.name.clone(),
            weight: config.speed_weight,
        });
    }
    Ok(())
}

/// Registry of providers available for dispatch
#[derive(Default)]
pub struct ProviderRegistry {
    entries: RwLock<Vec<Arc<ProviderEntry>>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider with its client
    pub fn register(
        &self,
        config: ProviderConfig,
        client: Arc<dyn ProviderClient>,
    ) -> Result<(), RegistryError> {
        validate(&config)?;

        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.name() == config.name) {
            return Err(RegistryError::DuplicateProvider(config.name));
        }

        tracing::debug!(
            provider = %config.name,
            kind = %config.kind,
            limit = config.concurrency_limit,
            weight = config.speed_weight,
            client = client.name(),
            "Registered provider"
        );
        entries.push(Arc::new(ProviderEntry::new(config, client)));
        Ok(())
    }

    /// Descriptor for a provider (enabled or not)
    pub fn get(&self, name: &str) -> Result<ProviderConfig, RegistryError> {
        self.entry(name)
            .map(|e| e.config.clone())
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_string()))
    }

    /// Enabled providers in registration order
    pub fn all(&self) -> Vec<ProviderConfig> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.config.enabled)
            .map(|e| e.config.clone())
            .collect()
    }

    /// Every provider, including disabled ones
    pub fn all_including_disabled(&self) -> Vec<ProviderConfig> {
        self.entries
            .read()
            .iter()
            .map(|e| e.config.clone())
            .collect()
    }

    /// Whether `name` is registered and enabled
    pub fn is_routable(&self, name: &str) -> bool {
        self.entry(name).is_some_and(|e| e.config.enabled)
    }

    /// Whether any provider is enabled
    pub fn has_enabled(&self) -> bool {
        self.entries.read().iter().any(|e| e.config.enabled)
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Replace a provider's concurrency limit
    ///
    /// Calls already admitted keep their slots. Raising the limit frees the
    /// extra permits at once; lowering it retires permits as running calls
    /// finish, so no admission is granted until in-flight calls drop below
    /// the new limit. Tasks already waiting stay queued on the same gate.
    pub fn update_limit(&self, name: &str, new_limit: usize) -> Result<(), RegistryError> {
        let entry = self.swap(name, |config| {
            let mut next = config.clone();
            next.concurrency_limit = new_limit;
            next
        })?;
        tracing::info!(
            provider = %name,
            limit = new_limit,
            in_flight = entry.load.in_flight(),
            draining = entry.gate.deficit(),
            "Updated concurrency limit"
        );
        Ok(())
    }

    /// Enable or disable a provider
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        self.swap(name, |config| {
            let mut next = config.clone();
            next.enabled = enabled;
            next
        })?;
        tracing::info!(provider = %name, enabled, "Changed provider availability");
        Ok(())
    }

    /// Live load for a provider
    pub fn load(&self, name: &str) -> Result<LoadSnapshot, RegistryError> {
        self.entry(name)
            .map(|e| e.load.snapshot())
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_string()))
    }

    pub(crate) fn entry(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    /// Current entries in registration order
    pub(crate) fn snapshot(&self) -> Vec<Arc<ProviderEntry>> {
        self.entries.read().clone()
    }

    /// Publish a replacement entry and return it
    fn swap(
        &self,
        name: &str,
        update: impl FnOnce(&ProviderConfig) -> ProviderConfig,
    ) -> Result<Arc<ProviderEntry>, RegistryError> {
        let mut entries = self.entries.write();
        let slot = entries
            .iter_mut()
            .find(|e| e.name() == name)
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_string()))?;

        let next = update(&slot.config);
        validate(&next)?;

        *slot = Arc::new(slot.reconfigured(next));
        Ok(Arc::clone(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SimulatedProvider;
    use std::time::Duration;

    fn client(name: &str) -> Arc<dyn ProviderClient> {
        Arc::new(SimulatedProvider::new(name, Duration::from_millis(1)))
    }

    fn registry() -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderConfig::new("a", 2, 1.0), client("a"))
            .unwrap();
        registry
            .register(ProviderConfig::new("b", 5, 2.0).disabled(), client("b"))
            .unwrap();
        registry
    }

    #[test]
    fn test_get_and_all() {
        let registry = registry();
        assert_eq!(registry.get("a").unwrap().concurrency_limit, 2);
        assert_eq!(
            registry.get("zzz"),
            Err(RegistryError::UnknownProvider("zzz".to_string()))
        );

        let enabled: Vec<_> = registry.all().into_iter().map(|c| c.name).collect();
        assert_eq!(enabled, vec!["a".to_string()]);
        assert_eq!(registry.all_including_disabled().len(), 2);
        assert!(registry.is_routable("a"));
        assert!(!registry.is_routable("b"));
    }

    #[test]
    fn test_register_rejects_invalid() {
        let registry = registry();
        assert_eq!(
            registry.register(ProviderConfig::new("a", 1, 1.0), client("a")),
            Err(RegistryError::DuplicateProvider("a".to_string()))
        );
        assert!(matches!(
            registry.register(ProviderConfig::new("c", 0, 1.0), client("c")),
            Err(RegistryError::InvalidLimit { .. })
        ));
        assert!(matches!(
            registry.register(ProviderConfig::new("d", 1, f64::NAN), client("d")),
            Err(RegistryError::InvalidWeight { .. })
        ));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_update_limit_counts_admitted_calls() {
        let registry = registry();
        let before = registry.entry("a").unwrap();
        let slot = before
            .load
            .occupy(&before.gate, before.gate.acquire().await.unwrap());

        registry.update_limit("a", 4).unwrap();

        let after = registry.entry("a").unwrap();
        assert_eq!(after.config.concurrency_limit, 4);
        assert!(Arc::ptr_eq(&before.gate, &after.gate));
        // The running call still occupies one of the four
        assert_eq!(after.gate.available(), 3);
        assert_eq!(registry.load("a").unwrap().in_flight, 1);

        drop(slot);
        assert_eq!(registry.load("a").unwrap().in_flight, 0);
        assert_eq!(after.gate.available(), 4);
    }

    #[tokio::test]
    async fn test_lowered_limit_blocks_until_calls_drain() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderConfig::new("a", 3, 1.0), client("a"))
            .unwrap();
        let entry = registry.entry("a").unwrap();
        let mut running = Vec::new();
        for _ in 0..3 {
            running.push(entry.load.occupy(&entry.gate, entry.gate.acquire().await.unwrap()));
        }

        registry.update_limit("a", 1).unwrap();
        let entry = registry.entry("a").unwrap();
        assert!(!entry.has_capacity());

        drop(running.pop());
        drop(running.pop());
        assert!(!entry.has_capacity());
        drop(running.pop());
        assert_eq!(entry.gate.available(), 1);

        let only = entry.load.occupy(&entry.gate, entry.gate.acquire().await.unwrap());
        assert!(!entry.has_capacity());
        drop(only);
        assert_eq!(registry.load("a").unwrap().peak_in_flight, 3);
    }

    #[test]
    fn test_update_limit_errors() {
        let registry = registry();
        assert_eq!(
            registry.update_limit("missing", 3),
            Err(RegistryError::UnknownProvider("missing".to_string()))
        );
        assert!(matches!(
            registry.update_limit("a", 0),
            Err(RegistryError::InvalidLimit { .. })
        ));
        assert_eq!(registry.get("a").unwrap().concurrency_limit, 2);
    }

    #[test]
    fn test_set_enabled_keeps_gate() {
        let registry = registry();
        let gate_before = Arc::clone(&registry.entry("b").unwrap().gate);
        registry.set_enabled("b", true).unwrap();
        assert!(registry.is_routable("b"));
        assert!(Arc::ptr_eq(&gate_before, &registry.entry("b").unwrap().gate));
        assert_eq!(gate_before.available(), 5);
    }
}
