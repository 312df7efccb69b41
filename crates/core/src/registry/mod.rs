use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::events::{EventBus, Subscription};
use crate::frame::{ModuleCapability, ModuleId};
use crate::{LightdeskError, Result};

/// Notification fired when the set of registered modules changes. Consumers
/// that need to react to module lifecycle (such as triggering a routing
/// recomputation) subscribe to these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { module_id: ModuleId },
    Unregistered { module_id: ModuleId },
}

/// Tracks which modules are currently active and what visualizations each can
/// produce. Modules register their capability declaration on mount and remove
/// it on unmount; the registry only holds the declaration, never the module.
///
/// Capabilities are kept in a `BTreeMap` so that iteration order — and with
/// it the routing tie-break — is module-id lexicographic rather than an
/// accident of hashing.
///
/// Events are emitted after the capability map's lock is released, so
/// subscribers are free to read the registry from inside their callbacks.
#[derive(Debug)]
pub struct ModuleRegistry {
    inner: Mutex<RegistryInner>,
    events: Mutex<EventBus<RegistryEvent>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    modules: BTreeMap<ModuleId, ModuleCapability>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            events: Mutex::new(EventBus::new()),
        }
    }

    /// Registers a module's capability declaration. Re-registering an already
    /// known module id replaces the previous declaration, last write wins.
    pub fn register_module(&self, capability: ModuleCapability) -> Result<()> {
        let module_id = capability.module_id.clone();
        {
            let mut inner = self.lock()?;
            if inner.modules.insert(module_id.clone(), capability).is_some() {
                tracing::debug!(module = %module_id, "replacing existing capability declaration");
            }
        }
        self.lock_events()?
            .emit(&RegistryEvent::Registered { module_id });
        Ok(())
    }

    /// Removes a module. Unregistering an unknown id is a no-op.
    pub fn unregister_module(&self, module_id: &str) -> Result<()> {
        {
            let mut inner = self.lock()?;
            if inner.modules.remove(module_id).is_none() {
                tracing::warn!(module = module_id, "unregistering a module that is not registered");
                return Ok(());
            }
        }
        self.lock_events()?.emit(&RegistryEvent::Unregistered {
            module_id: module_id.to_string(),
        });
        Ok(())
    }

    pub fn is_registered(&self, module_id: &str) -> Result<bool> {
        Ok(self.lock()?.modules.contains_key(module_id))
    }

    pub fn capability(&self, module_id: &str) -> Result<Option<ModuleCapability>> {
        Ok(self.lock()?.modules.get(module_id).cloned())
    }

    /// Returns every registered capability in module-id order.
    pub fn all_capabilities(&self) -> Result<Vec<ModuleCapability>> {
        Ok(self.lock()?.modules.values().cloned().collect())
    }

    /// Registers a callback for registration changes. Callbacks run
    /// synchronously during emission with the capability map unlocked, so
    /// they may read the registry; they must not subscribe or unsubscribe
    /// from inside the callback.
    pub fn subscribe(
        &self,
        callback: impl Fn(&RegistryEvent) + Send + 'static,
    ) -> Result<Subscription> {
        Ok(self.lock_events()?.subscribe(callback))
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        self.lock_events()?.unsubscribe(subscription);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryInner>> {
        self.inner
            .lock()
            .map_err(|_| LightdeskError::msg("module registry has been poisoned"))
    }

    fn lock_events(&self) -> Result<MutexGuard<'_, EventBus<RegistryEvent>>> {
        self.events
            .lock()
            .map_err(|_| LightdeskError::msg("module registry listeners have been poisoned"))
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
