use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::events::{EventBus, Subscription};
use crate::frame::{
    DeviceCapability, DeviceId, ModuleCapability, ModuleId, ProducerCapability, VisualizationKind,
};
use crate::registry::ModuleRegistry;
use crate::rules::{RoutingRule, RuleContext, RuleEngine};
use crate::{LightdeskError, Result};

const DIMENSION_EXACT_SCORE: f32 = 50.0;
const DIMENSION_EITHER_SCORE: f32 = 40.0;
const PRIORITY_SCALE: f32 = 30.0;
const SUPPORTED_KIND_BONUS: f32 = 20.0;
/// Multiplicative preference for the active module. A preference, not a hard
/// override: a sufficiently better-scoring module still wins.
const ACTIVE_MODULE_BOOST: f32 = 1.2;

/// Seam to the external device registry. The matrix reads the enabled device
/// list through this trait and never mutates device state.
pub trait DeviceProvider: Send + Sync {
    fn enabled_devices(&self) -> Vec<DeviceCapability>;
}

/// Fixed device list, filtered to enabled devices. Covers tools and tests;
/// a live deployment implements [`DeviceProvider`] over the real registry.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceProvider {
    devices: Vec<DeviceCapability>,
}

impl StaticDeviceProvider {
    pub fn new(devices: Vec<DeviceCapability>) -> Self {
        Self { devices }
    }
}

impl DeviceProvider for StaticDeviceProvider {
    fn enabled_devices(&self) -> Vec<DeviceCapability> {
        self.devices
            .iter()
            .filter(|device| device.enabled)
            .cloned()
            .collect()
    }
}

/// The module exclusively driving a device's base visualization, with the
/// score that won it the slot (after any active-module boost).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryAssignment {
    pub module_id: ModuleId,
    pub producer: String,
    pub kind: VisualizationKind,
    pub score: f32,
}

/// A module composited on top of the primary rather than competing for
/// exclusive control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayAssignment {
    pub module_id: ModuleId,
    pub producer: String,
    pub kind: VisualizationKind,
}

/// Routing output for one device: exactly one primary plus any number of
/// overlays. Recomputed wholesale on every trigger, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub device_id: DeviceId,
    pub primary: PrimaryAssignment,
    pub overlays: Vec<OverlayAssignment>,
}

/// Computes the best-fit assignment of modules to devices from the registered
/// capabilities and the enabled device list, applies the rule engine, and
/// publishes the result to subscribers.
pub struct RoutingMatrix {
    registry: Arc<ModuleRegistry>,
    devices: Arc<dyn DeviceProvider>,
    inner: Mutex<MatrixInner>,
    events: Mutex<EventBus<Vec<DeviceAssignment>>>,
}

impl std::fmt::Debug for RoutingMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingMatrix")
            .field("registry", &self.registry)
            .field("inner", &self.inner)
            .finish()
    }
}

#[derive(Debug)]
struct MatrixInner {
    active_module: Option<ModuleId>,
    assignments: Vec<DeviceAssignment>,
    rules: RuleEngine,
}

impl RoutingMatrix {
    pub fn new(registry: Arc<ModuleRegistry>, devices: Arc<dyn DeviceProvider>) -> Self {
        Self {
            registry,
            devices,
            inner: Mutex::new(MatrixInner {
                active_module: None,
                assignments: Vec::new(),
                rules: RuleEngine::new(),
            }),
            events: Mutex::new(EventBus::new()),
        }
    }

    /// Updates the user-facing module hint. A no-op change short-circuits;
    /// otherwise routing is recomputed immediately.
    pub fn set_active_module(&self, module_id: Option<ModuleId>) -> Result<()> {
        {
            let mut inner = self.lock()?;
            if inner.active_module == module_id {
                return Ok(());
            }
            inner.active_module = module_id;
        }
        self.recalculate("active-module-changed")
    }

    pub fn active_module(&self) -> Result<Option<ModuleId>> {
        Ok(self.lock()?.active_module.clone())
    }

    /// Recomputes the full assignment set and publishes it. The publish is
    /// unconditional: subscribers receive every recomputation even when the
    /// result is unchanged, since downstream consumers key off the events.
    /// The matrix's own state lock is released before the publish, so
    /// subscribers may read the matrix (or the registry) from the callback.
    pub fn recalculate(&self, reason: &str) -> Result<()> {
        let modules = self.registry.all_capabilities()?;
        let devices = self.devices.enabled_devices();

        let mut inner = self.lock()?;
        let assignments = if modules.is_empty() || devices.is_empty() {
            tracing::warn!(reason, "no viable routing, publishing empty assignment set");
            Vec::new()
        } else {
            let computed =
                compute_assignments(&modules, &devices, inner.active_module.as_deref());
            let context = RuleContext {
                active_module: inner.active_module.as_deref(),
                modules: &modules,
                devices: &devices,
            };
            inner.rules.apply(&context, computed)
        };

        tracing::debug!(reason, assigned_devices = assignments.len(), "routing recomputed");
        inner.assignments = assignments.clone();
        drop(inner);

        self.lock_events()?.emit(&assignments);
        Ok(())
    }

    pub fn current_assignments(&self) -> Result<Vec<DeviceAssignment>> {
        Ok(self.lock()?.assignments.clone())
    }

    /// Registers a callback for published assignment sets. Callbacks run
    /// synchronously during the publish with the state lock released, so
    /// they may read the matrix; they must not subscribe, unsubscribe or
    /// trigger a recomputation from inside the callback.
    pub fn on_routing_change(
        &self,
        callback: impl Fn(&Vec<DeviceAssignment>) + Send + 'static,
    ) -> Result<Subscription> {
        Ok(self.lock_events()?.subscribe(callback))
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        self.lock_events()?.unsubscribe(subscription);
        Ok(())
    }

    /// Adds a routing rule. Takes effect on the next recomputation.
    pub fn register_rule(&self, rule: Box<dyn RoutingRule>) -> Result<()> {
        self.lock()?.rules.register(rule);
        Ok(())
    }

    pub fn unregister_rule(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.rules.unregister(name))
    }

    fn lock(&self) -> Result<MutexGuard<'_, MatrixInner>> {
        self.inner
            .lock()
            .map_err(|_| LightdeskError::msg("routing matrix has been poisoned"))
    }

    fn lock_events(&self) -> Result<MutexGuard<'_, EventBus<Vec<DeviceAssignment>>>> {
        self.events
            .lock()
            .map_err(|_| LightdeskError::msg("routing matrix listeners have been poisoned"))
    }
}

/// Scores how well a producer fits a device. A dimensionality mismatch
/// disqualifies outright; otherwise the score combines the dimension match
/// (40/50), a linear priority contribution (0-30) and a bonus (20) when the
/// device lists the producer's visualization type or the producer emits the
/// generic fallback type.
pub fn score_producer(device: &DeviceCapability, producer: &ProducerCapability) -> f32 {
    use crate::frame::DimensionPreference;

    if !producer.dimension.matches(device.dimension) {
        return 0.0;
    }

    let dimension_score = if producer.dimension == DimensionPreference::Either {
        DIMENSION_EITHER_SCORE
    } else {
        DIMENSION_EXACT_SCORE
    };

    // Priorities are declared 0..=100; clamp so an out-of-range declaration
    // cannot exceed the 0-30 band.
    let priority_score = f32::from(producer.priority.min(100)) / 100.0 * PRIORITY_SCALE;

    let supported = device.supported_kinds.contains(&producer.kind)
        || producer.kind == VisualizationKind::GenericColorArray;
    let support_bonus = if supported { SUPPORTED_KIND_BONUS } else { 0.0 };

    dimension_score + priority_score + support_bonus
}

/// The scoring pass: one primary per device (highest boosted score, ties to
/// the lexicographically first module via the registry's ordered iteration
/// and strict comparison), then every overlay-compatible producer from the
/// other modules attached without further competition.
fn compute_assignments(
    modules: &[ModuleCapability],
    devices: &[DeviceCapability],
    active_module: Option<&str>,
) -> Vec<DeviceAssignment> {
    let mut assignments = Vec::new();

    for device in devices {
        let mut best: Option<PrimaryAssignment> = None;

        for module in modules {
            let boost = if active_module == Some(module.module_id.as_str()) {
                ACTIVE_MODULE_BOOST
            } else {
                1.0
            };

            for producer in &module.producers {
                let raw = score_producer(device, producer);
                if raw <= 0.0 {
                    continue;
                }
                let score = raw * boost;
                if best.as_ref().map_or(true, |current| score > current.score) {
                    best = Some(PrimaryAssignment {
                        module_id: module.module_id.clone(),
                        producer: producer.name.clone(),
                        kind: producer.kind,
                        score,
                    });
                }
            }
        }

        let Some(primary) = best else {
            tracing::debug!(device = %device.id, "no compatible module for device");
            continue;
        };

        let overlays = modules
            .iter()
            .filter(|module| module.module_id != primary.module_id)
            .flat_map(|module| {
                module
                    .producers
                    .iter()
                    .filter(|producer| {
                        producer.overlay_compatible
                            && producer.dimension.matches(device.dimension)
                    })
                    .map(move |producer| OverlayAssignment {
                        module_id: module.module_id.clone(),
                        producer: producer.name.clone(),
                        kind: producer.kind,
                    })
            })
            .collect();

        assignments.push(DeviceAssignment {
            device_id: device.id.clone(),
            primary,
            overlays,
        });
    }

    assignments
}
