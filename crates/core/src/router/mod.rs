use std::sync::Arc;

use crate::compositor::FrameCompositor;
use crate::config::RouterConfig;
use crate::frame::{LedFrame, ModuleCapability, ModuleId, VisualizationMode};
use crate::registry::ModuleRegistry;
use crate::routing::{DeviceProvider, RoutingMatrix};
use crate::Result;

/// Front door of the subsystem: owns the registry, the routing matrix and the
/// compositor as explicitly constructed services and keeps them in step.
///
/// Module lifecycle goes through here so that registration changes recompute
/// routing and unregistration immediately stops composition for the module.
/// Frames can be submitted device-addressed (straight to the compositor) or
/// routed, in which case the current assignments decide the target devices.
pub struct VisualRouter {
    registry: Arc<ModuleRegistry>,
    matrix: Arc<RoutingMatrix>,
    compositor: Arc<FrameCompositor>,
}

impl VisualRouter {
    pub fn new(config: &RouterConfig, devices: Arc<dyn DeviceProvider>) -> Self {
        let registry = Arc::new(ModuleRegistry::new());
        let matrix = Arc::new(RoutingMatrix::new(registry.clone(), devices));
        let compositor = Arc::new(FrameCompositor::new(&config.compositor));
        Self {
            registry,
            matrix,
            compositor,
        }
    }

    /// Registers a module's capabilities and recomputes routing.
    pub fn register_module(&self, capability: ModuleCapability) -> Result<()> {
        self.registry.register_module(capability)?;
        self.matrix.recalculate("module-registered")
    }

    /// Unregisters a module, drops its buffered frames on every device and
    /// recomputes routing. Frames already sent are not recalled.
    pub fn unregister_module(&self, module_id: &str) -> Result<()> {
        self.registry.unregister_module(module_id)?;
        self.compositor.clear_module(module_id)?;
        self.matrix.recalculate("module-unregistered")
    }

    pub fn set_active_module(&self, module_id: Option<ModuleId>) -> Result<()> {
        self.matrix.set_active_module(module_id)
    }

    /// Device-addressed submission: the frame already names its target device
    /// and goes straight into the per-device blending path.
    pub fn submit_frame(&self, frame: LedFrame) -> Result<()> {
        self.compositor.submit_frame(frame)
    }

    /// Routed submission: looks up every device where the module currently
    /// holds the primary slot or an overlay slot and submits the frame to
    /// each. With no assignment the frame is dropped with a warning.
    pub fn submit_routed(
        &self,
        module_id: &str,
        timestamp_ms: u64,
        pixels: &[u8],
        mode: VisualizationMode,
    ) -> Result<()> {
        let assignments = self.matrix.current_assignments()?;
        let targets: Vec<String> = assignments
            .iter()
            .filter(|assignment| {
                assignment.primary.module_id == module_id
                    || assignment
                        .overlays
                        .iter()
                        .any(|overlay| overlay.module_id == module_id)
            })
            .map(|assignment| assignment.device_id.clone())
            .collect();

        if targets.is_empty() {
            tracing::warn!(module = module_id, "no routed device for module, dropping frame");
            return Ok(());
        }

        for device_id in targets {
            self.compositor.submit_frame(LedFrame {
                producer_id: module_id.to_string(),
                device_id,
                timestamp_ms,
                pixels: pixels.to_vec(),
                mode,
            })?;
        }
        Ok(())
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn matrix(&self) -> &Arc<RoutingMatrix> {
        &self.matrix
    }

    pub fn compositor(&self) -> &Arc<FrameCompositor> {
        &self.compositor
    }
}

impl std::fmt::Debug for VisualRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualRouter").finish()
    }
}
