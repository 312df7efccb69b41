use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lightdesk_core::{
    CompositorEvent, DeviceCapability, DeviceDimension, DimensionPreference, GridLayout,
    GridOrientation, ModuleCapability, ModuleRegistry, ProducerCapability, RouterConfig,
    RoutingMatrix, StaticDeviceProvider, VisualRouter, VisualizationKind, VisualizationMode,
};
use tracing_subscriber::EnvFilter;

fn main() -> lightdesk_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo => run_demo(),
        Commands::Route { devices, modules } => run_route(&devices, &modules),
    }
}

/// Wires a router against one 6x25 grid and two synthetic modules, then
/// pushes a few frames through the routed path so the scoring, overlay
/// attachment and rate-limited sends are visible in the logs.
fn run_demo() -> lightdesk_core::Result<()> {
    tracing::info!("starting routing demo");

    let device = DeviceCapability {
        id: "grid-6x25".to_string(),
        dimension: DeviceDimension::TwoD,
        pixel_count: 150,
        grid: Some(GridLayout {
            width: 25,
            height: 6,
            serpentine: true,
            orientation: GridOrientation::Horizontal,
        }),
        supported_kinds: vec![VisualizationKind::StepSequencerGrid],
        enabled: true,
        brightness: 200,
        priority: 50,
    };

    let router = VisualRouter::new(
        &RouterConfig::default(),
        Arc::new(StaticDeviceProvider::new(vec![device])),
    );

    router.matrix().on_routing_change(|assignments| {
        for assignment in assignments {
            tracing::info!(
                device = %assignment.device_id,
                primary = %assignment.primary.module_id,
                score = assignment.primary.score,
                overlays = assignment.overlays.len(),
                "routing updated"
            );
        }
    })?;
    router.compositor().subscribe(|event| match event {
        CompositorEvent::CompositedFrame { device_id, pixels } => {
            tracing::info!(device = %device_id, pixels = pixels.len() / 3, "frame sent");
        }
        CompositorEvent::IncompatibilityDetected { device_id, reason, .. } => {
            tracing::info!(device = %device_id, reason = %reason, "toggle fallback engaged");
        }
        _ => {}
    })?;

    router.register_module(ModuleCapability {
        module_id: "step-seq".to_string(),
        producers: vec![ProducerCapability {
            name: "grid-steps".to_string(),
            kind: VisualizationKind::StepSequencerGrid,
            dimension: DimensionPreference::TwoD,
            overlay_compatible: false,
            priority: 80,
        }],
    })?;
    router.register_module(ModuleCapability {
        module_id: "color-wash".to_string(),
        producers: vec![ProducerCapability {
            name: "wash".to_string(),
            kind: VisualizationKind::GenericColorArray,
            dimension: DimensionPreference::Either,
            overlay_compatible: true,
            priority: 50,
        }],
    })?;
    router.set_active_module(Some("step-seq".to_string()))?;

    let steps = vec![64u8; 150 * 3];
    let wash = vec![16u8; 150 * 3];
    router.submit_routed("step-seq", 1, &steps, VisualizationMode::StepSequencerGrid)?;
    router.submit_routed("color-wash", 2, &wash, VisualizationMode::GenericColorArray)?;

    Ok(())
}

/// Computes assignments once from capability fixtures on disk and prints the
/// result as JSON.
fn run_route(devices: &PathBuf, modules: &PathBuf) -> lightdesk_core::Result<()> {
    let devices: Vec<DeviceCapability> =
        serde_json::from_str(&std::fs::read_to_string(devices)?)
            .map_err(lightdesk_core::LightdeskError::from)?;
    let modules: Vec<ModuleCapability> =
        serde_json::from_str(&std::fs::read_to_string(modules)?)
            .map_err(lightdesk_core::LightdeskError::from)?;

    let registry = Arc::new(ModuleRegistry::new());
    for module in modules {
        registry.register_module(module)?;
    }
    let matrix = RoutingMatrix::new(registry, Arc::new(StaticDeviceProvider::new(devices)));
    matrix.recalculate("route-command")?;

    let assignments = matrix.current_assignments()?;
    let json = serde_json::to_string_pretty(&assignments)
        .map_err(lightdesk_core::LightdeskError::from)?;
    println!("{json}");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "LED visualization router", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a self-contained routing and compositing demo.
    Demo,
    /// Compute routing assignments from capability fixture files.
    Route {
        /// Path to a JSON array of device capabilities.
        #[arg(long)]
        devices: PathBuf,
        /// Path to a JSON array of module capabilities.
        #[arg(long)]
        modules: PathBuf,
    },
}
