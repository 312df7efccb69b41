//! Core library for the Lightdesk LED router.
//!
//! Lightdesk routes and blends visual output from independent musical-
//! instrument modules onto a shared pool of addressable LED devices. The
//! crate is organised around two stateful services and their pure helpers:
//! the [`FrameCompositor`] buffers the latest frame per `(device, module)`
//! pair and emits one rate-limited composite per device, while the
//! [`RoutingMatrix`] scores registered module capabilities against the
//! available devices and publishes primary/overlay assignments. The
//! [`VisualRouter`] facade wires the two together with the
//! [`ModuleRegistry`] so module lifecycle, routing and composition stay in
//! step.

pub mod blend;
pub mod compositor;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod registry;
pub mod router;
pub mod routing;
pub mod rules;

pub use blend::{
    blend_channel, blend_pixels, check_compatibility, composite_frames, BlendMode,
    Incompatibility,
};
pub use compositor::{CompositorEvent, FrameCompositor};
pub use config::{CompositorConfig, RouterConfig};
pub use error::{LightdeskError, Result};
pub use events::{EventBus, Subscription};
pub use frame::{
    DeviceCapability, DeviceDimension, DeviceId, DimensionPreference, GridLayout,
    GridOrientation, LedFrame, ModuleCapability, ModuleId, ProducerCapability,
    VisualizationKind, VisualizationMode,
};
pub use registry::{ModuleRegistry, RegistryEvent};
pub use router::VisualRouter;
pub use routing::{
    score_producer, DeviceAssignment, DeviceProvider, OverlayAssignment, PrimaryAssignment,
    RoutingMatrix, StaticDeviceProvider,
};
pub use rules::{FnRule, RoutingRule, RuleContext, RuleEngine};
