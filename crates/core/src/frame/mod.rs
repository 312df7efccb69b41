use serde::{Deserialize, Serialize};

/// Identifier of a visual module (an instrument UI producing pixel data).
pub type ModuleId = String;

/// Identifier of a physical addressable LED device.
pub type DeviceId = String;

/// Capability-level tag describing how a producer addresses pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisualizationKind {
    /// Plain colour buffer with no addressing semantics attached. Every
    /// device understands this, so it doubles as the routing fallback type.
    GenericColorArray,
    /// One pixel per musical note, anchored at a root note.
    NotePerLed,
    /// Rows of step-sequencer cells mapped onto a grid.
    StepSequencerGrid,
    /// Scrolling waveform history.
    WaveformScroll,
}

/// Frame-level visualization mode. Mirrors [`VisualizationKind`] but carries
/// the addressing scheme where one exists: two note-per-led frames can only be
/// blended when their pixel-zero note lines up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationMode {
    GenericColorArray,
    NotePerLed { root_note: u8 },
    StepSequencerGrid,
    WaveformScroll,
}

impl VisualizationMode {
    /// Projects the mode down to its capability-level tag.
    pub fn kind(&self) -> VisualizationKind {
        match self {
            Self::GenericColorArray => VisualizationKind::GenericColorArray,
            Self::NotePerLed { .. } => VisualizationKind::NotePerLed,
            Self::StepSequencerGrid => VisualizationKind::StepSequencerGrid,
            Self::WaveformScroll => VisualizationKind::WaveformScroll,
        }
    }
}

/// One snapshot of pixel data from one module, targeted at one device.
///
/// Frames are immutable values: the compositor keeps only the most recent one
/// per `(device, producer)` pair and never queues older frames.
#[derive(Debug, Clone)]
pub struct LedFrame {
    pub producer_id: ModuleId,
    pub device_id: DeviceId,
    /// Monotonic timestamp supplied by the producer, in milliseconds.
    pub timestamp_ms: u64,
    /// Flat buffer, one RGB triple per addressable pixel.
    pub pixels: Vec<u8>,
    pub mode: VisualizationMode,
}

impl LedFrame {
    /// Number of addressable pixels in the frame.
    pub fn pixel_count(&self) -> usize {
        self.pixels.len() / 3
    }

    /// A frame is well formed when the buffer is non-empty and holds whole
    /// RGB triples. Frames failing this never enter the compositor buffer.
    pub fn is_well_formed(&self) -> bool {
        !self.pixels.is_empty() && self.pixels.len() % 3 == 0
    }
}

/// Physical dimensionality of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceDimension {
    #[serde(rename = "1d")]
    OneD,
    #[serde(rename = "2d")]
    TwoD,
}

/// Dimensionality a producer prefers to render for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionPreference {
    #[serde(rename = "1d")]
    OneD,
    #[serde(rename = "2d")]
    TwoD,
    #[serde(rename = "either")]
    Either,
}

impl DimensionPreference {
    /// Whether a producer with this preference can drive the given device.
    pub fn matches(self, device: DeviceDimension) -> bool {
        match self {
            Self::OneD => device == DeviceDimension::OneD,
            Self::TwoD => device == DeviceDimension::TwoD,
            Self::Either => true,
        }
    }
}

/// One visualization a module can produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerCapability {
    pub name: String,
    pub kind: VisualizationKind,
    pub dimension: DimensionPreference,
    /// Overlay-compatible producers can be composited on top of another
    /// module's primary output instead of claiming a device exclusively.
    #[serde(default)]
    pub overlay_compatible: bool,
    /// Priority weight in the 0..=100 range.
    pub priority: u8,
}

/// Everything a module declares about its visual output. Created when the
/// module activates and handed to the registry; the module keeps ownership of
/// its producers' behaviour, the registry only tracks the declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleCapability {
    pub module_id: ModuleId,
    pub producers: Vec<ProducerCapability>,
}

/// Wiring direction of consecutive rows in a 2-D layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GridOrientation {
    Horizontal,
    Vertical,
}

/// Physical arrangement of a 2-D device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLayout {
    pub width: u16,
    pub height: u16,
    /// Alternate rows are wired in reverse order.
    #[serde(default)]
    pub serpentine: bool,
    pub orientation: GridOrientation,
}

/// Declared capabilities of one physical device, read from the external
/// device registry. The routing matrix consumes this read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCapability {
    pub id: DeviceId,
    pub dimension: DeviceDimension,
    pub pixel_count: usize,
    #[serde(default)]
    pub grid: Option<GridLayout>,
    pub supported_kinds: Vec<VisualizationKind>,
    pub enabled: bool,
    pub brightness: u8,
    pub priority: u8,
}
