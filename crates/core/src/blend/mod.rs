use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::{LedFrame, VisualizationKind, VisualizationMode};

/// Per-pixel math used when two compatible frames share a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    Multiply,
    Additive,
    Screen,
    Average,
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::Additive
    }
}

/// Blends a single colour channel. All modes stay within the byte range by
/// construction; additive saturates instead of wrapping.
pub fn blend_channel(base: u8, overlay: u8, mode: BlendMode) -> u8 {
    match mode {
        BlendMode::Multiply => ((u16::from(base) * u16::from(overlay)) / 255) as u8,
        BlendMode::Additive => base.saturating_add(overlay),
        BlendMode::Screen => {
            let inverse = u16::from(255 - base) * u16::from(255 - overlay) / 255;
            255 - inverse as u8
        }
        BlendMode::Average => ((u16::from(base) + u16::from(overlay)) / 2) as u8,
    }
}

/// Blends one RGB triple into another.
pub fn blend_pixels(base: [u8; 3], overlay: [u8; 3], mode: BlendMode) -> [u8; 3] {
    [
        blend_channel(base[0], overlay[0], mode),
        blend_channel(base[1], overlay[1], mode),
        blend_channel(base[2], overlay[2], mode),
    ]
}

/// Why a set of frames cannot be blended together. Not an error: the
/// compositor degrades to toggle mode and surfaces this as an event reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incompatibility {
    PixelCountMismatch { expected: usize, found: usize },
    ModeConflict { a: VisualizationKind, b: VisualizationKind },
    AddressingConflict,
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PixelCountMismatch { expected, found } => {
                write!(f, "pixel counts differ ({expected} vs {found})")
            }
            Self::ModeConflict { a, b } => {
                write!(f, "visualization modes {a:?} and {b:?} cannot be blended")
            }
            Self::AddressingConflict => {
                write!(f, "note-per-led frames use different addressing schemes")
            }
        }
    }
}

/// Static compatibility table over visualization kinds. The generic colour
/// array blends with everything; the structured modes only blend with the
/// generic mode and themselves.
fn kinds_compatible(a: VisualizationKind, b: VisualizationKind) -> bool {
    use VisualizationKind::GenericColorArray;
    a == b || a == GenericColorArray || b == GenericColorArray
}

/// Checks whether a set of frames targeting the same device can be blended.
/// Returns `None` when they can, otherwise the first incompatibility found.
///
/// Two note-per-led frames get the stricter check: equal pixel counts are
/// required of every pair anyway, but they must also share a root note.
pub fn check_compatibility(frames: &[&LedFrame]) -> Option<Incompatibility> {
    let Some(first) = frames.first() else {
        return None;
    };

    let expected = first.pixel_count();
    for frame in &frames[1..] {
        if frame.pixel_count() != expected {
            return Some(Incompatibility::PixelCountMismatch {
                expected,
                found: frame.pixel_count(),
            });
        }
    }

    for (index, a) in frames.iter().enumerate() {
        for b in &frames[index + 1..] {
            if !kinds_compatible(a.mode.kind(), b.mode.kind()) {
                return Some(Incompatibility::ModeConflict {
                    a: a.mode.kind(),
                    b: b.mode.kind(),
                });
            }

            if let (
                VisualizationMode::NotePerLed { root_note: root_a },
                VisualizationMode::NotePerLed { root_note: root_b },
            ) = (a.mode, b.mode)
            {
                if root_a != root_b {
                    return Some(Incompatibility::AddressingConflict);
                }
            }
        }
    }

    None
}

/// Composites compatible frames into a single pixel buffer. A single frame is
/// returned unchanged; with more, every subsequent frame is folded into the
/// first one pixel by pixel.
pub fn composite_frames(frames: &[&LedFrame], mode: BlendMode) -> Vec<u8> {
    let Some(first) = frames.first() else {
        return Vec::new();
    };

    let mut pixels = first.pixels.clone();
    for frame in &frames[1..] {
        for (base, overlay) in pixels.chunks_exact_mut(3).zip(frame.pixels.chunks_exact(3)) {
            let blended = blend_pixels(
                [base[0], base[1], base[2]],
                [overlay[0], overlay[1], overlay[2]],
                mode,
            );
            base.copy_from_slice(&blended);
        }
    }

    pixels
}
