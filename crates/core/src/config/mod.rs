use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;

/// Top-level configuration for the router and its services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub compositor: CompositorConfig,
}

/// Configuration specific to the frame compositor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositorConfig {
    /// Per-device output rate cap. Zero disables rate limiting entirely,
    /// which is mostly useful for tests and offline tools.
    #[serde(default = "default_max_fps")]
    pub max_fps: u32,
    #[serde(default)]
    pub blend_mode: BlendMode,
}

fn default_max_fps() -> u32 {
    30
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_fps: default_max_fps(),
            blend_mode: BlendMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cap_output_at_thirty_fps() {
        let config = RouterConfig::default();
        assert_eq!(config.compositor.max_fps, 30);
        assert_eq!(config.compositor.blend_mode, BlendMode::Additive);
    }

    #[test]
    fn round_trips_through_json() {
        let config = RouterConfig {
            compositor: CompositorConfig {
                max_fps: 60,
                blend_mode: BlendMode::Multiply,
            },
        };

        let json = serde_json::to_string(&config).unwrap();
        let back: RouterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.compositor.max_fps, 60);
        assert_eq!(back.compositor.blend_mode, BlendMode::Multiply);
    }
}
