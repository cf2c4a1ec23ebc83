//! Renderer configuration.
//!
//! Everything the renderer treats as a tunable policy lives here: the buffer
//! chunking limits, the cylinder tessellation resolution, and the capability
//! rules deciding which rendering techniques a driver may use. The
//! configuration can be built in code or read from TOML:
//!
//! ```
//! use viewport_render::config::RendererConfig;
//!
//! let config = RendererConfig::from_toml_str(r#"
//!     cylinder_segments = 24
//!
//!     [capabilities]
//!     force_tier = 130
//! "#).unwrap();
//! assert_eq!(config.cylinder_segments, 24);
//! assert_eq!(config.capabilities.force_tier, Some(130));
//! ```

use crate::error::{RenderError, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level renderer configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Maximum size in bytes of one particle buffer chunk.
    pub max_particle_buffer_bytes: usize,
    /// Maximum size in bytes of one arrow/cylinder buffer chunk.
    pub max_arrow_buffer_bytes: usize,
    /// Number of segments used to tessellate cylinder mantles and caps.
    pub cylinder_segments: u32,
    /// Wraps every frame in a validation error scope and logs what it catches.
    pub debug_gpu_error_checks: bool,
    /// Line width in logical pixels used when rendering lines for picking.
    pub default_line_picking_width: f32,
    /// Rules mapping the reported driver version to usable techniques.
    pub capabilities: CapabilityRules,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            max_particle_buffer_bytes: 4 * 1024 * 1024,
            max_arrow_buffer_bytes: 32 * 1024 * 1024,
            cylinder_segments: 16,
            debug_gpu_error_checks: false,
            default_line_picking_width: 6.0,
            capabilities: CapabilityRules::default(),
        }
    }
}

/// Environment-specific capability detection heuristics.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapabilityRules {
    /// Whether screen-aligned sprite rendering may be used for particles.
    pub point_sprites: bool,
    /// Minimum shader tier for expanding elements on the GPU (instancing).
    pub gpu_expansion_min_tier: u32,
    /// Minimum shader tier for reading the builtin vertex index.
    pub vertex_index_min_tier: u32,
    /// Treat a 3.1 driver as core profile unless compatibility was reported.
    pub assume_core_for_3_1: bool,
    /// Renderer-string substrings for which GPU expansion is turned off.
    pub disable_expansion_for_drivers: Vec<String>,
    /// Overrides the detected shader tier.
    pub force_tier: Option<u32>,
}

impl Default for CapabilityRules {
    fn default() -> Self {
        CapabilityRules {
            point_sprites: false,
            gpu_expansion_min_tier: 150,
            vertex_index_min_tier: 130,
            assume_core_for_3_1: true,
            disable_expansion_for_drivers: Vec::new(),
            force_tier: None,
        }
    }
}

impl RendererConfig {
    /// Parses a configuration from TOML text. Missing fields take their
    /// default values; unknown fields are rejected.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RendererConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("loading renderer configuration from {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.cylinder_segments < 3 {
            return Err(RenderError::Config(format!(
                "cylinder_segments must be at least 3, got {}",
                self.cylinder_segments
            )));
        }
        // Shader sources switch to the builtin vertex index at tier 130.
        if self.capabilities.vertex_index_min_tier < 130 {
            return Err(RenderError::Config(format!(
                "vertex_index_min_tier must be at least 130, got {}",
                self.capabilities.vertex_index_min_tier
            )));
        }
        if self.max_particle_buffer_bytes == 0 || self.max_arrow_buffer_bytes == 0 {
            return Err(RenderError::Config(
                "maximum buffer sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.max_particle_buffer_bytes, 4 * 1024 * 1024);
        assert_eq!(config.capabilities.gpu_expansion_min_tier, 150);
    }

    #[test]
    fn capability_rules_from_toml() {
        let config = RendererConfig::from_toml_str(
            r#"
            max_arrow_buffer_bytes = 1024

            [capabilities]
            point_sprites = true
            disable_expansion_for_drivers = ["SVGA3D"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_arrow_buffer_bytes, 1024);
        assert!(config.capabilities.point_sprites);
        assert_eq!(config.capabilities.disable_expansion_for_drivers, vec!["SVGA3D"]);
        assert!(config.capabilities.assume_core_for_3_1);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = RendererConfig::from_toml_str("no_such_option = 1").unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn too_few_segments_are_rejected() {
        assert!(RendererConfig::from_toml_str("cylinder_segments = 2").is_err());
    }

    #[test]
    fn vertex_index_tier_below_shader_switch_is_rejected() {
        let err = RendererConfig::from_toml_str("[capabilities]\nvertex_index_min_tier = 120").unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
        assert!(RendererConfig::from_toml_str("[capabilities]\nvertex_index_min_tier = 150").is_ok());
    }
}
