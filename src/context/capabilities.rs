//! Driver capability detection.
//!
//! The renderer keeps a single integer "shader tier" (120, 130 or 150) that
//! selects shader branches during preprocessing, plus a handful of booleans
//! deciding which rendering techniques are allowed. They are derived from the
//! version and profile the driver reports, filtered through the configurable
//! [`CapabilityRules`].

use crate::config::CapabilityRules;

/// The profile a driver context was created with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DriverProfile {
    /// Core profile: no deprecated functionality.
    Core,
    /// Compatibility profile.
    Compatibility,
    /// The driver did not report a profile.
    NoProfile,
}

/// Version information reported by the driver behind a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverInfo {
    pub major: u32,
    pub minor: u32,
    pub profile: DriverProfile,
    pub vendor: String,
    pub renderer: String,
}

impl DriverInfo {
    /// Creates driver information from a version and profile.
    pub fn new(major: u32, minor: u32, profile: DriverProfile) -> Self {
        DriverInfo {
            major,
            minor,
            profile,
            vendor: String::new(),
            renderer: String::new(),
        }
    }

    /// Sets the vendor and renderer strings.
    pub fn with_strings(mut self, vendor: impl Into<String>, renderer: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self.renderer = renderer.into();
        self
    }

    /// Derives driver information from a wgpu adapter.
    ///
    /// Native backends (Vulkan, Metal, DX12) are treated as a modern core
    /// profile. For the GL backend the first `major.minor` pair found in the
    /// driver string is used, with the profile taken from the string when it
    /// names one.
    pub fn from_adapter_info(info: &wgpu::AdapterInfo) -> Self {
        let strings = |d: DriverInfo| d.with_strings(format!("{:?}", info.vendor), info.name.clone());

        if info.backend != wgpu::Backend::Gl {
            return strings(DriverInfo::new(4, 5, DriverProfile::Core));
        }

        let text = format!("{} {}", info.driver, info.driver_info);
        let (major, minor) = parse_version(&text).unwrap_or((3, 0));
        let profile = if text.contains("Compatibility") {
            DriverProfile::Compatibility
        } else if text.contains("Core") {
            DriverProfile::Core
        } else {
            DriverProfile::NoProfile
        };
        strings(DriverInfo::new(major, minor, profile))
    }
}

fn parse_version(text: &str) -> Option<(u32, u32)> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter_map(|token| {
            let mut parts = token.split('.');
            let major = parts.next()?.parse().ok()?;
            let minor = parts.next()?.parse().ok()?;
            Some((major, minor))
        })
        .next()
}

/// What the renderer may use on a given device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Shader tier used by the version preprocessor: 120, 130 or 150.
    pub shader_tier: u32,
    /// Whether the context runs a core profile.
    pub core_profile: bool,
    /// Whether elements may be expanded to their corner vertices on the GPU.
    pub gpu_expansion: bool,
    /// Whether particles may be drawn as screen-aligned sprites.
    pub point_sprites: bool,
    /// Whether shaders can read the builtin vertex index.
    pub vertex_index_builtin: bool,
    /// Largest buffer the device accepts, in bytes.
    pub max_buffer_bytes: u64,
}

impl Capabilities {
    /// Applies the detection rules to the reported driver information.
    pub fn detect(driver: &DriverInfo, rules: &CapabilityRules, max_buffer_bytes: u64) -> Self {
        let core_profile = is_core_profile(driver, rules);
        let shader_tier = rules.force_tier.unwrap_or_else(|| shader_tier(driver));
        let vertex_index_builtin = shader_tier >= rules.vertex_index_min_tier;

        // Instanced expansion derives the corner from the builtin vertex index.
        let blocked = rules
            .disable_expansion_for_drivers
            .iter()
            .any(|s| !s.is_empty() && driver.renderer.contains(s.as_str()));
        let gpu_expansion =
            shader_tier >= rules.gpu_expansion_min_tier && !blocked && vertex_index_builtin;
        let point_sprites = rules.point_sprites && vertex_index_builtin;

        let caps = Capabilities {
            shader_tier,
            core_profile,
            gpu_expansion,
            point_sprites,
            vertex_index_builtin,
            max_buffer_bytes,
        };
        log::info!(
            "driver {}.{} ({:?}, `{}`): {:?}",
            driver.major,
            driver.minor,
            driver.profile,
            driver.renderer,
            caps
        );
        caps
    }
}

/// Core-profile detection. Versions above 3.1 only exist as core or
/// compatibility profiles; a 3.1 context is core unless compatibility was
/// reported.
pub fn is_core_profile(driver: &DriverInfo, rules: &CapabilityRules) -> bool {
    if driver.profile == DriverProfile::Core {
        return true;
    }
    if driver.major > 3 || (driver.major == 3 && driver.minor >= 2) {
        return driver.profile != DriverProfile::Compatibility;
    }
    driver.major == 3
        && driver.minor == 1
        && rules.assume_core_for_3_1
        && driver.profile != DriverProfile::Compatibility
}

/// Maps a driver version to the shader tier.
pub fn shader_tier(driver: &DriverInfo) -> u32 {
    if (driver.major >= 3 && driver.minor >= 2) || driver.major > 3 {
        150
    } else if driver.major >= 3 {
        130
    } else {
        120
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(major: u32, minor: u32, profile: DriverProfile) -> Capabilities {
        Capabilities::detect(
            &DriverInfo::new(major, minor, profile),
            &CapabilityRules::default(),
            1 << 28,
        )
    }

    #[test]
    fn tiers_follow_version() {
        assert_eq!(detect(2, 1, DriverProfile::NoProfile).shader_tier, 120);
        assert_eq!(detect(3, 0, DriverProfile::NoProfile).shader_tier, 130);
        assert_eq!(detect(3, 1, DriverProfile::NoProfile).shader_tier, 130);
        assert_eq!(detect(3, 3, DriverProfile::Core).shader_tier, 150);
        assert_eq!(detect(4, 1, DriverProfile::Compatibility).shader_tier, 150);
    }

    #[test]
    fn core_profile_rules() {
        assert!(detect(3, 1, DriverProfile::NoProfile).core_profile);
        assert!(!detect(3, 1, DriverProfile::Compatibility).core_profile);
        assert!(!detect(2, 1, DriverProfile::NoProfile).core_profile);
        assert!(detect(3, 3, DriverProfile::NoProfile).core_profile);
        assert!(!detect(4, 6, DriverProfile::Compatibility).core_profile);

        let rules = CapabilityRules {
            assume_core_for_3_1: false,
            ..Default::default()
        };
        let driver = DriverInfo::new(3, 1, DriverProfile::NoProfile);
        assert!(!is_core_profile(&driver, &rules));
    }

    #[test]
    fn expansion_requires_tier_and_allowed_driver() {
        assert!(!detect(3, 0, DriverProfile::NoProfile).gpu_expansion);
        assert!(detect(3, 3, DriverProfile::Core).gpu_expansion);

        let rules = CapabilityRules {
            disable_expansion_for_drivers: vec!["SVGA3D".into()],
            ..Default::default()
        };
        let driver = DriverInfo::new(3, 3, DriverProfile::Core)
            .with_strings("VMware, Inc.", "SVGA3D; build: RELEASE;");
        let caps = Capabilities::detect(&driver, &rules, 1 << 20);
        assert!(!caps.gpu_expansion);
        assert!(caps.vertex_index_builtin);
    }

    #[test]
    fn forced_tier_overrides_detection() {
        let rules = CapabilityRules {
            force_tier: Some(120),
            point_sprites: true,
            ..Default::default()
        };
        let caps = Capabilities::detect(&DriverInfo::new(4, 5, DriverProfile::Core), &rules, 1);
        assert_eq!(caps.shader_tier, 120);
        assert!(!caps.vertex_index_builtin);
        assert!(!caps.point_sprites);
        assert!(!caps.gpu_expansion);
    }

    #[test]
    fn gl_version_parsing() {
        assert_eq!(parse_version("4.6.0 NVIDIA 535.54"), Some((4, 6)));
        assert_eq!(parse_version("OpenGL ES 3.0 Mesa"), Some((3, 0)));
        assert_eq!(parse_version("unknown"), None);
    }
}
