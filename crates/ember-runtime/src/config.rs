//! Stub generator configuration

/// Cranelift optimization level used for bridging routines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimization (fastest startup)
    None,
    /// Optimize for speed
    Speed,
}

impl OptLevel {
    pub(crate) fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
        }
    }
}

/// Configuration for one-time stub generation
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Total bytes of machine code all blobs may use (default: 256 KiB)
    pub code_buffer_size: usize,
    /// Optimization level for bridging routines (default: Speed)
    pub opt_level: OptLevel,
    /// Run the Cranelift IR verifier on every routine (default: true in debug builds)
    pub verify: bool,
    /// Attach a named counter to every bridge and bump it on entry (default: false)
    pub count_stub_calls: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            code_buffer_size: 256 * 1024,
            opt_level: OptLevel::Speed,
            verify: cfg!(debug_assertions),
            count_stub_calls: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GeneratorConfig::default();
        assert_eq!(config.code_buffer_size, 256 * 1024);
        assert_eq!(config.opt_level, OptLevel::Speed);
        assert!(!config.count_stub_calls);
    }

    #[test]
    fn test_opt_level_settings() {
        assert_eq!(OptLevel::None.as_setting(), "none");
        assert_eq!(OptLevel::Speed.as_setting(), "speed");
    }
}
