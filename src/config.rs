//! Build and generate configuration.

use crate::error::{Error, Result};

/// Default number of concurrent layer workers per build.
pub const DEFAULT_BUILD_CONCURRENCY: usize = 5;

/// Options consumed by the build orchestrator.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Number of concurrent layer workers, must be greater than 0.
    pub concurrency: usize,
    /// Target artifact reference, `<repo>:<tag>`. The tag is mandatory.
    pub target: String,
    /// Path to the Modelfile recipe.
    pub modelfile: String,
    /// Push to a remote registry instead of the local store.
    pub output_remote: bool,
    /// Use plain HTTP for the remote registry.
    pub plain_http: bool,
    /// Skip TLS certificate verification for the remote registry.
    pub insecure: bool,
    /// Enable the built-in nydus layer interceptor.
    pub nydusify: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_BUILD_CONCURRENCY,
            target: String::new(),
            modelfile: "Modelfile".to_string(),
            output_remote: false,
            plain_http: false,
            insecure: false,
            nydusify: false,
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.target.is_empty() {
            return Err(Error::Config(
                "target model artifact name is required".to_string(),
            ));
        }

        if self.modelfile.is_empty() {
            return Err(Error::Config("model file path is required".to_string()));
        }

        Ok(())
    }
}

/// Metadata overrides for synthesizing a Modelfile from a workspace.
/// Non-empty values take precedence over anything inferred from the files.
#[derive(Debug, Clone, Default)]
pub struct GenerateConfig {
    pub name: String,
    pub arch: String,
    pub family: String,
    pub format: String,
    pub param_size: String,
    pub precision: String,
    pub quantization: String,
    /// Skip files whose type is not recognized instead of failing the scan.
    pub ignore_unrecognized_file_types: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_build_config() {
        let cfg = BuildConfig::default();
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.modelfile, "Modelfile");
        assert!(!cfg.output_remote);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let cfg = BuildConfig {
            concurrency: 0,
            target: "repo:tag".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_requires_target() {
        let cfg = BuildConfig::default();
        assert!(cfg.validate().is_err());

        let cfg = BuildConfig {
            target: "models/llama:v1".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
