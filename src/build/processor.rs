//! Category processors: the Modelfile-directive-scoped rules that claim
//! workspace files for a layer category.

use std::collections::BTreeSet;

use glob::Pattern;

use crate::error::{Error, Result};
use crate::oci;

/// Claims files for one layer category. Patterns are globs; a pattern
/// containing `/` matches the forward-slash relative path, any other
/// pattern matches the basename.
pub struct Processor {
    name: &'static str,
    media_type: &'static str,
    marker: Option<&'static str>,
    patterns: Vec<Pattern>,
}

impl Processor {
    fn new(
        name: &'static str,
        media_type: &'static str,
        marker: Option<&'static str>,
        globs: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let mut patterns = Vec::new();
        for glob in globs {
            let glob = glob.as_ref();
            let pattern = Pattern::new(glob).map_err(|err| {
                Error::Config(format!("invalid {name} pattern {glob:?}: {err}"))
            })?;
            patterns.push(pattern);
        }
        Ok(Self {
            name,
            media_type,
            marker,
            patterns,
        })
    }

    pub fn config(globs: &BTreeSet<String>) -> Result<Self> {
        Self::new(
            "config",
            oci::MEDIA_TYPE_MODEL_WEIGHT_CONFIG,
            Some(oci::ANNOTATION_CONFIG),
            globs,
        )
    }

    pub fn model(globs: &BTreeSet<String>) -> Result<Self> {
        Self::new(
            "model",
            oci::MEDIA_TYPE_MODEL_WEIGHT,
            Some(oci::ANNOTATION_MODEL),
            globs,
        )
    }

    pub fn code(globs: &BTreeSet<String>) -> Result<Self> {
        Self::new("code", oci::MEDIA_TYPE_MODEL_CODE, None, globs)
    }

    pub fn doc(globs: &BTreeSet<String>) -> Result<Self> {
        Self::new("doc", oci::MEDIA_TYPE_MODEL_DOC, None, globs)
    }

    pub fn dataset(globs: &BTreeSet<String>) -> Result<Self> {
        Self::new("dataset", oci::MEDIA_TYPE_MODEL_DATASET, None, globs)
    }

    /// Default processor claiming README files, local builds only.
    pub fn readme() -> Result<Self> {
        Self::new(
            "readme",
            oci::MEDIA_TYPE_MODEL_DOC,
            Some(oci::ANNOTATION_README),
            ["README*"],
        )
    }

    /// Default processor claiming LICENSE files, local builds only.
    pub fn license() -> Result<Self> {
        Self::new(
            "license",
            oci::MEDIA_TYPE_MODEL_DOC,
            Some(oci::ANNOTATION_LICENSE),
            ["LICENSE*"],
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    /// Category marker annotation stamped on claimed layers, if any.
    pub fn marker(&self) -> Option<&'static str> {
        self.marker
    }

    pub fn claims(&self, rel_path: &str) -> bool {
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
        self.patterns.iter().any(|pattern| {
            if pattern.as_str().contains('/') {
                pattern.matches(rel_path)
            } else {
                pattern.matches(basename)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_basename_globs() {
        let p = Processor::model(&set(&["*.safetensors", "pytorch_model.bin"])).unwrap();
        assert!(p.claims("model-00001-of-00003.safetensors"));
        assert!(p.claims("weights/model.safetensors"));
        assert!(p.claims("pytorch_model.bin"));
        assert!(!p.claims("model.gguf"));
    }

    #[test]
    fn test_path_globs_match_relative_paths() {
        let p = Processor::model(&set(&["weights/model.bin"])).unwrap();
        assert!(p.claims("weights/model.bin"));
        // A path pattern does not float to other directories.
        assert!(!p.claims("other/model.bin"));
        assert!(!p.claims("model.bin"));
    }

    #[test]
    fn test_glob_dot_is_literal() {
        // Glob semantics: `.` matches only itself, unlike a regex dot.
        let p = Processor::config(&set(&["config.json"])).unwrap();
        assert!(p.claims("config.json"));
        assert!(!p.claims("configXjson"));
    }

    #[test]
    fn test_default_processors() {
        let readme = Processor::readme().unwrap();
        assert!(readme.claims("README"));
        assert!(readme.claims("README.md"));
        assert!(readme.claims("docs/README.md"));
        assert!(!readme.claims("LICENSE"));
        assert_eq!(readme.marker(), Some(oci::ANNOTATION_README));

        let license = Processor::license().unwrap();
        assert!(license.claims("LICENSE"));
        assert!(license.claims("LICENSE.txt"));
        assert_eq!(license.media_type(), oci::MEDIA_TYPE_MODEL_DOC);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(Processor::model(&set(&["[unclosed"])).is_err());
    }
}
