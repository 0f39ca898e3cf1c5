//! The Modelfile recipe: parsing, accessors and canonical rendering.

pub mod command;
mod parser;
mod scan;

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::config::GenerateConfig;
use crate::error::{Error, Result};

pub use scan::scan_workspace;

/// A parsed Modelfile. Multi-valued directives are unordered unique sets;
/// single-valued directives may be assigned at most once. Immutable once
/// constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modelfile {
    pub(crate) name: Option<String>,
    pub(crate) arch: Option<String>,
    pub(crate) family: Option<String>,
    pub(crate) format: Option<String>,
    pub(crate) param_size: Option<String>,
    pub(crate) precision: Option<String>,
    pub(crate) quantization: Option<String>,
    pub(crate) configs: BTreeSet<String>,
    pub(crate) models: BTreeSet<String>,
    pub(crate) codes: BTreeSet<String>,
    pub(crate) datasets: BTreeSet<String>,
    pub(crate) docs: BTreeSet<String>,
}

impl Modelfile {
    /// Parse Modelfile text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut mf = Modelfile::default();

        for directive in parser::parse_text(text)? {
            let value = directive.value;
            match directive.keyword {
                command::CONFIG => {
                    mf.configs.insert(value);
                }
                command::MODEL => {
                    mf.models.insert(value);
                }
                command::CODE => {
                    mf.codes.insert(value);
                }
                command::DATASET => {
                    mf.datasets.insert(value);
                }
                command::DOC => {
                    mf.docs.insert(value);
                }
                command::NAME => assign(&mut mf.name, "name", value, directive.line)?,
                command::ARCH => assign(&mut mf.arch, "arch", value, directive.line)?,
                command::FAMILY => assign(&mut mf.family, "family", value, directive.line)?,
                command::FORMAT => assign(&mut mf.format, "format", value, directive.line)?,
                command::PARAMSIZE => {
                    assign(&mut mf.param_size, "paramsize", value, directive.line)?
                }
                command::PRECISION => {
                    assign(&mut mf.precision, "precision", value, directive.line)?
                }
                command::QUANTIZATION => {
                    assign(&mut mf.quantization, "quantization", value, directive.line)?
                }
                _ => unreachable!("parser only yields known keywords"),
            }
        }

        Ok(mf)
    }

    /// Parse the Modelfile at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Synthesize a Modelfile from a workspace directory.
    pub fn from_workspace(workspace: &Path, cfg: &GenerateConfig) -> Result<Self> {
        scan_workspace(workspace, cfg)
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn arch(&self) -> &str {
        self.arch.as_deref().unwrap_or("")
    }

    pub fn family(&self) -> &str {
        self.family.as_deref().unwrap_or("")
    }

    pub fn format(&self) -> &str {
        self.format.as_deref().unwrap_or("")
    }

    pub fn param_size(&self) -> &str {
        self.param_size.as_deref().unwrap_or("")
    }

    pub fn precision(&self) -> &str {
        self.precision.as_deref().unwrap_or("")
    }

    pub fn quantization(&self) -> &str {
        self.quantization.as_deref().unwrap_or("")
    }

    pub fn configs(&self) -> &BTreeSet<String> {
        &self.configs
    }

    pub fn models(&self) -> &BTreeSet<String> {
        &self.models
    }

    pub fn codes(&self) -> &BTreeSet<String> {
        &self.codes
    }

    pub fn datasets(&self) -> &BTreeSet<String> {
        &self.datasets
    }

    pub fn docs(&self) -> &BTreeSet<String> {
        &self.docs
    }

    /// Render the canonical Modelfile text: a generation header, scalar
    /// sections, then the file sections with values in sorted order. Empty
    /// fields are omitted. The output parses back to an equal Modelfile.
    pub fn render(&self, generated_at: DateTime<Utc>) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# Generated at {}",
            generated_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        );

        let scalars: [(&str, &str, &str); 7] = [
            ("Model name", command::NAME, self.name()),
            ("Model architecture", command::ARCH, self.arch()),
            ("Model family", command::FAMILY, self.family()),
            ("Model format", command::FORMAT, self.format()),
            ("Model paramsize", command::PARAMSIZE, self.param_size()),
            ("Model precision", command::PRECISION, self.precision()),
            ("Model quantization", command::QUANTIZATION, self.quantization()),
        ];
        for (heading, keyword, value) in scalars {
            if value.is_empty() {
                continue;
            }
            let _ = write!(out, "\n# {}\n{} {}\n", heading, keyword, value);
        }

        let sections: [(&str, &str, &BTreeSet<String>); 5] = [
            ("Config files", command::CONFIG, &self.configs),
            ("Documentation files", command::DOC, &self.docs),
            ("Code files", command::CODE, &self.codes),
            ("Model files", command::MODEL, &self.models),
            ("Dataset files", command::DATASET, &self.datasets),
        ];
        for (heading, keyword, values) in sections {
            if values.is_empty() {
                continue;
            }
            let _ = write!(out, "\n# {}\n", heading);
            for value in values {
                let _ = writeln!(out, "{} {}", keyword, value);
            }
        }

        out
    }
}

fn assign(slot: &mut Option<String>, field: &'static str, value: String, line: usize) -> Result<()> {
    if slot.is_some() {
        return Err(Error::DuplicateCommand { field, line });
    }
    *slot = Some(value);
    Ok(())
}
