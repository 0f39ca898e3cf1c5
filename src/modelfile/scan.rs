//! Synthesize a Modelfile from a workspace directory.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::config::GenerateConfig;
use crate::error::{Error, Result};
use crate::modelfile::Modelfile;
use crate::walker;

/// Layer category a scanned file lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Config,
    Model,
    Code,
    Doc,
}

const DOC_NAMES: [&str; 5] = ["README", "README.md", "README.txt", "LICENSE", "LICENSE.txt"];
const DOC_EXTENSIONS: [&str; 5] = ["md", "txt", "jpg", "jpeg", "png"];

const CONFIG_NAMES: [&str; 7] = [
    "config.json",
    "generation_config.json",
    "tokenizer_config.json",
    "special_tokens_map.json",
    "tokenizer.json",
    "tokenizer.model",
    "vocab.json",
];
const CONFIG_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

const MODEL_EXTENSIONS: [&str; 9] = [
    "bin",
    "safetensors",
    "pt",
    "pth",
    "onnx",
    "gguf",
    "ggml",
    "h5",
    "msgpack",
];

const CODE_EXTENSIONS: [&str; 3] = ["py", "ipynb", "sh"];

fn extension(basename: &str) -> Option<&str> {
    basename.rsplit_once('.').map(|(_, ext)| ext)
}

/// Classify a file by its basename. The tests are ordered: documentation
/// catalogue first, then configuration, weights, code.
fn classify(basename: &str) -> Option<Category> {
    let ext = extension(basename);

    if DOC_NAMES.contains(&basename) || ext.is_some_and(|e| DOC_EXTENSIONS.contains(&e)) {
        return Some(Category::Doc);
    }
    if CONFIG_NAMES.contains(&basename) || ext.is_some_and(|e| CONFIG_EXTENSIONS.contains(&e)) {
        return Some(Category::Config);
    }
    if ext.is_some_and(|e| MODEL_EXTENSIONS.contains(&e)) {
        return Some(Category::Model);
    }
    if ext.is_some_and(|e| CODE_EXTENSIONS.contains(&e)) {
        return Some(Category::Code);
    }

    None
}

/// Walk the workspace, classify every surviving file and synthesize a
/// Modelfile, enriched from the root config files and the caller overrides.
pub fn scan_workspace(workspace: &Path, cfg: &GenerateConfig) -> Result<Modelfile> {
    let mut mf = Modelfile::default();

    for rel_path in walker::walk_files(workspace)? {
        let basename = rel_path.rsplit('/').next().unwrap_or(&rel_path);
        match classify(basename) {
            Some(Category::Config) => {
                mf.configs.insert(rel_path);
            }
            Some(Category::Model) => {
                mf.models.insert(rel_path);
            }
            Some(Category::Code) => {
                mf.codes.insert(rel_path);
            }
            Some(Category::Doc) => {
                mf.docs.insert(rel_path);
            }
            None if cfg.ignore_unrecognized_file_types => {
                debug!(path = %rel_path, "skipping unrecognized file");
            }
            None => return Err(Error::UnrecognizedFile(rel_path)),
        }
    }

    if mf.configs.is_empty() && mf.models.is_empty() && mf.codes.is_empty() && mf.docs.is_empty()
    {
        return Err(Error::EmptyWorkspace);
    }

    // Root-level config files contribute metadata; generation_config.json is
    // read second so the later-alphabetized file wins on conflicts.
    for name in ["config.json", "generation_config.json"] {
        enrich_from_config(workspace, name, &mut mf);
    }

    apply_overrides(cfg, &mut mf);
    Ok(mf)
}

/// Pull family/precision/arch out of a root config file, when it parses as
/// a JSON object. Non-root occurrences contribute to the file list only.
fn enrich_from_config(workspace: &Path, name: &str, mf: &mut Modelfile) {
    let path = workspace.join(name);
    if !path.is_file() {
        return;
    }
    let Ok(text) = fs::read_to_string(&path) else {
        return;
    };
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&text) else {
        debug!(path = %path.display(), "root config is not a JSON object, skipping");
        return;
    };

    if let Some(model_type) = fields.get("model_type").and_then(Value::as_str) {
        mf.family = Some(model_type.to_string());
        mf.arch = Some("transformer".to_string());
    }
    if let Some(dtype) = fields.get("torch_dtype").and_then(Value::as_str) {
        mf.precision = Some(dtype.to_string());
    }
}

/// Non-empty caller overrides take precedence over anything inferred.
fn apply_overrides(cfg: &GenerateConfig, mf: &mut Modelfile) {
    let overrides = [
        (&cfg.name, &mut mf.name),
        (&cfg.arch, &mut mf.arch),
        (&cfg.family, &mut mf.family),
        (&cfg.format, &mut mf.format),
        (&cfg.param_size, &mut mf.param_size),
        (&cfg.precision, &mut mf.precision),
        (&cfg.quantization, &mut mf.quantization),
    ];
    for (value, slot) in overrides {
        if !value.is_empty() {
            *slot = Some(value.clone());
        }
    }
}
