//! Directive keywords recognized in a Modelfile.

/// CONFIG names a configuration file (config.json, tokenizer settings and
/// the like); each matched file becomes its own layer. May repeat.
pub const CONFIG: &str = "CONFIG";

/// MODEL names a weight file by path or glob; each matched file becomes its
/// own layer. May repeat.
pub const MODEL: &str = "MODEL";

/// CODE names a code file by path or glob. May repeat.
pub const CODE: &str = "CODE";

/// DATASET names a dataset file by path or glob. May repeat.
pub const DATASET: &str = "DATASET";

/// DOC names a documentation file by path or glob. May repeat.
pub const DOC: &str = "DOC";

/// NAME sets the model name, e.g. llama3-8b-instruct. Single-valued.
pub const NAME: &str = "NAME";

/// ARCH sets the model architecture, e.g. transformer. Single-valued.
pub const ARCH: &str = "ARCH";

/// FAMILY sets the model family, e.g. llama3, gpt2. Single-valued.
pub const FAMILY: &str = "FAMILY";

/// FORMAT sets the weight format, e.g. safetensors, gguf. Single-valued.
pub const FORMAT: &str = "FORMAT";

/// PARAMSIZE sets the parameter size, e.g. 7B. Single-valued.
pub const PARAMSIZE: &str = "PARAMSIZE";

/// PRECISION sets the numeric precision, e.g. bf16, int8. Single-valued.
pub const PRECISION: &str = "PRECISION";

/// QUANTIZATION sets the quantization scheme, e.g. awq, gptq. Single-valued.
pub const QUANTIZATION: &str = "QUANTIZATION";

/// All recognized directive keywords.
pub const COMMANDS: [&str; 12] = [
    CONFIG,
    MODEL,
    CODE,
    DATASET,
    DOC,
    NAME,
    ARCH,
    FAMILY,
    FORMAT,
    PARAMSIZE,
    PRECISION,
    QUANTIZATION,
];

/// Resolve a (case-folded) keyword to its canonical uppercase constant.
pub fn lookup(keyword: &str) -> Option<&'static str> {
    COMMANDS.iter().find(|c| **c == keyword).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_keywords() {
        assert_eq!(lookup("MODEL"), Some(MODEL));
        assert_eq!(lookup("QUANTIZATION"), Some(QUANTIZATION));
        assert_eq!(lookup("INVALID"), None);
        // The parser upper-cases before lookup; lowercase is not canonical.
        assert_eq!(lookup("model"), None);
    }
}
