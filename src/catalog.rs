//! Model names advertised on `/api/tags`.
//!
//! The relay forwards every request to one upstream model, so the catalog is
//! cosmetic: it exists for clients that refuse to talk to an Ollama server
//! with no models installed.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::config::ModelsConfig;
use crate::util::hex_digest_256;

/// Built-in names, always listed first.
pub const DEFAULT_MODELS: &[&str] = &[
    "deepseek-r1:1.5b",
    "deepseek-r1:7b",
    "deepseek-r1:8b",
    "deepseek-r1:14b",
    "qwen2.5:7b-instruct-fp16",
    "llama3.1:8b-instruct-q4_K_M",
    "llama3.3:70b-instruct-fp16",
    "llama3.3:70b-instruct-q8_0",
    "hellord/mxbai-embed-large-v1:f16",
    "all-minilm",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDetails {
    pub parent_model: String,
    pub format: &'static str,
    pub family: String,
    pub families: Vec<String>,
    pub parameter_size: String,
    pub quantization_level: String,
}

#[derive(Serialize)]
struct TagEntry<'a> {
    name: &'a str,
    model: &'a str,
    modified_at: &'a str,
    size: u64,
    digest: String,
    details: ModelDetails,
}

#[derive(Serialize)]
struct TagsBody<'a> {
    models: Vec<TagEntry<'a>>,
}

pub struct ModelCatalog {
    names: Vec<String>,
    tags_body: Bytes,
}

impl ModelCatalog {
    /// Build from the built-in list followed by `extra`, keeping the first
    /// occurrence of each name.
    #[must_use]
    pub fn new<I, S>(extra: I, modified_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::with_capacity(DEFAULT_MODELS.len());
        let candidates = DEFAULT_MODELS
            .iter()
            .map(|name| (*name).to_string())
            .chain(extra.into_iter().map(Into::into));
        for name in candidates {
            let name = name.trim().to_string();
            if name.is_empty() || names.contains(&name) {
                continue;
            }
            names.push(name);
        }

        let tags_body = build_tags_body(&names, modified_at);
        Self { names, tags_body }
    }

    /// Built-in names, then `models.names`, then the names file. A missing or
    /// unreadable file is logged and skipped.
    #[must_use]
    pub fn from_config(config: &ModelsConfig) -> Self {
        let mut extra = config.names.clone();
        if let Some(path) = config.file.as_deref() {
            match load_names_file(path) {
                Ok(names) => extra.extend(names),
                Err(err) => {
                    tracing::warn!(path, error = %err, "failed to load model names file");
                }
            }
        }
        Self::new(extra, Utc::now())
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|known| known == name)
    }

    /// Serialized `{"models": [...]}` body, built once.
    #[must_use]
    pub fn tags_body(&self) -> Bytes {
        self.tags_body.clone()
    }
}

fn load_names_file(path: &str) -> Result<Vec<String>, String> {
    let contents = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    serde_json::from_str::<Vec<String>>(&contents).map_err(|err| err.to_string())
}

fn build_tags_body(names: &[String], modified_at: DateTime<Utc>) -> Bytes {
    let modified_at = modified_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let body = TagsBody {
        models: names
            .iter()
            .map(|name| TagEntry {
                name,
                model: name,
                modified_at: &modified_at,
                size: 0,
                digest: hex_digest_256(name.as_bytes()),
                details: model_details(name),
            })
            .collect(),
    };
    match serde_json::to_vec(&body) {
        Ok(bytes) => Bytes::from(bytes),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize model catalog");
            Bytes::from_static(b"{\"models\":[]}")
        }
    }
}

/// Derive display details from an Ollama-style name such as
/// `namespace/family-variant:7b-instruct-q4_K_M`.
#[must_use]
pub fn model_details(name: &str) -> ModelDetails {
    let (base, tag) = name.split_once(':').unwrap_or((name, ""));
    let base = base.rsplit('/').next().unwrap_or(base);
    let family = base.split('-').next().unwrap_or(base).to_string();

    let mut parameter_size = String::new();
    let mut quantization_level = String::new();
    for segment in tag.split('-') {
        if parameter_size.is_empty() && is_parameter_size(segment) {
            parameter_size = segment.to_ascii_uppercase();
        } else if quantization_level.is_empty() {
            if let Some(level) = quantization(segment) {
                quantization_level = level;
            }
        }
    }

    ModelDetails {
        parent_model: String::new(),
        format: "gguf",
        families: vec![family.clone()],
        family,
        parameter_size,
        quantization_level,
    }
}

fn is_parameter_size(segment: &str) -> bool {
    let Some(number) = segment
        .strip_suffix(['b', 'B'])
        .or_else(|| segment.strip_suffix(['m', 'M']))
    else {
        return false;
    };
    !number.is_empty()
        && number.bytes().any(|b| b.is_ascii_digit())
        && number.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

fn quantization(segment: &str) -> Option<String> {
    let lower = segment.to_ascii_lowercase();
    match lower.as_str() {
        "f16" | "fp16" => return Some("F16".to_string()),
        "f32" | "fp32" => return Some("F32".to_string()),
        "bf16" => return Some("BF16".to_string()),
        _ => {}
    }
    let rest = lower.strip_prefix('q')?;
    rest.starts_with(|c: char| c.is_ascii_digit())
        .then(|| segment.to_ascii_uppercase())
}
