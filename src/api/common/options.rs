//! Ollama request knobs mapped onto OpenAI chat-completion parameters.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The subset of Ollama `options` with an OpenAI counterpart. Everything
/// else (`num_ctx`, `top_k`, `mirostat`, ...) is accepted and dropped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaOptions {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub stop: Option<StopSequences>,
    #[serde(default)]
    pub num_predict: Option<i64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

/// Sampling parameters as sent upstream. Absent values are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

impl From<OllamaOptions> for SamplingParams {
    fn from(options: OllamaOptions) -> Self {
        Self {
            temperature: options.temperature,
            top_p: options.top_p,
            seed: options.seed,
            stop: options.stop.filter(|stop| match stop {
                StopSequences::One(one) => !one.is_empty(),
                StopSequences::Many(many) => !many.is_empty(),
            }),
            // Ollama uses -1 / -2 for "unbounded" / "fill context".
            max_tokens: options
                .num_predict
                .and_then(|n| u64::try_from(n).ok())
                .filter(|n| *n > 0),
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
        }
    }
}

/// Map Ollama `format` onto `response_format`: `"json"` selects JSON mode,
/// an object is treated as a JSON schema.
#[must_use]
pub fn response_format(format: Option<&Value>) -> Option<Value> {
    match format? {
        Value::String(kind) if kind.eq_ignore_ascii_case("json") => {
            Some(json!({ "type": "json_object" }))
        }
        schema @ Value::Object(_) => Some(json!({
            "type": "json_schema",
            "json_schema": { "name": "response", "schema": schema },
        })),
        _ => None,
    }
}
