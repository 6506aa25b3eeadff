//! Engine settings — the caller-facing settings model and the single
//! deterministic resolution used for every engine construction.
//!
//! Callers provide a sparse [`EngineSettings`] record (only the fields they
//! set). [`EngineSettings::build_profile`] resolves it into the concrete
//! [`EngineProfile`] handed to the engine factory: the named preset's bundle
//! (or the built-in defaults) fills every unset field, explicit fields
//! always win, and the rate-limit overlays are applied last. Both
//! `initialize` and `update_settings` construct engines through this one
//! path, so a rebuilt engine always matches a freshly built one.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ServiceError;

// ─── Defaults ──────────────────────────────────────────────────────

pub const DEFAULT_LLM: &str = "gpt-4o-2024-11-20";
pub const DEFAULT_EMBEDDING: &str = "text-embedding-3-small";

const DEFAULT_TEMPERATURE: f64 = 0.0;
const DEFAULT_VERBOSITY: u8 = 0;
const DEFAULT_EVIDENCE_K: usize = 10;
const DEFAULT_MAX_SOURCES: usize = 5;
const DEFAULT_CHUNK_SIZE: usize = 5000;

/// Rate limit applied to every model role when tier-1 limits are active.
pub const TIER1_RATE_LIMIT: &str = "30000 per 1 minute";

/// Preset names, in the order clients see them.
pub const PRESET_NAMES: [&str; 6] = [
    "high_quality",
    "fast",
    "wikicrow",
    "contracrow",
    "debug",
    "tier1_limits",
];

// ─── Provider ──────────────────────────────────────────────────────

/// LLM provider whose credential convention applies when no explicit API
/// key is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
    Google,
}

impl Provider {
    /// Environment variable consulted when no explicit key is set. The
    /// variable is only ever read, never written.
    pub fn env_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Google => "GEMINI_API_KEY",
        }
    }
}

// ─── Caller-facing settings ────────────────────────────────────────

/// Caller-provided engine settings.
///
/// Doubles as the parameter struct for `initialize`: unknown parameter
/// names are rejected, anything omitted stays unset and resolves through
/// the preset or the defaults. Snapshots are immutable; [`apply`] returns
/// a new record rather than mutating in place.
///
/// [`apply`]: EngineSettings::apply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Directory of documents to analyze. Required; must exist.
    pub data_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_llm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_llm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sources: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_tier1_limits: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

impl EngineSettings {
    /// Merge a patch into this snapshot, producing the next snapshot.
    /// Fields absent from the patch keep their current value; nullable
    /// fields given as an explicit `null` are cleared.
    pub fn apply(&self, patch: &SettingsPatch) -> EngineSettings {
        let mut next = self.clone();
        if let Some(v) = &patch.data_dir {
            next.data_dir = v.clone();
        }
        if let Some(v) = &patch.llm {
            next.llm = Some(v.clone());
        }
        if let Some(v) = &patch.summary_llm {
            next.summary_llm = Some(v.clone());
        }
        if let Some(v) = &patch.agent_llm {
            next.agent_llm = Some(v.clone());
        }
        if let Some(v) = &patch.embedding {
            next.embedding = Some(v.clone());
        }
        if let Some(v) = patch.temperature {
            next.temperature = Some(v);
        }
        if let Some(v) = patch.verbosity {
            next.verbosity = Some(v);
        }
        if let Some(v) = patch.evidence_k {
            next.evidence_k = Some(v);
        }
        if let Some(v) = patch.max_sources {
            next.max_sources = Some(v);
        }
        if let Some(v) = patch.chunk_size {
            next.chunk_size = Some(v);
        }
        if let Some(v) = patch.use_tier1_limits {
            next.use_tier1_limits = Some(v);
        }
        if let Some(v) = &patch.rate_limit {
            next.rate_limit = v.clone();
        }
        if let Some(v) = &patch.preset {
            next.preset = v.clone();
        }
        if let Some(v) = &patch.index_name {
            next.index_name = v.clone();
        }
        if let Some(v) = &patch.api_key {
            next.api_key = v.clone();
        }
        if let Some(v) = patch.provider {
            next.provider = v;
        }
        next
    }

    /// API key used for engine calls: the explicit setting, else the
    /// provider's environment variable. Checked live so a key exported
    /// after initialization is picked up.
    pub fn resolve_credential(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            env::var(self.provider.unwrap_or_default().env_var())
                .ok()
                .filter(|v| !v.is_empty())
        })
    }

    /// Resolve this snapshot into the profile handed to the engine
    /// factory. Fails when the data directory is missing or the preset
    /// name is unknown.
    pub fn build_profile(&self) -> Result<EngineProfile, ServiceError> {
        if !self.data_dir.exists() {
            return Err(ServiceError::DataDirMissing(self.data_dir.clone()));
        }
        let base = match &self.preset {
            Some(name) => {
                preset_bundle(name).ok_or_else(|| ServiceError::UnknownPreset(name.clone()))?
            }
            None => BASELINE,
        };

        let llm = self.llm.clone().unwrap_or_else(|| base.llm.to_string());
        let summary_llm = self
            .summary_llm
            .clone()
            .unwrap_or_else(|| base.summary_llm.to_string());
        let agent_llm = self
            .agent_llm
            .clone()
            .unwrap_or_else(|| base.agent_llm.to_string());
        let embedding = self
            .embedding
            .clone()
            .unwrap_or_else(|| base.embedding.to_string());

        // Tier-1 limits take precedence over a custom rate limit string;
        // the custom string is keyed by the primary model for every role.
        let use_tier1 = self.use_tier1_limits.unwrap_or(base.tier1_limits);
        let (llm_config, summary_llm_config, agent_llm_config) = if use_tier1 {
            (
                Some(RateLimits::uniform(&llm, TIER1_RATE_LIMIT)),
                Some(RateLimits::uniform(&summary_llm, TIER1_RATE_LIMIT)),
                Some(RateLimits::uniform(&agent_llm, TIER1_RATE_LIMIT)),
            )
        } else if let Some(limit) = &self.rate_limit {
            (
                Some(RateLimits::uniform(&llm, limit)),
                Some(RateLimits::uniform(&llm, limit)),
                Some(RateLimits::uniform(&llm, limit)),
            )
        } else {
            (None, None, None)
        };

        Ok(EngineProfile {
            data_dir: self.data_dir.clone(),
            llm,
            summary_llm,
            embedding,
            temperature: self.temperature.unwrap_or(base.temperature),
            verbosity: self.verbosity.unwrap_or(base.verbosity),
            answer: AnswerProfile {
                evidence_k: self.evidence_k.unwrap_or(base.evidence_k),
                answer_max_sources: self.max_sources.unwrap_or(base.max_sources),
            },
            agent: AgentProfile {
                agent_llm,
                agent_llm_config,
                index: IndexProfile {
                    data_dir: self.data_dir.clone(),
                    name: self.index_name.clone(),
                },
            },
            parsing: ParsingProfile {
                chunk_size: self.chunk_size.unwrap_or(base.chunk_size),
            },
            llm_config,
            summary_llm_config,
            provider: self.provider.unwrap_or_default(),
            credential: self.resolve_credential(),
        })
    }
}

// ─── Settings patch ────────────────────────────────────────────────

/// A typed settings patch for `update_settings`.
///
/// Every field is optional. For the nullable fields, leaving the key out
/// keeps the stored value while an explicit JSON `null` clears it back to
/// its default. Unrecognized keys land in `unknown` and are ignored by
/// the facade (with a warning) instead of failing the call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub data_dir: Option<PathBuf>,
    pub llm: Option<String>,
    pub summary_llm: Option<String>,
    pub agent_llm: Option<String>,
    pub embedding: Option<String>,
    pub temperature: Option<f64>,
    pub verbosity: Option<u8>,
    pub evidence_k: Option<usize>,
    pub max_sources: Option<usize>,
    pub chunk_size: Option<usize>,
    pub use_tier1_limits: Option<bool>,
    #[serde(deserialize_with = "double_option")]
    pub rate_limit: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub preset: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub index_name: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub api_key: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub provider: Option<Option<Provider>>,
    /// Keys that do not name a settings field.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

/// Distinguishes an absent key (`None`) from an explicit `null`
/// (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::deserialize(deserializer).map(Some)
}

// ─── Presets ───────────────────────────────────────────────────────

/// Full field bundle behind a preset name. Explicit caller fields overlay
/// whatever the bundle provides.
#[derive(Debug, Clone, Copy)]
struct Preset {
    llm: &'static str,
    summary_llm: &'static str,
    agent_llm: &'static str,
    embedding: &'static str,
    temperature: f64,
    verbosity: u8,
    evidence_k: usize,
    max_sources: usize,
    chunk_size: usize,
    tier1_limits: bool,
}

const BASELINE: Preset = Preset {
    llm: DEFAULT_LLM,
    summary_llm: DEFAULT_LLM,
    agent_llm: DEFAULT_LLM,
    embedding: DEFAULT_EMBEDDING,
    temperature: DEFAULT_TEMPERATURE,
    verbosity: DEFAULT_VERBOSITY,
    evidence_k: DEFAULT_EVIDENCE_K,
    max_sources: DEFAULT_MAX_SOURCES,
    chunk_size: DEFAULT_CHUNK_SIZE,
    tier1_limits: true,
};

fn preset_bundle(name: &str) -> Option<Preset> {
    match name {
        // Deeper retrieval, more sources cited per answer.
        "high_quality" => Some(Preset {
            evidence_k: 15,
            max_sources: 8,
            ..BASELINE
        }),
        // Cheaper runs: fewer excerpts, smaller chunks.
        "fast" => Some(Preset {
            evidence_k: 5,
            max_sources: 3,
            chunk_size: 3000,
            ..BASELINE
        }),
        // Wide retrieval for article-length summaries.
        "wikicrow" => Some(Preset {
            evidence_k: 25,
            max_sources: 12,
            ..BASELINE
        }),
        // Wide retrieval tuned for contradiction checking.
        "contracrow" => Some(Preset {
            evidence_k: 25,
            max_sources: 10,
            ..BASELINE
        }),
        // Tiny, verbose runs; no rate limiting.
        "debug" => Some(Preset {
            verbosity: 3,
            evidence_k: 2,
            max_sources: 2,
            chunk_size: 1000,
            tier1_limits: false,
            ..BASELINE
        }),
        // The defaults with the tier-1 rate-limit profile pinned on.
        "tier1_limits" => Some(BASELINE),
        _ => None,
    }
}

// ─── Resolved profile ──────────────────────────────────────────────

/// Fully resolved configuration handed to the engine factory. Produced
/// only by [`EngineSettings::build_profile`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineProfile {
    pub data_dir: PathBuf,
    pub llm: String,
    pub summary_llm: String,
    pub embedding: String,
    pub temperature: f64,
    pub verbosity: u8,
    pub answer: AnswerProfile,
    pub agent: AgentProfile,
    pub parsing: ParsingProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<RateLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_llm_config: Option<RateLimits>,
    pub provider: Provider,
    /// Resolved API key. Kept out of serialized output.
    #[serde(skip_serializing)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerProfile {
    pub evidence_k: usize,
    pub answer_max_sources: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentProfile {
    pub agent_llm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_llm_config: Option<RateLimits>,
    pub index: IndexProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexProfile {
    pub data_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsingProfile {
    pub chunk_size: usize,
}

/// Per-model rate limits, keyed by model name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimits {
    pub rate_limit: BTreeMap<String, String>,
}

impl RateLimits {
    fn uniform(model: &str, limit: &str) -> Self {
        let mut rate_limit = BTreeMap::new();
        rate_limit.insert(model.to_string(), limit.to_string());
        RateLimits { rate_limit }
    }
}
