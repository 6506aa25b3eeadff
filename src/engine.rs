//! The engine seam — the traits an analysis engine plugs into, and the
//! result types it returns. The service never looks inside the engine;
//! everything it needs crosses these two traits.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::settings::EngineProfile;

/// One retrieved evidence excerpt backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceContext {
    pub context: String,
    pub source_name: String,
    /// Relevance score; engines that do not score evidence report `null`.
    pub score: Option<f64>,
}

/// Engine output for a single question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineAnswer {
    pub answer: String,
    pub formatted_answer: String,
    pub references: String,
    pub contexts: Vec<EvidenceContext>,
}

/// A configured analysis engine. Instances are built by an
/// [`EngineFactory`] and queried from exactly one thread at a time.
pub trait QaEngine: Send {
    fn query(&mut self, question: &str) -> Result<EngineAnswer>;
}

/// Builds engines from resolved profiles. Runs on every `initialize` and
/// every settings update; when it fails, the caller keeps the previous
/// engine.
pub trait EngineFactory: Send {
    fn construct(&self, profile: &EngineProfile) -> Result<Box<dyn QaEngine>>;
}

/// Factory for builds with no real engine backend wired in. Construction
/// succeeds so the service can be driven end to end; queries return a
/// structured error instead.
pub struct PlaceholderFactory;

impl EngineFactory for PlaceholderFactory {
    fn construct(&self, profile: &EngineProfile) -> Result<Box<dyn QaEngine>> {
        warn!(
            llm = %profile.llm,
            data_dir = %profile.data_dir.display(),
            "no engine backend wired; ask will return errors"
        );
        Ok(Box::new(PlaceholderEngine))
    }
}

/// Engine counterpart to [`PlaceholderFactory`].
pub struct PlaceholderEngine;

impl QaEngine for PlaceholderEngine {
    fn query(&mut self, _question: &str) -> Result<EngineAnswer> {
        bail!("no analysis engine backend is wired into this build")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EngineSettings;

    #[test]
    fn placeholder_constructs_but_does_not_answer() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            data_dir: dir.path().to_path_buf(),
            ..EngineSettings::default()
        };
        let profile = settings.build_profile().unwrap();

        let mut engine = PlaceholderFactory.construct(&profile).unwrap();
        let err = engine.query("anything").unwrap_err();
        assert!(err.to_string().contains("no analysis engine backend"));
    }

    #[test]
    fn evidence_score_serializes_as_null_when_absent() {
        let ctx = EvidenceContext {
            context: "excerpt".to_string(),
            source_name: "paper.pdf".to_string(),
            score: None,
        };
        let value = serde_json::to_value(&ctx).unwrap();
        assert!(value.get("score").unwrap().is_null());
    }
}
