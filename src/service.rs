//! Engine facade — owns the engine instance and the service state
//! machine, and contains engine failures as structured errors.
//!
//! The service starts uninitialized. A successful `initialize` commits an
//! engine together with the settings and profile it was built from;
//! every later rebuild (re-initialize or settings update) goes through
//! the same construct-then-commit path, so a failed rebuild always leaves
//! the previous engine serving.

use serde::Serialize;
use tracing::{info, warn};

use crate::engine::{EngineAnswer, EngineFactory, QaEngine};
use crate::error::{ServiceError, ServiceResult};
use crate::settings::{EngineProfile, EngineSettings, SettingsPatch, PRESET_NAMES};

/// Result payload for `ask`.
#[derive(Debug, Clone, Serialize)]
pub struct AskOutcome {
    pub question: String,
    #[serde(flatten)]
    pub answer: EngineAnswer,
}

/// Service state as reported by `get_status`.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceStatus {
    NotInitialized,
    Initialized {
        /// Final path component of the data directory.
        data_dir: String,
        llm: String,
        embedding: String,
        /// Active preset name, or `"none"`.
        preset: String,
    },
}

/// The document Q&A service behind the RPC methods.
pub struct QaService {
    factory: Box<dyn EngineFactory>,
    state: Option<EngineState>,
}

/// Everything committed by a successful engine construction.
struct EngineState {
    engine: Box<dyn QaEngine>,
    settings: EngineSettings,
    profile: EngineProfile,
}

impl QaService {
    pub fn new(factory: Box<dyn EngineFactory>) -> Self {
        QaService {
            factory,
            state: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Build an engine from the given settings and make it the active
    /// one. On failure the previous engine, if any, stays active.
    pub fn initialize(&mut self, settings: EngineSettings) -> ServiceResult<String> {
        let profile = settings.build_profile()?;
        let engine = self
            .factory
            .construct(&profile)
            .map_err(|e| ServiceError::Engine(e.to_string()))?;

        if self.state.is_some() {
            info!(data_dir = %settings.data_dir.display(), "replacing engine");
        } else {
            info!(data_dir = %settings.data_dir.display(), llm = %profile.llm, "engine initialized");
        }
        self.state = Some(EngineState {
            engine,
            settings,
            profile,
        });
        Ok("Engine initialized successfully".to_string())
    }

    /// Run one question through the engine. Rejected before `initialize`
    /// and when no usable credential is configured.
    pub fn ask(&mut self, question: &str) -> ServiceResult<AskOutcome> {
        let state = self.state.as_mut().ok_or(ServiceError::NotInitialized)?;
        if state.settings.resolve_credential().is_none() {
            return Err(ServiceError::CredentialMissing);
        }

        info!(question_len = question.len(), "running query");
        let answer = state
            .engine
            .query(question)
            .map_err(|e| ServiceError::Engine(e.to_string()))?;
        Ok(AskOutcome {
            question: question.to_string(),
            answer,
        })
    }

    /// Merge a typed patch and rebuild the engine through the same path
    /// as `initialize`. All-or-nothing: a failed rebuild keeps the
    /// previous engine and settings.
    pub fn update_settings(&mut self, patch: SettingsPatch) -> ServiceResult<String> {
        let state = self.state.as_mut().ok_or(ServiceError::NotInitialized)?;
        if !patch.unknown.is_empty() {
            let keys: Vec<&str> = patch.unknown.keys().map(String::as_str).collect();
            warn!(?keys, "ignoring unrecognized settings fields");
        }

        let settings = state.settings.apply(&patch);
        let profile = settings.build_profile()?;
        let engine = self
            .factory
            .construct(&profile)
            .map_err(|e| ServiceError::Engine(e.to_string()))?;

        info!("engine rebuilt with updated settings");
        *state = EngineState {
            engine,
            settings,
            profile,
        };
        Ok("Settings updated successfully".to_string())
    }

    /// The fixed preset list, available in any state.
    pub fn preset_names(&self) -> &'static [&'static str] {
        &PRESET_NAMES
    }

    /// Report the current state. Never fails; callable in any state.
    pub fn status(&self) -> ServiceStatus {
        match &self.state {
            None => ServiceStatus::NotInitialized,
            Some(state) => ServiceStatus::Initialized {
                data_dir: state
                    .settings
                    .data_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| state.settings.data_dir.display().to_string()),
                llm: state.profile.llm.clone(),
                embedding: state.profile.embedding.clone(),
                preset: state
                    .settings
                    .preset
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EvidenceContext;
    use anyhow::bail;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct RecordingEngine {
        queries: Arc<AtomicUsize>,
    }

    impl QaEngine for RecordingEngine {
        fn query(&mut self, question: &str) -> anyhow::Result<EngineAnswer> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(EngineAnswer {
                answer: format!("answer: {}", question),
                formatted_answer: format!("Q: {}", question),
                references: "1. stub.pdf".to_string(),
                contexts: vec![EvidenceContext {
                    context: "excerpt".to_string(),
                    source_name: "stub.pdf".to_string(),
                    score: Some(4.0),
                }],
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingFactory {
        constructs: Arc<AtomicUsize>,
        queries: Arc<AtomicUsize>,
        fail_next: Arc<AtomicBool>,
        last_profile: Arc<Mutex<Option<EngineProfile>>>,
    }

    impl EngineFactory for RecordingFactory {
        fn construct(&self, profile: &EngineProfile) -> anyhow::Result<Box<dyn QaEngine>> {
            if self.fail_next.load(Ordering::SeqCst) {
                bail!("backend exploded");
            }
            self.constructs.fetch_add(1, Ordering::SeqCst);
            *self.last_profile.lock().unwrap() = Some(profile.clone());
            Ok(Box::new(RecordingEngine {
                queries: Arc::clone(&self.queries),
            }))
        }
    }

    fn service_with_factory() -> (QaService, RecordingFactory) {
        let factory = RecordingFactory::default();
        (QaService::new(Box::new(factory.clone())), factory)
    }

    fn settings_for(dir: &std::path::Path) -> EngineSettings {
        EngineSettings {
            data_dir: dir.to_path_buf(),
            api_key: Some("sk-test".to_string()),
            ..EngineSettings::default()
        }
    }

    #[test]
    fn ask_is_rejected_before_initialize() {
        let (mut service, factory) = service_with_factory();

        let err = service.ask("anything").unwrap_err();
        assert!(err.to_string().contains("not initialized"));
        assert_eq!(factory.queries.load(Ordering::SeqCst), 0);
        assert_eq!(service.status(), ServiceStatus::NotInitialized);
    }

    #[test]
    fn update_is_rejected_before_initialize() {
        let (mut service, _factory) = service_with_factory();
        let err = service.update_settings(SettingsPatch::default()).unwrap_err();
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn initialize_commits_engine_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let papers = dir.path().join("papers");
        std::fs::create_dir(&papers).unwrap();
        let (mut service, factory) = service_with_factory();

        let message = service.initialize(settings_for(&papers)).unwrap();
        assert_eq!(message, "Engine initialized successfully");
        assert!(service.is_initialized());
        assert_eq!(factory.constructs.load(Ordering::SeqCst), 1);

        match service.status() {
            ServiceStatus::Initialized {
                data_dir,
                llm,
                preset,
                ..
            } => {
                assert_eq!(data_dir, "papers");
                assert_eq!(llm, crate::settings::DEFAULT_LLM);
                assert_eq!(preset, "none");
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[test]
    fn failed_initialize_leaves_service_uninitialized() {
        let (mut service, factory) = service_with_factory();
        let err = service
            .initialize(settings_for(std::path::Path::new("/no/such/dir")))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(!service.is_initialized());
        assert_eq!(factory.constructs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reinitialize_replaces_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::create_dir(&first).unwrap();
        std::fs::create_dir(&second).unwrap();
        let (mut service, factory) = service_with_factory();

        service.initialize(settings_for(&first)).unwrap();
        service.initialize(settings_for(&second)).unwrap();

        assert_eq!(factory.constructs.load(Ordering::SeqCst), 2);
        match service.status() {
            ServiceStatus::Initialized { data_dir, .. } => assert_eq!(data_dir, "second"),
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[test]
    fn ask_runs_the_engine_and_echoes_the_question() {
        let dir = tempfile::tempdir().unwrap();
        let (mut service, factory) = service_with_factory();
        service.initialize(settings_for(dir.path())).unwrap();

        let outcome = service.ask("What is chunking?").unwrap();
        assert_eq!(outcome.question, "What is chunking?");
        assert_eq!(outcome.answer.contexts[0].source_name, "stub.pdf");
        assert_eq!(factory.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ask_requires_a_credential() {
        let dir = tempfile::tempdir().unwrap();
        let (mut service, factory) = service_with_factory();
        let mut settings = settings_for(dir.path());
        settings.api_key = None;
        // Env var for this provider is not expected in test environments.
        settings.provider = Some(crate::settings::Provider::Google);
        service.initialize(settings).unwrap();

        let err = service.ask("anything").unwrap_err();
        assert_eq!(err.to_string(), "credential not configured");
        assert_eq!(factory.queries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn update_settings_rebuilds_through_the_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let (mut service, factory) = service_with_factory();
        service.initialize(settings_for(dir.path())).unwrap();

        let patch: SettingsPatch = serde_json::from_value(json!({ "temperature": 0.5 })).unwrap();
        let message = service.update_settings(patch).unwrap();
        assert_eq!(message, "Settings updated successfully");
        assert_eq!(factory.constructs.load(Ordering::SeqCst), 2);

        let profile = factory.last_profile.lock().unwrap().clone().unwrap();
        assert_eq!(profile.temperature, 0.5);
        // Fields the patch did not touch keep their values.
        assert_eq!(profile.llm, crate::settings::DEFAULT_LLM);
    }

    #[test]
    fn failed_update_keeps_previous_engine_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        let (mut service, factory) = service_with_factory();
        service.initialize(settings_for(dir.path())).unwrap();

        factory.fail_next.store(true, Ordering::SeqCst);
        let patch: SettingsPatch =
            serde_json::from_value(json!({ "llm": "other-model" })).unwrap();
        let err = service.update_settings(patch).unwrap_err();
        assert!(err.to_string().contains("backend exploded"));

        factory.fail_next.store(false, Ordering::SeqCst);
        match service.status() {
            ServiceStatus::Initialized { llm, .. } => {
                assert_eq!(llm, crate::settings::DEFAULT_LLM);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        // The old engine still answers.
        assert!(service.ask("still alive?").is_ok());
    }

    #[test]
    fn preset_list_is_fixed() {
        let (service, _factory) = service_with_factory();
        assert_eq!(
            service.preset_names(),
            &["high_quality", "fast", "wikicrow", "contracrow", "debug", "tier1_limits"]
        );
    }
}
