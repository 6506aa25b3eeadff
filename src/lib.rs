//! # Lectern
//!
//! Document Q&A analysis service behind a local JSON-RPC socket.
//!
//! Lectern keeps one lazily-configured analysis engine alive in a
//! long-lived process, so a desktop client can ask questions against a
//! document collection without paying engine startup cost per request.
//!
//! ## Key Features
//!
//! - **One engine, many questions**: the engine is built once from
//!   settings and swapped atomically on reconfiguration
//! - **Line-delimited JSON-RPC**: one request line, exactly one reply
//!   line, over a plain TCP socket
//! - **Cooperative lifecycle**: background or foreground loop, polled
//!   stop flag, signal-driven teardown that finishes in-flight work
//! - **Pluggable backend**: the engine sits behind a narrow trait pair;
//!   builds without a backend still run end to end
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lectern::{PlaceholderFactory, QaService, RpcServer, ServerConfig};
//!
//! // Wire a service and serve it on the default endpoint
//! let service = QaService::new(Box::new(PlaceholderFactory));
//! let mut server = RpcServer::bind(ServerConfig::default(), service).unwrap();
//! server.install_signal_handlers().unwrap();
//! server.run().unwrap();
//! ```

pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod service;
pub mod settings;

// Re-exports for convenience
pub use error::{ServiceError, ServiceResult};

pub use config::ServerConfig;
pub use daemon::protocol::{Request, Response};
pub use daemon::server::{send_request, RpcServer};
pub use engine::{
    EngineAnswer, EngineFactory, EvidenceContext, PlaceholderFactory, QaEngine,
};
pub use service::{AskOutcome, QaService, ServiceStatus};
pub use settings::{
    EngineProfile, EngineSettings, Provider, SettingsPatch, DEFAULT_LLM, PRESET_NAMES,
};
