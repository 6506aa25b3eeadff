//! Daemon module — the RPC shell around the analysis service.
//!
//! The server keeps one lazily-configured engine in memory behind the
//! facade and serves method calls over a local TCP socket, so the
//! desktop client pays engine startup cost once instead of per request.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           lectern server                │
//! │  - engine facade (one engine in memory) │
//! │  - method dispatch table                │
//! │  - TCP transport loop                   │
//! └─────────────────────────────────────────┘
//!           ▲
//!           │ host:port, one JSON line per
//!           │ request and per reply
//!           ▼
//! ┌─────────────────────────────────────────┐
//! │           desktop client / CLI          │
//! │  - connects to the server               │
//! │  - sends JSON requests                  │
//! │  - receives JSON responses              │
//! └─────────────────────────────────────────┘
//! ```

pub mod dispatch;
pub mod protocol;
pub mod server;

pub use protocol::{Request, Response};
pub use server::{send_request, RpcServer};
