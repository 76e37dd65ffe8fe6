//! # hoster-dl
//!
//! Per-task execution engine for one-click-hoster download managers.
//!
//! ## Design Philosophy
//!
//! hoster-dl is designed to be:
//! - **Site-agnostic** - Hoster adapters implement one trait, the engine does the rest
//! - **Cooperative** - Waits and captcha polls race the task's abort flag
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! Every step of a download attempt returns [`Outcome<T>`]; the `Err` side is a
//! [`Signal`] (abort, fail, reconnect, retry, skip) that the [`Engine`] turns into
//! the task's terminal [`Status`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use hoster_dl::{
//!     Config, DownloadRequest, Engine, FetchRequest, Hoster, Outcome, Package,
//!     PluginExecution, Signal, Task, TaskId,
//! };
//!
//! struct ExampleHoster;
//!
//! #[async_trait]
//! impl Hoster for ExampleHoster {
//!     async fn process(&mut self, exec: &mut PluginExecution) -> Outcome<()> {
//!         let url = exec.task().url().to_string();
//!         let page = exec.load(&url, &FetchRequest::default()).await?;
//!         if page.contains("File not found") {
//!             return Err(Signal::offline());
//!         }
//!         exec.set_wait(30, false).await;
//!         exec.wait().await?;
//!         exec.download(&format!("{}/get", url), DownloadRequest::default()).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let package = Package {
//!         id: 1,
//!         folder: "example".to_string(),
//!         password: None,
//!     };
//!     let task = Task::new(
//!         TaskId(1),
//!         "https://hoster.example.com/f/abc",
//!         "file.bin",
//!         "ExampleHoster",
//!         package,
//!     );
//!     let outcome = engine.run(task, &mut ExampleHoster).await;
//!     println!("Outcome: {:?}", outcome);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Account selection and login
pub mod account;
/// Captcha tasks, solvers and the default broker
pub mod captcha;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Engine and task lifecycle driver (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Per-attempt execution context
pub mod execution;
/// Site adapter trait
pub mod hoster;
/// Shared reconnect signal
pub mod reconnect;
/// Live task registry
pub mod registry;
/// Control signals of a download attempt
pub mod signal;
/// Shared task handle
pub mod task;
/// HTTP transport
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Wait controller
pub mod wait;

// Re-export commonly used types
pub use account::{Account, AccountData, AccountPool, LoginBackend, LoginInfo};
pub use captcha::{
    CaptchaBroker, CaptchaHandler, CaptchaManager, CaptchaResult, CaptchaStatus, CaptchaTask,
    OcrEngine, OcrRegistry, ResultKind,
};
pub use config::Config;
pub use db::{Database, DuplicateIndex, DuplicateRecord, FileRecord};
pub use engine::Engine;
pub use error::{DatabaseError, Error, Result, TransportError};
pub use execution::{
    AccountBinding, CaptchaRequest, CheckMatch, CheckOptions, DownloadRequest, PluginExecution,
    Rule, Rules,
};
pub use hoster::Hoster;
pub use reconnect::ReconnectSignal;
pub use registry::TaskRegistry;
pub use signal::{Failure, Outcome, Signal, SkipInfo};
pub use task::Task;
pub use transport::{
    FetchRequest, FetchResponse, HttpTransport, HttpTransportFactory, PageHeaders,
    TransferOutcome, TransferRequest, Transport, TransportFactory,
};
pub use types::{ChecksumResult, Event, Package, Status, TaskId};
pub use wait::WaitController;
