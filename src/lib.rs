//! # sponsor-catcher
//!
//! Watch a sold-out catalog item and book it the moment it becomes available.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sponsor_catcher::{start_run, Config, EokaSession, EventSink};
//!
//! # #[tokio::main]
//! # async fn main() -> sponsor_catcher::Result<()> {
//! let config = Config::load("configs/example.yaml")?;
//! let session = EokaSession::launch(&config.browser).await?;
//! let (events, _rx) = EventSink::channel();
//! let run = start_run(config.run_config(), session, events);
//! let (state, session) = run.finish().await?;
//! println!("Run ended: {}", state);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod session;
pub mod steps;
pub mod watcher;
pub mod workflow;

pub use config::{BrowserConfig, Config, NotifyConfig, ParamDef, Params};
pub use events::{Event, EventLevel, EventSink};
pub use model::{
    AbortReason, AvailabilityState, BookingResult, Credentials, PaymentDetails, PaymentField,
    RunConfig, RunState, SearchSpec, SiteConfig, Step, Timeouts,
};
pub use notify::{Notifier, SmtpNotifier};
pub use orchestrator::{start_run, Orchestrator, RunHandle, StartedRun};
pub use session::browser::EokaSession;
pub use session::{Element, ElementHandle, RemoteSession, SessionError};
pub use steps::{StepError, SubmitFailure};
pub use watcher::{AvailabilityWatcher, EdgeDetector, WatchOutcome};
pub use workflow::BookingWorkflow;

/// Result type for sponsor-catcher operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised outside the booking steps: loading config, driving the browser, alerts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("run task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
