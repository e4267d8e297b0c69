// ABOUTME: Chat-bridge surface for driving coding-agent CLIs through a uniform event protocol.
// ABOUTME: Engine discovery, configuration validation, and interface-only collaborator seams.

pub mod backends;
pub mod bridge;
pub mod config;
pub mod engines;

pub use backends::{EngineBackend, SetupIssue};
pub use config::{ConfigError, EngineConfig};

// Re-export runner-core types for convenient access
pub use takopi_runner::{
    Action, ActionEvent, ActionKind, ActionLevel, ActionPhase, CompletedEvent, EngineId,
    EventStream, ResumeToken, Runner, RunnerError, SessionLocks, StartedEvent, TakopiEvent,
};
