pub mod builtins;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod init;
pub mod script;

// Re-export main types
pub use dispatch::{DispatchAction, DispatchHooks, DispatchRequest, Dispatcher, PeerConnection, PeerRole};
pub use script::{RuntimeBuilder, ScriptError, ScriptResult, ScriptRuntime, Variables};

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions};
