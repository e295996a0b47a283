//! Replays a page's bootstrap scripts inside a boa sandbox.
//!
//! Host code talks to sandboxed scripts only through named bridge
//! functions installed as globals before the first script runs. The
//! interpreter lives on its own thread; bridge handlers run on the caller's.

#![cfg_attr(not(feature = "js-sandbox"), allow(dead_code))]

pub mod environment;
pub mod html;
pub mod protocol;
pub mod runner;
pub mod types;
mod log;
mod watchdog;

pub use html::inline_scripts;
pub use protocol::BridgeName;
pub use runner::run;
pub use types::{BridgeArg, BridgeCall, Bridges, RunSummary, SandboxError, SandboxOptions, ScriptId};
