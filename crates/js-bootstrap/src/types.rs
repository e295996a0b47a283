use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::BridgeName;

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Wall-clock budget for each script, reset between scripts.
    pub script_budget: Duration,
    /// Interpreter instructions between cooperative interrupt checks.
    pub yield_budget: u32,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    /// Per-loop iteration cap. Also ends an abandoned interpreter thread.
    pub loop_iteration_limit: Option<u64>,
    pub max_excerpt_chars: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            script_budget: Duration::from_secs(1),
            yield_budget: 1_024,
            recursion_limit: 256,
            stack_size_limit: 512 * 1024,
            loop_iteration_limit: Some(50_000_000),
            max_excerpt_chars: 240,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptId {
    Prelude,
    Page(usize),
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptId::Prelude => f.write_str("prelude"),
            ScriptId::Page(index) => write!(f, "script #{index}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{script} exceeded its time budget of {budget:?}")]
    TimeBudgetExceeded { script: ScriptId, budget: Duration },
    #[error("{script} raised: {message}")]
    ScriptFault {
        script: ScriptId,
        message: String,
        excerpt: String,
    },
    #[error("failed to install bridge {name}: {message}")]
    BridgeInstall { name: String, message: String },
    #[error("failed to start sandbox thread")]
    Spawn(#[source] std::io::Error),
    #[error("sandbox thread stopped unexpectedly")]
    Crashed,
    #[error("script sandbox not compiled in")]
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub scripts_executed: usize,
    pub bridge_calls: usize,
    pub elapsed: Duration,
}

/// One argument of a bridge call, coerced both ways up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeArg {
    pub text: String,
    pub integer: i64,
}

impl BridgeArg {
    pub fn undefined() -> Self {
        Self {
            text: "undefined".into(),
            integer: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeCall<'a> {
    name: &'a str,
    args: Vec<BridgeArg>,
}

impl<'a> BridgeCall<'a> {
    pub fn new(name: &'a str, args: Vec<BridgeArg>) -> Self {
        Self { name, args }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn args(&self) -> &[BridgeArg] {
        &self.args
    }

    /// String form of argument `index`; missing arguments read as `undefined`.
    pub fn text(&self, index: usize) -> &str {
        self.args.get(index).map_or("undefined", |arg| arg.text.as_str())
    }

    /// Integer form of argument `index`; non-numbers read as 0.
    pub fn integer(&self, index: usize) -> i64 {
        self.args.get(index).map_or(0, |arg| arg.integer)
    }
}

pub type BridgeHandler = Box<dyn FnMut(&BridgeCall<'_>)>;

/// Host callbacks to expose as sandbox globals, by name.
#[derive(Default)]
pub struct Bridges {
    entries: Vec<(String, BridgeHandler)>,
}

impl Bridges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the callback installed under `name`.
    pub fn insert<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&BridgeCall<'_>) + 'static,
    {
        let name = name.into();
        self.entries.retain(|(existing, _)| *existing != name);
        self.entries.push((name, Box::new(handler)));
        self
    }

    pub fn insert_protocol<F>(&mut self, name: BridgeName, handler: F) -> &mut Self
    where
        F: FnMut(&BridgeCall<'_>) + 'static,
    {
        self.insert(name.as_str(), handler)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, BridgeHandler)> {
        self.entries
    }
}

impl fmt::Debug for Bridges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_arguments_read_as_undefined() {
        let call = BridgeCall::new(
            "setUserData",
            vec![BridgeArg {
                text: "42".into(),
                integer: 42,
            }],
        );
        assert_eq!(call.text(0), "42");
        assert_eq!(call.integer(0), 42);
        assert_eq!(call.text(2), "undefined");
        assert_eq!(call.integer(2), 0);
    }

    #[test]
    fn insert_replaces_existing_name() {
        let mut bridges = Bridges::new();
        bridges.insert("setAuthToken", |_| {});
        bridges.insert_protocol(BridgeName::SetAuthToken, |_| {});
        bridges.insert("other", |_| {});
        assert_eq!(bridges.len(), 2);
        assert_eq!(bridges.names().collect::<Vec<_>>(), vec!["setAuthToken", "other"]);
    }

    #[test]
    fn script_ids_render_for_diagnostics() {
        assert_eq!(ScriptId::Prelude.to_string(), "prelude");
        assert_eq!(ScriptId::Page(3).to_string(), "script #3");
    }
}
