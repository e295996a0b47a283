use tracing::Level;

use crate::types::ScriptId;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SandboxEvent<'a> {
    pub level: Level,
    pub kind: &'a str,
    pub script: Option<ScriptId>,
    pub message: &'a str,
}

impl<'a> SandboxEvent<'a> {
    pub(crate) fn emit(self) {
        let script = self.script.map(|id| id.to_string());
        let script = script.as_deref();
        match self.level {
            Level::TRACE => tracing::event!(
                Level::TRACE,
                sandbox = true,
                kind = self.kind,
                script = script,
                "{message}",
                message = self.message
            ),
            Level::DEBUG => tracing::event!(
                Level::DEBUG,
                sandbox = true,
                kind = self.kind,
                script = script,
                "{message}",
                message = self.message
            ),
            Level::INFO => tracing::event!(
                Level::INFO,
                sandbox = true,
                kind = self.kind,
                script = script,
                "{message}",
                message = self.message
            ),
            Level::WARN => tracing::event!(
                Level::WARN,
                sandbox = true,
                kind = self.kind,
                script = script,
                "{message}",
                message = self.message
            ),
            _ => tracing::event!(
                Level::ERROR,
                sandbox = true,
                kind = self.kind,
                script = script,
                "{message}",
                message = self.message
            ),
        }
    }
}
