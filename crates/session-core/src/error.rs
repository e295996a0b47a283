use std::fmt;

use js_bootstrap::SandboxError;
use thiserror::Error;

use crate::persist::PersistError;
use crate::resources::ResourceError;

/// Facts a bootstrap pass cannot do without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiredFact {
    UserData,
    AuthToken,
    SiteData,
    SprinkleName,
    SessionCookie,
}

impl RequiredFact {
    pub fn as_str(self) -> &'static str {
        match self {
            RequiredFact::UserData => "user data",
            RequiredFact::AuthToken => "auth token",
            RequiredFact::SiteData => "site data",
            RequiredFact::SprinkleName => "sprinkle name",
            RequiredFact::SessionCookie => "session cookie",
        }
    }
}

impl fmt::Display for RequiredFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Timeout or fault inside the script sandbox.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("{0} not set by bootstrap scripts")]
    MissingRequiredFact(RequiredFact),
    #[error("session already initialised")]
    AlreadyInitialized,
    #[error("session not initialised")]
    NotInitialized,
    #[error("failed to load resource {url}")]
    Resource {
        url: String,
        #[source]
        source: ResourceError,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl SessionError {
    pub fn is_time_budget_exceeded(&self) -> bool {
        matches!(self, SessionError::Sandbox(SandboxError::TimeBudgetExceeded { .. }))
    }

    pub fn is_script_fault(&self) -> bool {
        matches!(self, SessionError::Sandbox(SandboxError::ScriptFault { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use js_bootstrap::ScriptId;
    use std::time::Duration;

    #[test]
    fn missing_fact_names_the_fact() {
        let err = SessionError::MissingRequiredFact(RequiredFact::UserData);
        assert_eq!(err.to_string(), "user data not set by bootstrap scripts");
    }

    #[test]
    fn sandbox_errors_keep_their_kind() {
        let err = SessionError::from(SandboxError::TimeBudgetExceeded {
            script: ScriptId::Page(2),
            budget: Duration::from_secs(1),
        });
        assert!(err.is_time_budget_exceeded());
        assert!(!err.is_script_fault());
        assert_eq!(err.to_string(), "script #2 exceeded its time budget of 1s");
    }
}
