//! Session bootstrap and state for the messaging client.
//!
//! A [`Session`] is populated once by replaying the service's page scripts
//! through [`js_bootstrap`], after which it only hands out request
//! parameters and persisted snapshots.

pub mod config;
pub mod error;
pub mod extraction;
pub mod persist;
pub mod resources;
pub mod session;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{RequiredFact, SessionError};
pub use extraction::ExtractionLog;
pub use persist::{PersistError, PersistFormat};
pub use resources::{DirResources, NoResources, ResourceError, ResourceLoader, StaticResources};
pub use session::{extract_session_cookie, to_base36, BootstrapOptions, Session};
pub use state::{Cookie, SessionSnapshot, SessionState};
