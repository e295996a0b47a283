use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

const MAX_RESOURCE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("no such resource")]
    NotFound,
    #[error("resource url has no usable file name")]
    BadUrl,
    #[error("resource {path} exceeds {limit} bytes")]
    TooLarge { path: PathBuf, limit: u64 },
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Fetches script resources named by `setResource` calls.
pub trait ResourceLoader {
    fn load(&self, url: &str) -> Result<String, ResourceError>;
}

/// Loader for sessions whose pages report no resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResources;

impl ResourceLoader for NoResources {
    fn load(&self, _url: &str) -> Result<String, ResourceError> {
        Err(ResourceError::NotFound)
    }
}

/// In-memory url → body map.
#[derive(Debug, Default, Clone)]
pub struct StaticResources {
    bodies: HashMap<String, String>,
}

impl StaticResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) -> &mut Self {
        self.bodies.insert(url.into(), body.into());
        self
    }
}

impl ResourceLoader for StaticResources {
    fn load(&self, url: &str) -> Result<String, ResourceError> {
        self.bodies.get(url).cloned().ok_or(ResourceError::NotFound)
    }
}

/// Serves each url from `<root>/<last path segment>`.
#[derive(Debug, Clone)]
pub struct DirResources {
    root: PathBuf,
}

impl DirResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, url: &str) -> Result<PathBuf, ResourceError> {
        let name = file_name(url).ok_or(ResourceError::BadUrl)?;
        Ok(self.root.join(name))
    }
}

impl ResourceLoader for DirResources {
    fn load(&self, url: &str) -> Result<String, ResourceError> {
        let path = self.path_for(url)?;
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(ResourceError::NotFound),
            Err(source) => return Err(ResourceError::Io { path, source }),
        };
        if meta.len() > MAX_RESOURCE_BYTES {
            return Err(ResourceError::TooLarge {
                path,
                limit: MAX_RESOURCE_BYTES,
            });
        }
        debug!(url, path = %path.display(), "loading resource from disk");
        fs::read_to_string(&path).map_err(|source| ResourceError::Io { path, source })
    }
}

/// Final path segment of `url` with query and fragment removed.
fn file_name(url: &str) -> Option<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let name = url[..end].rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        None
    } else {
        Some(name)
    }
}
