//! Persisted forms of a [`SessionSnapshot`].
//!
//! JSON is the readable form. The binary record is a fixed layout:
//!
//! ```text
//! "SSN\0" u16 version
//! str user_id, name, short_name, token, sprinkle_name, sprinkle_value, dyn_token
//! u64 revision, u64 request
//! u32 n, n × (str key, str value)            site data
//! u32 n, n × (str key, str value)            document ids
//! u32 n, n × (str key, u32 m, m × str url)   resources
//! u32 n, n × u32                             feature positions
//! u32 n, n × cookie
//! cookie = str name, value, domain, path, u8 has_expiry, i64 expiry, u8 secure, u8 http_only
//! ```
//!
//! Integers are little-endian; `str` is a `u32` byte length then UTF-8.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::MAX_FEATURE_INDEX_LIMIT;
use crate::state::{Cookie, SessionSnapshot, SessionState};

pub const MAGIC: &[u8; 4] = b"SSN\0";
pub const VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("invalid session JSON")]
    Json(#[from] serde_json::Error),
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a session record")]
    BadMagic,
    #[error("unsupported session record version {0}")]
    UnsupportedVersion(u16),
    #[error("session record truncated at byte {0}")]
    Truncated(usize),
    #[error("invalid UTF-8 in session record at byte {0}")]
    InvalidUtf8(usize),
    #[error("feature position {0} out of range")]
    FeatureOutOfRange(u32),
    #[error("{0} trailing bytes after session record")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistFormat {
    Json,
    Binary,
}

impl PersistFormat {
    /// `.json` files are JSON; anything else is the binary record.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => PersistFormat::Json,
            _ => PersistFormat::Binary,
        }
    }
}

pub fn to_json(snapshot: &SessionSnapshot) -> Result<String, PersistError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn from_json(text: &str) -> Result<SessionSnapshot, PersistError> {
    Ok(serde_json::from_str(text)?)
}

pub fn to_binary(snapshot: &SessionSnapshot) -> Vec<u8> {
    let state = &snapshot.state;
    let mut w = Writer::default();
    w.bytes.extend_from_slice(MAGIC);
    w.u16(VERSION);
    for text in [
        &state.user_id,
        &state.name,
        &state.short_name,
        &state.token,
        &state.sprinkle_name,
        &state.sprinkle_value,
        &state.dyn_token,
    ] {
        w.str(text);
    }
    w.u64(state.revision);
    w.u64(snapshot.request);
    w.pairs(&state.site_data);
    w.pairs(&state.document_ids);
    w.len(state.resources.len());
    for (key, urls) in &state.resources {
        w.str(key);
        w.len(urls.len());
        for url in urls {
            w.str(url);
        }
    }
    let positions: Vec<u32> = state.features.positions().collect();
    w.len(positions.len());
    for position in positions {
        w.u32(position);
    }
    w.len(state.cookies.len());
    for cookie in &state.cookies {
        w.str(&cookie.name);
        w.str(&cookie.value);
        w.str(&cookie.domain);
        w.str(&cookie.path);
        w.u8(u8::from(cookie.expires.is_some()));
        w.i64(cookie.expires.unwrap_or(0));
        w.u8(u8::from(cookie.secure));
        w.u8(u8::from(cookie.http_only));
    }
    w.bytes
}

pub fn from_binary(data: &[u8]) -> Result<SessionSnapshot, PersistError> {
    let mut r = Reader::new(data);
    if r.take(MAGIC.len())? != MAGIC {
        return Err(PersistError::BadMagic);
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(PersistError::UnsupportedVersion(version));
    }
    let mut state = SessionState {
        user_id: r.str()?,
        name: r.str()?,
        short_name: r.str()?,
        token: r.str()?,
        sprinkle_name: r.str()?,
        sprinkle_value: r.str()?,
        dyn_token: r.str()?,
        revision: r.u64()?,
        ..SessionState::default()
    };
    let request = r.u64()?;
    for _ in 0..r.u32()? {
        state.site_data.insert(r.str()?, r.str()?);
    }
    for _ in 0..r.u32()? {
        state.document_ids.insert(r.str()?, r.str()?);
    }
    for _ in 0..r.u32()? {
        let key = r.str()?;
        let mut urls = Vec::new();
        for _ in 0..r.u32()? {
            urls.push(r.str()?);
        }
        state.resources.insert(key, urls);
    }
    for _ in 0..r.u32()? {
        let position = r.u32()?;
        if position > MAX_FEATURE_INDEX_LIMIT {
            return Err(PersistError::FeatureOutOfRange(position));
        }
        state.features.set(position);
    }
    for _ in 0..r.u32()? {
        let name = r.str()?;
        let value = r.str()?;
        let domain = r.str()?;
        let path = r.str()?;
        let has_expiry = r.u8()? != 0;
        let expiry = r.i64()?;
        state.cookies.push(Cookie {
            name,
            value,
            domain,
            path,
            expires: has_expiry.then_some(expiry),
            secure: r.u8()? != 0,
            http_only: r.u8()? != 0,
        });
    }
    if r.remaining() > 0 {
        return Err(PersistError::TrailingBytes(r.remaining()));
    }
    Ok(SessionSnapshot { state, request })
}

#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn len(&mut self, n: usize) {
        // Collections come from script input bounded far below u32::MAX.
        self.u32(u32::try_from(n).unwrap_or(u32::MAX));
    }

    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.bytes.extend_from_slice(s.as_bytes());
    }

    fn pairs<'a>(&mut self, map: impl IntoIterator<Item = (&'a String, &'a String)> + Clone) {
        self.len(map.clone().into_iter().count());
        for (key, value) in map {
            self.str(key);
            self.str(value);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PersistError> {
        if self.remaining() < n {
            return Err(PersistError::Truncated(self.pos));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PersistError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, PersistError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PersistError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, PersistError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, PersistError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, PersistError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn str(&mut self) -> Result<String, PersistError> {
        let len = self.u32()? as usize;
        let start = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PersistError::InvalidUtf8(start))
    }
}
