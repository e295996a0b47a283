use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use js_bootstrap::protocol::{LOGIN_PASS, PAGE_PASS, RESOURCE_PASS};
use js_bootstrap::{inline_scripts, SandboxOptions};
use tracing::{debug, info};

use crate::error::{RequiredFact, SessionError};
use crate::extraction::{bridges_for, ExtractionLog};
use crate::persist::{self, PersistError, PersistFormat};
use crate::resources::ResourceLoader;
use crate::state::{Cookie, SessionSnapshot, SessionState};

pub const CLIENT_REVISION: u64 = 3_822_019;
pub const DEFAULT_MAX_FEATURE_INDEX: u32 = (1 << 20) - 1;
const SESSION_COOKIE_NAME: &str = "datr";
const SESSION_COOKIE_LIFETIME: Duration = Duration::from_secs(48 * 60 * 60);

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub sandbox: SandboxOptions,
    /// Client revision sent as `__rev`.
    pub revision: u64,
    /// Form key carrying the auth token.
    pub auth_token_param: String,
    pub max_feature_index: u32,
    pub cookie_domain: String,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            sandbox: SandboxOptions::default(),
            revision: CLIENT_REVISION,
            auth_token_param: "fb_dtsg".into(),
            max_feature_index: DEFAULT_MAX_FEATURE_INDEX,
            cookie_domain: "www.messenger.com".into(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    /// Parameter key for the auth token, fixed at bootstrap time.
    auth_token_param: String,
    initialized: bool,
}

/// A client session: populated once, then read-mostly.
///
/// The state sits behind a read-write lock; the request counter is a
/// separate atomic so concurrent requests never contend on the lock.
#[derive(Debug, Default)]
pub struct Session {
    inner: RwLock<Inner>,
    request: AtomicU64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.read().initialized
    }

    /// Attaches a cookie, before or after bootstrap.
    pub fn add_cookie(&self, cookie: Cookie) {
        self.write().state.set_cookie(cookie);
    }

    /// Runs the page pass, validates it, runs the resource pass and commits.
    ///
    /// Nothing becomes visible unless every step succeeds.
    pub fn bootstrap(
        &self,
        page_html: &str,
        loader: &dyn ResourceLoader,
        options: &BootstrapOptions,
    ) -> Result<(), SessionError> {
        if self.is_initialized() {
            return Err(SessionError::AlreadyInitialized);
        }

        let page = Rc::new(RefCell::new(ExtractionLog::new(options.max_feature_index)));
        let scripts = inline_scripts(page_html);
        debug!(scripts = scripts.len(), "running page pass");
        js_bootstrap::run(bridges_for(&page, PAGE_PASS), scripts, &options.sandbox)?;
        if let Some(fact) = page.borrow().missing_fact() {
            return Err(SessionError::MissingRequiredFact(fact));
        }

        let bodies = {
            let page = page.borrow();
            let mut bodies = Vec::new();
            for url in page.resource_urls() {
                let body = loader.load(url).map_err(|source| SessionError::Resource {
                    url: url.to_string(),
                    source,
                })?;
                bodies.push(body);
            }
            bodies
        };
        let resources = Rc::new(RefCell::new(ExtractionLog::new(options.max_feature_index)));
        debug!(scripts = bodies.len(), "running resource pass");
        js_bootstrap::run(bridges_for(&resources, RESOURCE_PASS), bodies, &options.sandbox)?;

        let page = page.take();
        let document_ids = resources.take().document_ids;
        let dyn_token = dyn_codec::encode(&page.features).into_string();
        let mut inner = self.write();
        if inner.initialized {
            return Err(SessionError::AlreadyInitialized);
        }
        let cookies = std::mem::take(&mut inner.state.cookies);
        inner.state = SessionState {
            sprinkle_value: sprinkle_value(&page.token),
            user_id: page.user_id,
            name: page.name,
            short_name: page.short_name,
            token: page.token,
            sprinkle_name: page.sprinkle_name,
            dyn_token,
            revision: options.revision,
            site_data: page.site_data,
            document_ids,
            resources: page.resources,
            features: page.features,
            cookies,
        };
        inner.auth_token_param = options.auth_token_param.clone();
        inner.initialized = true;
        self.request.store(0, Ordering::SeqCst);
        info!(
            user = %inner.state.user_id,
            features = inner.state.features.len(),
            document_ids = inner.state.document_ids.len(),
            "session bootstrap committed"
        );
        Ok(())
    }

    /// Claims the next request number; the first claim after bootstrap is 1.
    pub fn next_request(&self) -> u64 {
        self.request.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last request number handed out.
    pub fn request_count(&self) -> u64 {
        self.request.load(Ordering::SeqCst)
    }

    /// Form parameters for one outgoing request.
    ///
    /// Session parameters override caller values with the same key and each
    /// call consumes one request number.
    pub fn request_params<I, K, V>(&self, extra: I) -> Result<BTreeMap<String, String>, SessionError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let inner = self.read();
        if !inner.initialized {
            return Err(SessionError::NotInitialized);
        }
        let state = &inner.state;
        let mut params: BTreeMap<String, String> =
            extra.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        params.insert("__a".into(), "1".into());
        params.insert("__rev".into(), state.revision.to_string());
        params.insert("__user".into(), state.user_id.clone());
        params.insert(inner.auth_token_param.clone(), state.token.clone());
        for (key, value) in &state.site_data {
            params.insert(key.clone(), value.clone());
        }
        params.insert(state.sprinkle_name.clone(), state.sprinkle_value.clone());
        params.insert("__dyn".into(), state.dyn_token.clone());
        params.insert("__req".into(), to_base36(self.next_request()));
        Ok(params)
    }

    /// Copy of the state and counter taken under one read lock.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.read();
        SessionSnapshot {
            state: inner.state.clone(),
            request: self.request.load(Ordering::SeqCst),
        }
    }

    /// Populates an empty session from `snapshot`.
    pub fn restore(&self, snapshot: SessionSnapshot) -> Result<(), SessionError> {
        self.restore_with(snapshot, &BootstrapOptions::default().auth_token_param)
    }

    /// Populates an empty session from `snapshot`, sending the token under
    /// `auth_token_param`. A snapshot lacking a required fact is rejected
    /// and the session stays empty.
    pub fn restore_with(
        &self,
        snapshot: SessionSnapshot,
        auth_token_param: &str,
    ) -> Result<(), SessionError> {
        let mut inner = self.write();
        if inner.initialized {
            return Err(SessionError::AlreadyInitialized);
        }
        if let Some(fact) = snapshot.state.missing_fact() {
            return Err(SessionError::MissingRequiredFact(fact));
        }
        inner.state = snapshot.state;
        inner.auth_token_param = auth_token_param.to_string();
        inner.initialized = true;
        self.request.store(snapshot.request, Ordering::SeqCst);
        debug!(request = snapshot.request, "session restored");
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(persist::to_json(&self.snapshot())?)
    }

    pub fn restore_json(&self, text: &str) -> Result<(), SessionError> {
        self.ensure_empty()?;
        self.restore(persist::from_json(text)?)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        persist::to_binary(&self.snapshot())
    }

    pub fn restore_binary(&self, data: &[u8]) -> Result<(), SessionError> {
        self.ensure_empty()?;
        self.restore(persist::from_binary(data)?)
    }

    pub fn save(&self, path: &Path, format: PersistFormat) -> Result<(), SessionError> {
        let bytes = match format {
            PersistFormat::Json => self.to_json()?.into_bytes(),
            PersistFormat::Binary => self.to_binary(),
        };
        fs::write(path, bytes).map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Restores from `path`, picking the format from its extension.
    pub fn restore_file(&self, path: &Path) -> Result<(), SessionError> {
        self.restore_file_with(path, &BootstrapOptions::default().auth_token_param)
    }

    pub fn restore_file_with(&self, path: &Path, auth_token_param: &str) -> Result<(), SessionError> {
        self.ensure_empty()?;
        let data = fs::read(path).map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot = match PersistFormat::from_path(path) {
            PersistFormat::Json => {
                let text = String::from_utf8(data)
                    .map_err(|err| PersistError::InvalidUtf8(err.utf8_error().valid_up_to()))?;
                persist::from_json(&text)?
            }
            PersistFormat::Binary => persist::from_binary(&data)?,
        };
        self.restore_with(snapshot, auth_token_param)
    }

    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let session = Session::new();
        session.restore_file(path)?;
        Ok(session)
    }

    fn ensure_empty(&self) -> Result<(), SessionError> {
        if self.is_initialized() {
            Err(SessionError::AlreadyInitialized)
        } else {
            Ok(())
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs the login page's scripts and returns the `datr` cookie they set.
pub fn extract_session_cookie(
    login_html: &str,
    options: &BootstrapOptions,
) -> Result<Cookie, SessionError> {
    let log = Rc::new(RefCell::new(ExtractionLog::new(options.max_feature_index)));
    js_bootstrap::run(bridges_for(&log, LOGIN_PASS), inline_scripts(login_html), &options.sandbox)?;
    let value = log
        .borrow_mut()
        .session_cookie
        .take()
        .ok_or(SessionError::MissingRequiredFact(RequiredFact::SessionCookie))?;
    let expires = SystemTime::now()
        .checked_add(SESSION_COOKIE_LIFETIME)
        .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
        .map(|since| since.as_secs() as i64);
    Ok(Cookie {
        name: SESSION_COOKIE_NAME.into(),
        value,
        domain: options.cookie_domain.clone(),
        path: "/".into(),
        expires,
        secure: true,
        http_only: true,
    })
}

/// `'2'` followed by the decimal code point of every token character.
pub fn sprinkle_value(token: &str) -> String {
    let mut out = String::with_capacity(token.len() * 3 + 1);
    out.push('2');
    for ch in token.chars() {
        out.push_str(&u32::from(ch).to_string());
    }
    out
}

pub fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn populated() -> SessionSnapshot {
        let mut state = SessionState {
            user_id: "100004".into(),
            token: "AZ".into(),
            sprinkle_name: "jazoest".into(),
            sprinkle_value: sprinkle_value("AZ"),
            dyn_token: "Jc".into(),
            revision: CLIENT_REVISION,
            ..SessionState::default()
        };
        state.site_data.insert("__hs".into(), "19.HYP".into());
        state.site_data.insert("__spin_r".into(), "1001".into());
        SessionSnapshot { state, request: 0 }
    }

    #[test]
    fn base36_matches_reference_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(1), "1");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1295), "zz");
        assert_eq!(to_base36(u64::MAX), "3w5e11264sgsf");
    }

    #[test]
    fn sprinkle_value_spells_code_points() {
        assert_eq!(sprinkle_value("AZ"), "26590");
        assert_eq!(sprinkle_value(""), "2");
        assert_eq!(sprinkle_value("é"), "2233");
    }

    #[test]
    fn request_params_merge_and_count() {
        let session = Session::new();
        session.restore(populated()).unwrap();
        let first = session
            .request_params([("doc_id", "77"), ("__user", "spoofed")])
            .unwrap();
        assert_eq!(first["__req"], "1");
        assert_eq!(first["__user"], "100004");
        assert_eq!(first["doc_id"], "77");
        assert_eq!(first["__a"], "1");
        assert_eq!(first["__rev"], "3822019");
        assert_eq!(first["fb_dtsg"], "AZ");
        assert_eq!(first["jazoest"], "26590");
        assert_eq!(first["__hs"], "19.HYP");
        assert_eq!(first["__spin_r"], "1001");
        assert_eq!(first["__dyn"], "Jc");
        let second = session.request_params(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(second["__req"], "2");
    }

    #[test]
    fn request_params_need_initialized_session() {
        let session = Session::new();
        assert!(matches!(
            session.request_params(Vec::<(String, String)>::new()),
            Err(SessionError::NotInitialized)
        ));
    }

    #[test]
    fn counter_is_distinct_across_threads() {
        let session = Arc::new(Session::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = Arc::clone(&session);
            handles.push(thread::spawn(move || {
                (0..250).map(|_| session.next_request()).collect::<Vec<_>>()
            }));
        }
        let mut seen: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 2000);
        assert_eq!(seen.first(), Some(&1));
        assert_eq!(seen.last(), Some(&2000));
        assert_eq!(session.request_count(), 2000);
    }

    #[test]
    fn restore_continues_counter() {
        let session = Session::new();
        let mut snapshot = populated();
        snapshot.request = 35;
        session.restore(snapshot).unwrap();
        assert_eq!(session.next_request(), 36);
        assert_eq!(session.snapshot().request, 36);
    }

    #[test]
    fn restore_rejects_initialized_session() {
        let session = Session::new();
        session.restore(populated()).unwrap();
        let before = session.snapshot();
        let mut other = populated();
        other.state.user_id = "other".into();
        assert!(matches!(session.restore(other), Err(SessionError::AlreadyInitialized)));
        assert!(matches!(
            session.restore_json("not even json"),
            Err(SessionError::AlreadyInitialized)
        ));
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn restore_requires_every_fact() {
        let session = Session::new();
        let mut snapshot = populated();
        snapshot.state.sprinkle_name.clear();
        assert!(matches!(
            session.restore(snapshot),
            Err(SessionError::MissingRequiredFact(RequiredFact::SprinkleName))
        ));

        let mut snapshot = populated();
        snapshot.state.user_id.clear();
        snapshot.state.token.clear();
        assert!(matches!(
            session.restore_json(&persist::to_json(&snapshot).unwrap()),
            Err(SessionError::MissingRequiredFact(RequiredFact::UserData))
        ));
        assert!(!session.is_initialized());
        assert_eq!(session.snapshot(), SessionSnapshot::default());

        session.restore(populated()).unwrap();
        assert!(session.is_initialized());
    }

    #[test]
    fn restore_file_with_keeps_token_param() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        fs::write(&path, persist::to_binary(&populated())).unwrap();
        let session = Session::new();
        session.restore_file_with(&path, "lsd").unwrap();
        let params = session.request_params(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(params["lsd"], "AZ");
        assert!(!params.contains_key("fb_dtsg"));
    }

    #[test]
    fn cookies_can_be_added_before_bootstrap() {
        let session = Session::new();
        session.add_cookie(Cookie {
            name: "datr".into(),
            ..Cookie::default()
        });
        assert_eq!(session.snapshot().state.cookies.len(), 1);
        assert!(!session.is_initialized());
    }
}
