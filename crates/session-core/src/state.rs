use std::collections::BTreeMap;

use dyn_codec::Bitmap;
use serde::{Deserialize, Serialize};

use crate::error::RequiredFact;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix seconds; `None` for a session cookie.
    pub expires: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
}

/// Facts harvested by a bootstrap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub user_id: String,
    pub name: String,
    pub short_name: String,
    pub token: String,
    pub sprinkle_name: String,
    pub sprinkle_value: String,
    /// Encoded `features`, sent as `__dyn`.
    pub dyn_token: String,
    pub revision: u64,
    pub site_data: BTreeMap<String, String>,
    pub document_ids: BTreeMap<String, String>,
    pub resources: BTreeMap<String, Vec<String>>,
    pub features: Bitmap,
    pub cookies: Vec<Cookie>,
}

impl SessionState {
    /// Adds `cookie`, replacing any cookie with the same name, domain and path.
    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookies.retain(|existing| {
            existing.name != cookie.name
                || existing.domain != cookie.domain
                || existing.path != cookie.path
        });
        self.cookies.push(cookie);
    }

    /// First required fact that is absent, in bootstrap order.
    ///
    /// Site data always holds entries once reported, so an empty map means
    /// it never was.
    pub fn missing_fact(&self) -> Option<RequiredFact> {
        if self.user_id.is_empty() {
            Some(RequiredFact::UserData)
        } else if self.token.is_empty() {
            Some(RequiredFact::AuthToken)
        } else if self.site_data.is_empty() {
            Some(RequiredFact::SiteData)
        } else if self.sprinkle_name.is_empty() {
            Some(RequiredFact::SprinkleName)
        } else {
            None
        }
    }
}

/// Consistent copy of a session's state and request counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub state: SessionState,
    pub request: u64,
}
