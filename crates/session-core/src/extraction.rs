//! Host side of the bridge vocabulary.
//!
//! Every pass gets its own [`ExtractionLog`] behind an `Rc<RefCell<..>>`;
//! the bridge closures built by [`bridges_for`] hold clones of that handle
//! and write into it as the scripts call out.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::Rc;

use dyn_codec::Bitmap;
use js_bootstrap::{BridgeCall, BridgeName, Bridges};
use tracing::{debug, warn};

use crate::error::RequiredFact;

/// Everything the scripts reported during one pass, stored verbatim.
#[derive(Debug, Clone, Default)]
pub struct ExtractionLog {
    seen: BTreeSet<BridgeName>,
    max_feature_index: u32,
    pub user_id: String,
    pub name: String,
    pub short_name: String,
    pub token: String,
    pub sprinkle_name: String,
    pub site_data: BTreeMap<String, String>,
    pub features: Bitmap,
    pub resources: BTreeMap<String, Vec<String>>,
    pub document_ids: BTreeMap<String, String>,
    pub session_cookie: Option<String>,
}

impl ExtractionLog {
    pub fn new(max_feature_index: u32) -> Self {
        Self {
            max_feature_index,
            ..Self::default()
        }
    }

    pub fn called(&self, bridge: BridgeName) -> bool {
        self.seen.contains(&bridge)
    }

    pub fn record(&mut self, bridge: BridgeName, call: &BridgeCall<'_>) {
        self.seen.insert(bridge);
        match bridge {
            BridgeName::SetUserData => {
                self.user_id = call.text(0).to_string();
                self.name = call.text(1).to_string();
                self.short_name = call.text(2).to_string();
            }
            BridgeName::SetAuthToken => self.token = call.text(0).to_string(),
            BridgeName::SetSiteData => {
                self.site_data.insert(call.text(0).to_string(), call.text(1).to_string());
                self.site_data.insert(call.text(2).to_string(), call.text(3).to_string());
            }
            BridgeName::SetSprinkleName => self.sprinkle_name = call.text(0).to_string(),
            BridgeName::SetFeatureFlag => self.record_feature(call.integer(0)),
            BridgeName::SetResource => self
                .resources
                .entry(call.text(0).to_string())
                .or_default()
                .push(call.text(1).to_string()),
            BridgeName::SetDocumentId => {
                self.document_ids.insert(call.text(0).to_string(), call.text(1).to_string());
            }
            BridgeName::SetSessionCookie => self.session_cookie = Some(call.text(0).to_string()),
        }
    }

    fn record_feature(&mut self, index: i64) {
        match u32::try_from(index) {
            Ok(position) if position <= self.max_feature_index => self.features.set(position),
            _ => warn!(
                index,
                limit = self.max_feature_index,
                "Ignoring out-of-range feature flag"
            ),
        }
    }

    /// First required page fact that is absent, checked in a fixed order:
    /// user data, auth token, site data, sprinkle name.
    pub fn missing_fact(&self) -> Option<RequiredFact> {
        if !self.called(BridgeName::SetUserData) || self.user_id.is_empty() {
            Some(RequiredFact::UserData)
        } else if !self.called(BridgeName::SetAuthToken) || self.token.is_empty() {
            Some(RequiredFact::AuthToken)
        } else if !self.called(BridgeName::SetSiteData) {
            Some(RequiredFact::SiteData)
        } else if !self.called(BridgeName::SetSprinkleName) || self.sprinkle_name.is_empty() {
            Some(RequiredFact::SprinkleName)
        } else {
            None
        }
    }

    /// Distinct resource URLs, keys in sorted order, URLs in report order.
    pub fn resource_urls(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.resources
            .values()
            .flatten()
            .map(String::as_str)
            .filter(|url| seen.insert(*url))
            .collect()
    }
}

/// Bridges for `pass`, each recording into `log`.
pub fn bridges_for(log: &Rc<RefCell<ExtractionLog>>, pass: &[BridgeName]) -> Bridges {
    let mut bridges = Bridges::new();
    for &bridge in pass {
        let log = Rc::clone(log);
        bridges.insert_protocol(bridge, move |call| {
            debug!(bridge = %bridge, "recording bridge call");
            log.borrow_mut().record(bridge, call);
        });
    }
    bridges
}

#[cfg(test)]
mod tests {
    use super::*;
    use js_bootstrap::BridgeArg;

    fn call(name: BridgeName, args: &[&str]) -> (BridgeName, Vec<BridgeArg>) {
        let args = args
            .iter()
            .map(|text| BridgeArg {
                text: text.to_string(),
                integer: text.parse().unwrap_or(0),
            })
            .collect();
        (name, args)
    }

    fn replay(log: &mut ExtractionLog, calls: Vec<(BridgeName, Vec<BridgeArg>)>) {
        for (name, args) in calls {
            log.record(name, &BridgeCall::new(name.as_str(), args));
        }
    }

    fn complete() -> Vec<(BridgeName, Vec<BridgeArg>)> {
        vec![
            call(BridgeName::SetUserData, &["100", "Ada Lovelace", "Ada"]),
            call(BridgeName::SetAuthToken, &["tok"]),
            call(BridgeName::SetSiteData, &["__hs", "h", "__spin_r", "9"]),
            call(BridgeName::SetSprinkleName, &["jazoest"]),
        ]
    }

    #[test]
    fn complete_pass_has_no_missing_fact() {
        let mut log = ExtractionLog::new(100);
        replay(&mut log, complete());
        assert_eq!(log.missing_fact(), None);
        assert_eq!(log.site_data.get("__spin_r").map(String::as_str), Some("9"));
    }

    #[test]
    fn reports_first_missing_fact_in_order() {
        let mut log = ExtractionLog::new(100);
        assert_eq!(log.missing_fact(), Some(RequiredFact::UserData));
        replay(&mut log, complete().split_off(1));
        assert_eq!(log.missing_fact(), Some(RequiredFact::UserData));

        let mut log = ExtractionLog::new(100);
        let mut calls = complete();
        calls.remove(2);
        replay(&mut log, calls);
        assert_eq!(log.missing_fact(), Some(RequiredFact::SiteData));
    }

    #[test]
    fn empty_values_count_as_missing() {
        let mut log = ExtractionLog::new(100);
        let mut calls = complete();
        calls[3] = call(BridgeName::SetSprinkleName, &[""]);
        replay(&mut log, calls);
        assert_eq!(log.missing_fact(), Some(RequiredFact::SprinkleName));
    }

    #[test]
    fn garbage_is_recorded_verbatim() {
        let mut log = ExtractionLog::new(100);
        replay(&mut log, vec![call(BridgeName::SetUserData, &["undefined"])]);
        assert_eq!(log.user_id, "undefined");
        assert_eq!(log.name, "undefined");
        assert_eq!(log.short_name, "undefined");
    }

    #[test]
    fn feature_flags_are_bounded() {
        let mut log = ExtractionLog::new(64);
        replay(
            &mut log,
            vec![
                call(BridgeName::SetFeatureFlag, &["3"]),
                call(BridgeName::SetFeatureFlag, &["-1"]),
                call(BridgeName::SetFeatureFlag, &["65"]),
                call(BridgeName::SetFeatureFlag, &["64"]),
            ],
        );
        assert_eq!(log.features.positions().collect::<Vec<_>>(), vec![3, 64]);
        assert_eq!(log.features.highest(), 64);
    }

    #[test]
    fn resource_urls_are_deduplicated() {
        let mut log = ExtractionLog::new(0);
        replay(
            &mut log,
            vec![
                call(BridgeName::SetResource, &["b", "https://x/2.js"]),
                call(BridgeName::SetResource, &["a", "https://x/1.js"]),
                call(BridgeName::SetResource, &["b", "https://x/1.js"]),
                call(BridgeName::SetResource, &["b", "https://x/3.js"]),
            ],
        );
        assert_eq!(log.resources["b"].len(), 3);
        assert_eq!(
            log.resource_urls(),
            vec!["https://x/1.js", "https://x/2.js", "https://x/3.js"]
        );
    }

    #[test]
    fn bridges_cover_the_pass() {
        let log = Rc::new(RefCell::new(ExtractionLog::new(10)));
        let bridges = bridges_for(&log, js_bootstrap::protocol::PAGE_PASS);
        assert_eq!(bridges.len(), js_bootstrap::protocol::PAGE_PASS.len());
        assert!(bridges.names().any(|name| name == "setFeatureFlag"));
    }
}
