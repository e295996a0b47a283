use std::fmt;

/// Closed vocabulary of bridge functions the bootstrap scripts may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BridgeName {
    SetUserData,
    SetAuthToken,
    SetSiteData,
    SetSprinkleName,
    SetFeatureFlag,
    SetResource,
    SetDocumentId,
    SetSessionCookie,
}

/// Installed while replaying the main page.
pub const PAGE_PASS: &[BridgeName] = &[
    BridgeName::SetUserData,
    BridgeName::SetAuthToken,
    BridgeName::SetSiteData,
    BridgeName::SetSprinkleName,
    BridgeName::SetFeatureFlag,
    BridgeName::SetResource,
];

/// Installed while replaying downloaded resource scripts.
pub const RESOURCE_PASS: &[BridgeName] = &[BridgeName::SetDocumentId];

/// Installed while replaying the login page.
pub const LOGIN_PASS: &[BridgeName] = &[BridgeName::SetSessionCookie];

impl BridgeName {
    pub const ALL: [BridgeName; 8] = [
        BridgeName::SetUserData,
        BridgeName::SetAuthToken,
        BridgeName::SetSiteData,
        BridgeName::SetSprinkleName,
        BridgeName::SetFeatureFlag,
        BridgeName::SetResource,
        BridgeName::SetDocumentId,
        BridgeName::SetSessionCookie,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BridgeName::SetUserData => "setUserData",
            BridgeName::SetAuthToken => "setAuthToken",
            BridgeName::SetSiteData => "setSiteData",
            BridgeName::SetSprinkleName => "setSprinkleName",
            BridgeName::SetFeatureFlag => "setFeatureFlag",
            BridgeName::SetResource => "setResource",
            BridgeName::SetDocumentId => "setDocumentID",
            BridgeName::SetSessionCookie => "setSessionCookie",
        }
    }

    /// Positional arguments the host reads from a call.
    pub fn arity(self) -> usize {
        match self {
            BridgeName::SetUserData => 3,
            BridgeName::SetSiteData => 4,
            BridgeName::SetResource | BridgeName::SetDocumentId => 2,
            BridgeName::SetAuthToken
            | BridgeName::SetSprinkleName
            | BridgeName::SetFeatureFlag
            | BridgeName::SetSessionCookie => 1,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|bridge| bridge.as_str() == name)
    }
}

impl fmt::Display for BridgeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for bridge in BridgeName::ALL {
            assert_eq!(BridgeName::parse(bridge.as_str()), Some(bridge));
        }
        assert_eq!(BridgeName::parse("setValue"), None);
    }

    #[test]
    fn passes_do_not_overlap() {
        for bridge in PAGE_PASS {
            assert!(!RESOURCE_PASS.contains(bridge));
            assert!(!LOGIN_PASS.contains(bridge));
        }
        assert_eq!(PAGE_PASS.len() + RESOURCE_PASS.len() + LOGIN_PASS.len(), BridgeName::ALL.len());
    }
}
