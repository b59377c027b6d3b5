use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Third-party services a local account can be connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Zoom,
    Google,
    MicrosoftTeams,
    Asana,
    Clickup,
    Monday,
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::Zoom,
        Provider::Google,
        Provider::MicrosoftTeams,
        Provider::Asana,
        Provider::Clickup,
        Provider::Monday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Zoom => "zoom",
            Provider::Google => "google",
            Provider::MicrosoftTeams => "microsoft_teams",
            Provider::Asana => "asana",
            Provider::Clickup => "clickup",
            Provider::Monday => "monday",
        }
    }

    /// Credential table holding this provider's rows.
    pub fn table(&self) -> &'static str {
        match self {
            Provider::Zoom => "zoom_credentials",
            Provider::Google => "google_credentials",
            Provider::MicrosoftTeams => "microsoft_teams_credentials",
            Provider::Asana => "asana_credentials",
            Provider::Clickup => "clickup_credentials",
            Provider::Monday => "monday_credentials",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider `{}`", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}
