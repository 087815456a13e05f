use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ── ROLES ─────────────────────────────────────────────────────────

/// The two account roles. `ops` and `client` are the older wire names
/// and are still accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "ops")]
    Uploader,
    #[serde(alias = "client")]
    Consumer,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Uploader => "uploader",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uploader" | "ops" => Ok(Role::Uploader),
            "consumer" | "client" => Ok(Role::Consumer),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ── ACCESS POLICY ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Upload,
    IssueDownloadLink,
    RedeemDownloadLink,
    ListFiles,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Upload => "upload files",
            Action::IssueDownloadLink => "request download links",
            Action::RedeemDownloadLink => "download files",
            Action::ListFiles => "list files",
        };
        f.write_str(label)
    }
}

/// Pure role gate. Uploaders only upload; consumers do everything else.
pub fn can_perform(role: Role, action: Action) -> bool {
    matches!(
        (role, action),
        (Role::Uploader, Action::Upload)
            | (
                Role::Consumer,
                Action::IssueDownloadLink | Action::RedeemDownloadLink | Action::ListFiles
            )
    )
}

// ── TOKEN GRANTS ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationGrant {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadGrant {
    pub file_id: String,
    pub user_id: Uuid,
}

/// What a signed token authorizes. The `kind` tag is carried inside the
/// token payload so every token decodes to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grant {
    Session(SessionGrant),
    Verification(VerificationGrant),
    Download(DownloadGrant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantKind {
    Session,
    Verification,
    Download,
}

impl Grant {
    pub fn kind(&self) -> GrantKind {
        match self {
            Grant::Session(_) => GrantKind::Session,
            Grant::Verification(_) => GrantKind::Verification,
            Grant::Download(_) => GrantKind::Download,
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GrantKind::Session => "session",
            GrantKind::Verification => "verification",
            GrantKind::Download => "download",
        })
    }
}
