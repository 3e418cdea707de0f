//! Remote record definitions for CTFd entities
//!
//! Entities:
//! - challenges: the parent aggregate, with unlock requirements
//! - flags, hints, files: keyed sub-entities (CTFd assigns their ids)
//! - tags, topics: value-only sub-entities, one remote row per value

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GatewayError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identifier assigned by CTFd to a created entity.
///
/// CTFd uses integers; they are carried as strings so that recorded state
/// never depends on the remote numbering scheme. Both `"7"` and `7` parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => RemoteId(s),
            Raw::Number(n) => RemoteId::from(n),
        })
    }
}

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        RemoteId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form expected by the CTFd API, when the id is numeric.
    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl From<u64> for RemoteId {
    fn from(id: u64) -> Self {
        RemoteId(id.to_string())
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        RemoteId(id.to_string())
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content fingerprint (SHA-256 hex string) of a file's bytes.
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = GatewayError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GatewayError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Whether submissions are compared case-sensitively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSensitivity {
    #[default]
    CaseSensitive,
    CaseInsensitive,
}

/// How the flag content is matched against a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    #[default]
    Static,
    Regex,
}

/// Mutable fields of a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagFields {
    pub content: String,
    #[serde(default)]
    pub data: FlagSensitivity,
    #[serde(default, rename = "type")]
    pub kind: FlagKind,
}

impl FlagFields {
    pub fn new(content: impl Into<String>) -> Self {
        FlagFields {
            content: content.into(),
            data: FlagSensitivity::default(),
            kind: FlagKind::default(),
        }
    }
}

/// A flag row as stored by CTFd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFlag {
    pub id: RemoteId,
    #[serde(flatten)]
    pub fields: FlagFields,
}

// ---------------------------------------------------------------------------
// Hints
// ---------------------------------------------------------------------------

/// Mutable fields of a hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintFields {
    pub content: String,
    #[serde(default)]
    pub cost: u64,
    /// Ids of other hints that must be unlocked first.
    #[serde(default)]
    pub requirements: Vec<RemoteId>,
}

/// A hint row as stored by CTFd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHint {
    pub id: RemoteId,
    #[serde(flatten)]
    pub fields: HintFields,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Bytes and display name sent when uploading a challenge file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub content: Vec<u8>,
}

/// A file row as listed by CTFd.
///
/// Listing only returns the storage location; the bytes need a second
/// request (`CtfdGateway::fetch_file_content`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: RemoteId,
    pub location: String,
}

impl RemoteFile {
    /// File name as shown to players, i.e. the last segment of the location.
    pub fn file_name(&self) -> &str {
        self.location
            .rsplit('/')
            .next()
            .unwrap_or(self.location.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tags & Topics
// ---------------------------------------------------------------------------

/// A tag row. Tags are value-only for the declaring side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTag {
    pub id: RemoteId,
    pub value: String,
}

/// A topic association row (challenge ↔ topic value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTopic {
    pub id: RemoteId,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

/// Score decay function of a dynamic challenge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayFunction {
    #[default]
    Linear,
    Logarithmic,
}

/// Whether players can see the challenge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Hidden,
    Visible,
}

/// Scoring model. CTFd cannot convert a challenge between types in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    #[default]
    Standard,
    Dynamic,
}

/// What players see of a challenge that is still locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBehavior {
    #[default]
    Hidden,
    Anonymized,
}

/// Unlock requirements of a challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub behavior: LockBehavior,
    /// Ids of challenges that must be solved first.
    #[serde(default)]
    pub prerequisites: Vec<RemoteId>,
}

/// Direct (non-collection) fields of a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeFields {
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub function: DecayFunction,
    /// Points for a standard challenge, initial points for a dynamic one.
    #[serde(default)]
    pub value: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<u64>,
    #[serde(default)]
    pub state: Visibility,
    #[serde(default, rename = "type")]
    pub kind: ChallengeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<RemoteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
}

impl ChallengeFields {
    /// A hidden standard challenge with the given identity fields.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        value: u64,
    ) -> Self {
        ChallengeFields {
            name: name.into(),
            category: category.into(),
            description: description.into(),
            attribution: None,
            connection_info: None,
            max_attempts: None,
            function: DecayFunction::default(),
            value,
            decay: None,
            minimum: None,
            state: Visibility::default(),
            kind: ChallengeType::default(),
            next: None,
            requirements: None,
        }
    }
}

/// A challenge as stored by CTFd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChallenge {
    pub id: RemoteId,
    #[serde(flatten)]
    pub fields: ChallengeFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_digest_is_sha256_hex() {
        let digest = ContentDigest::from_bytes(b"flag file");
        assert_eq!(digest.as_str().len(), 64);
        assert_eq!(digest.short().len(), 12);
        assert_eq!(digest, ContentDigest::from_bytes(b"flag file"));
        assert_ne!(digest, ContentDigest::from_bytes(b"flag file v2"));
    }

    #[test]
    fn test_content_digest_rejects_garbage() {
        let err = ContentDigest::try_from("not-a-digest".to_string()).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidDigest { .. }));
    }

    #[test]
    fn test_remote_file_name_from_location() {
        let file = RemoteFile {
            id: RemoteId::from(3),
            location: "a1b2c3/dump.pcap".to_string(),
        };
        assert_eq!(file.file_name(), "dump.pcap");
    }

    #[test]
    fn test_flag_fields_defaults_when_omitted() {
        let fields: FlagFields = serde_json::from_str(r#"{"content":"CTF{x}"}"#).unwrap();
        assert_eq!(fields.data, FlagSensitivity::CaseSensitive);
        assert_eq!(fields.kind, FlagKind::Static);
    }

    #[test]
    fn test_remote_id_parses_string_or_number() {
        let ids: Vec<RemoteId> = serde_json::from_str(r#"["7", 8]"#).unwrap();
        assert_eq!(ids, vec![RemoteId::from(7), RemoteId::from(8)]);
        assert_eq!(serde_json::to_string(&ids[1]).unwrap(), r#""8""#);
    }

    #[test]
    fn test_remote_id_numeric_form() {
        assert_eq!(RemoteId::from(42).as_number(), Some(42));
        assert_eq!(RemoteId::new("abc").as_number(), None);
    }
}
