//! Declared fields of the keyed sub-entities.
//!
//! Optional fields left unset mean "whatever CTFd has", not "clear it".
//! The same types are used in recorded state, where they hold the values
//! the last pass observed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ctfd_state::{
    ContentDigest, FileUpload, FlagFields, FlagKind, FlagSensitivity, HintFields, RemoteFlag,
    RemoteHint, RemoteId,
};
use serde::{Deserialize, Serialize};

use super::error::DeclarationError;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSpec {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FlagSensitivity>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FlagKind>,
}

impl FlagSpec {
    pub fn new(content: impl Into<String>) -> Self {
        FlagSpec {
            content: content.into(),
            data: None,
            kind: None,
        }
    }

    /// Fields to send, filling unset attributes from `base` or CTFd defaults.
    pub fn resolve(&self, base: Option<&FlagFields>) -> FlagFields {
        FlagFields {
            content: self.content.clone(),
            data: self
                .data
                .or(base.map(|b| b.data))
                .unwrap_or_default(),
            kind: self
                .kind
                .or(base.map(|b| b.kind))
                .unwrap_or_default(),
        }
    }

    /// What the recorded state holds for a flag as CTFd stores it.
    pub fn observed(remote: &RemoteFlag) -> Self {
        FlagSpec {
            content: remote.fields.content.clone(),
            data: Some(remote.fields.data),
            kind: Some(remote.fields.kind),
        }
    }
}

// ---------------------------------------------------------------------------
// Hints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintSpec {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<u64>,
    /// Ids of hints that must be unlocked first. Order is not significant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Vec<RemoteId>>,
}

impl HintSpec {
    pub fn new(content: impl Into<String>) -> Self {
        HintSpec {
            content: content.into(),
            cost: None,
            requirements: None,
        }
    }

    pub fn resolve(&self, base: Option<&HintFields>) -> HintFields {
        HintFields {
            content: self.content.clone(),
            cost: self.cost.or(base.map(|b| b.cost)).unwrap_or(0),
            requirements: match (&self.requirements, base) {
                (Some(reqs), _) => reqs.clone(),
                (None, Some(b)) => b.requirements.clone(),
                (None, None) => Vec::new(),
            },
        }
    }

    pub fn observed(remote: &RemoteHint) -> Self {
        let mut requirements = remote.fields.requirements.clone();
        requirements.sort();
        HintSpec {
            content: remote.fields.content.clone(),
            cost: Some(remote.fields.cost),
            requirements: Some(requirements),
        }
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// A challenge file: display name plus bytes.
///
/// `location` and `digest` are filled in once CTFd has stored the file.
/// In JSON the bytes appear as `content` (UTF-8 text) and/or `contentb64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FileSpecRepr", into = "FileSpecRepr")]
pub struct FileSpec {
    pub name: String,
    pub content: Vec<u8>,
    pub location: Option<String>,
    pub digest: Option<ContentDigest>,
}

impl FileSpec {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        FileSpec {
            name: name.into(),
            content: content.into(),
            location: None,
            digest: None,
        }
    }

    /// Digest of the bytes, preferring the recorded one.
    pub fn fingerprint(&self) -> ContentDigest {
        self.digest
            .clone()
            .unwrap_or_else(|| ContentDigest::from_bytes(&self.content))
    }

    pub fn upload(&self) -> FileUpload {
        FileUpload {
            name: self.name.clone(),
            content: self.content.clone(),
        }
    }

    /// The same file, as stored at `location`.
    pub fn stored_at(&self, location: &str) -> Self {
        FileSpec {
            name: self.name.clone(),
            content: self.content.clone(),
            location: Some(location.to_string()),
            digest: Some(ContentDigest::from_bytes(&self.content)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct FileSpecRepr {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contentb64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    digest: Option<ContentDigest>,
}

impl TryFrom<FileSpecRepr> for FileSpec {
    type Error = DeclarationError;

    fn try_from(repr: FileSpecRepr) -> Result<Self, Self::Error> {
        let decoded = match &repr.contentb64 {
            Some(b64) => Some(BASE64.decode(b64).map_err(|e| {
                DeclarationError::InvalidBase64 {
                    name: repr.name.clone(),
                    detail: e.to_string(),
                }
            })?),
            None => None,
        };
        let content = match (decoded, repr.content) {
            (Some(bytes), Some(text)) if bytes != text.as_bytes() => {
                return Err(DeclarationError::ContentMismatch { name: repr.name });
            }
            (Some(bytes), _) => bytes,
            (None, Some(text)) => text.into_bytes(),
            (None, None) => Vec::new(),
        };
        Ok(FileSpec {
            name: repr.name,
            content,
            location: repr.location,
            digest: repr.digest,
        })
    }
}

impl From<FileSpec> for FileSpecRepr {
    fn from(spec: FileSpec) -> Self {
        let contentb64 = BASE64.encode(&spec.content);
        FileSpecRepr {
            name: spec.name,
            content: String::from_utf8(spec.content).ok(),
            contentb64: Some(contentb64),
            location: spec.location,
            digest: spec.digest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flag_resolve_keeps_remote_attributes_when_unset() {
        let remote = FlagFields {
            content: "old".into(),
            data: FlagSensitivity::CaseInsensitive,
            kind: FlagKind::Regex,
        };
        let resolved = FlagSpec::new("new").resolve(Some(&remote));
        assert_eq!(resolved.content, "new");
        assert_eq!(resolved.data, FlagSensitivity::CaseInsensitive);
        assert_eq!(resolved.kind, FlagKind::Regex);

        let fresh = FlagSpec::new("new").resolve(None);
        assert_eq!(fresh.data, FlagSensitivity::CaseSensitive);
    }

    #[test]
    fn test_file_spec_reads_either_encoding() {
        let text: FileSpec =
            serde_json::from_value(json!({ "name": "a.txt", "content": "hi" })).unwrap();
        let b64: FileSpec =
            serde_json::from_value(json!({ "name": "a.txt", "contentb64": "aGk=" })).unwrap();
        assert_eq!(text.content, b"hi");
        assert_eq!(text, b64);
    }

    #[test]
    fn test_file_spec_rejects_conflicting_encodings() {
        let err = serde_json::from_value::<FileSpec>(
            json!({ "name": "a.txt", "content": "hi", "contentb64": "aG8=" }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("disagree"));
    }

    #[test]
    fn test_file_spec_rejects_bad_base64() {
        let err = serde_json::from_value::<FileSpec>(
            json!({ "name": "a.bin", "contentb64": "***" }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not valid base64"));
    }

    #[test]
    fn test_binary_file_serializes_base64_only() {
        let spec = FileSpec::new("blob.bin", vec![0xff, 0x00, 0xfe]);
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("content").is_none());
        assert_eq!(value["contentb64"], "/wD+");
    }

    #[test]
    fn test_stored_at_records_location_and_digest() {
        let stored = FileSpec::new("a.txt", "hi").stored_at("ab12/a.txt");
        assert_eq!(stored.location.as_deref(), Some("ab12/a.txt"));
        assert_eq!(stored.digest, Some(ContentDigest::from_bytes(b"hi")));
    }
}
