//! CTFd API v1 payloads and their mapping onto `ctfd_state` records
//!
//! CTFd wraps every response in `{"success": bool, "data": ..., "errors": ...}`
//! and uses integer ids. Optional challenge fields come back as `null`, `""`
//! or `0` depending on the server version; all three read as "unset".

use ctfd_state::{
    ChallengeFields, ChallengeType, DecayFunction, FlagFields, FlagKind, FlagSensitivity,
    HintFields, LockBehavior, RemoteChallenge, RemoteFile, RemoteFlag, RemoteHint, RemoteId,
    RemoteTag, RemoteTopic, Requirements, Visibility,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::ClientError;

/// Response envelope shared by every CTFd endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Human-readable failure text, from `message` or the `errors` map.
    pub fn failure_message(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.errors {
            Some(errors) => errors.to_string(),
            None => "no error detail".to_string(),
        }
    }
}

/// Convert a `RemoteId` to the integer CTFd expects in request bodies.
pub(crate) fn numeric_id(id: &RemoteId) -> Result<u64, ClientError> {
    id.as_number()
        .ok_or_else(|| ClientError::InvalidId(id.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct WireChallenge {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default)]
    pub connection_info: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub value: u64,
    #[serde(default)]
    pub initial: Option<u64>,
    #[serde(default)]
    pub decay: Option<u64>,
    #[serde(default)]
    pub minimum: Option<u64>,
    #[serde(default)]
    pub function: Option<DecayFunction>,
    #[serde(default)]
    pub state: Visibility,
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    #[serde(default)]
    pub next_id: Option<u64>,
}

/// Body of `GET /challenges/{id}/requirements`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireRequirements {
    #[serde(default)]
    pub prerequisites: Vec<u64>,
    #[serde(default)]
    pub anonymize: bool,
}

impl WireRequirements {
    pub fn into_requirements(self) -> Option<Requirements> {
        if self.prerequisites.is_empty() && !self.anonymize {
            return None;
        }
        Some(Requirements {
            behavior: if self.anonymize {
                LockBehavior::Anonymized
            } else {
                LockBehavior::Hidden
            },
            prerequisites: self.prerequisites.into_iter().map(RemoteId::from).collect(),
        })
    }
}

impl WireChallenge {
    pub fn into_remote(self, requirements: Option<Requirements>) -> RemoteChallenge {
        let dynamic = self.kind == ChallengeType::Dynamic;
        RemoteChallenge {
            id: RemoteId::from(self.id),
            fields: ChallengeFields {
                name: self.name,
                category: self.category,
                description: self.description,
                attribution: non_empty(self.attribution),
                connection_info: non_empty(self.connection_info),
                max_attempts: self.max_attempts.filter(|n| *n > 0),
                function: self.function.unwrap_or_default(),
                // Dynamic challenges report the current (decayed) value;
                // the declared one is `initial`.
                value: if dynamic {
                    self.initial.unwrap_or(self.value)
                } else {
                    self.value
                },
                decay: if dynamic { self.decay } else { None },
                minimum: if dynamic { self.minimum } else { None },
                state: self.state,
                kind: self.kind,
                next: self.next_id.map(RemoteId::from),
                requirements,
            },
        }
    }
}

/// Body for `POST /challenges` and `PATCH /challenges/{id}`.
pub(crate) fn challenge_body(fields: &ChallengeFields) -> Result<Value, ClientError> {
    let mut body = Map::new();
    body.insert("name".into(), json!(fields.name));
    body.insert("category".into(), json!(fields.category));
    body.insert("description".into(), json!(fields.description));
    body.insert(
        "attribution".into(),
        json!(fields.attribution.clone().unwrap_or_default()),
    );
    body.insert(
        "connection_info".into(),
        json!(fields.connection_info.clone().unwrap_or_default()),
    );
    body.insert(
        "max_attempts".into(),
        json!(fields.max_attempts.unwrap_or(0)),
    );
    body.insert("value".into(), json!(fields.value));
    body.insert("state".into(), serde_json::to_value(fields.state)?);
    body.insert("type".into(), serde_json::to_value(fields.kind)?);

    let next_id = match &fields.next {
        Some(next) => Value::from(numeric_id(next)?),
        None => Value::Null,
    };
    body.insert("next_id".into(), next_id);

    if fields.kind == ChallengeType::Dynamic {
        body.insert("initial".into(), json!(fields.value));
        body.insert("decay".into(), json!(fields.decay));
        body.insert("minimum".into(), json!(fields.minimum));
        body.insert("function".into(), serde_json::to_value(fields.function)?);
    }

    let requirements = fields.requirements.clone().unwrap_or_default();
    let prerequisites = requirements
        .prerequisites
        .iter()
        .map(numeric_id)
        .collect::<Result<Vec<_>, _>>()?;
    body.insert(
        "requirements".into(),
        json!({
            "prerequisites": prerequisites,
            "anonymize": requirements.behavior == LockBehavior::Anonymized,
        }),
    );

    Ok(Value::Object(body))
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct WireFlag {
    pub id: u64,
    pub content: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl From<WireFlag> for RemoteFlag {
    fn from(w: WireFlag) -> Self {
        RemoteFlag {
            id: RemoteId::from(w.id),
            fields: FlagFields {
                content: w.content,
                data: match w.data.as_deref() {
                    Some("case_insensitive") => FlagSensitivity::CaseInsensitive,
                    _ => FlagSensitivity::CaseSensitive,
                },
                kind: match w.kind.as_deref() {
                    Some("regex") => FlagKind::Regex,
                    _ => FlagKind::Static,
                },
            },
        }
    }
}

/// CTFd stores case sensitivity as `""` or `"case_insensitive"`.
fn flag_data(data: FlagSensitivity) -> &'static str {
    match data {
        FlagSensitivity::CaseSensitive => "",
        FlagSensitivity::CaseInsensitive => "case_insensitive",
    }
}

pub(crate) fn flag_body(challenge: Option<u64>, fields: &FlagFields) -> Result<Value, ClientError> {
    let mut body = json!({
        "content": fields.content,
        "data": flag_data(fields.data),
        "type": serde_json::to_value(fields.kind)?,
    });
    if let (Some(challenge), Some(obj)) = (challenge, body.as_object_mut()) {
        obj.insert("challenge".into(), json!(challenge));
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Hints
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireHintRequirements {
    #[serde(default)]
    pub prerequisites: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireHint {
    pub id: u64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub cost: u64,
    #[serde(default)]
    pub requirements: Option<WireHintRequirements>,
}

impl From<WireHint> for RemoteHint {
    fn from(w: WireHint) -> Self {
        RemoteHint {
            id: RemoteId::from(w.id),
            fields: HintFields {
                content: w.content,
                cost: w.cost,
                requirements: w
                    .requirements
                    .unwrap_or_default()
                    .prerequisites
                    .into_iter()
                    .map(RemoteId::from)
                    .collect(),
            },
        }
    }
}

pub(crate) fn hint_body(challenge: Option<u64>, fields: &HintFields) -> Result<Value, ClientError> {
    let prerequisites = fields
        .requirements
        .iter()
        .map(numeric_id)
        .collect::<Result<Vec<_>, _>>()?;
    let mut body = json!({
        "content": fields.content,
        "cost": fields.cost,
        "requirements": { "prerequisites": prerequisites },
    });
    if let (Some(challenge), Some(obj)) = (challenge, body.as_object_mut()) {
        obj.insert("challenge_id".into(), json!(challenge));
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Files, tags, topics
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct WireFile {
    pub id: u64,
    pub location: String,
}

impl From<WireFile> for RemoteFile {
    fn from(w: WireFile) -> Self {
        RemoteFile {
            id: RemoteId::from(w.id),
            location: w.location,
        }
    }
}

/// Tag rows and challenge-topic association rows share this shape.
#[derive(Debug, Deserialize)]
pub(crate) struct WireValueRow {
    pub id: u64,
    pub value: String,
}

impl From<WireValueRow> for RemoteTag {
    fn from(w: WireValueRow) -> Self {
        RemoteTag {
            id: RemoteId::from(w.id),
            value: w.value,
        }
    }
}

impl From<WireValueRow> for RemoteTopic {
    fn from(w: WireValueRow) -> Self {
        RemoteTopic {
            id: RemoteId::from(w.id),
            value: w.value,
        }
    }
}
