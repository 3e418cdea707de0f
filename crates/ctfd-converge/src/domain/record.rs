//! Identity-optional sub-entity records.
//!
//! A declared flag, hint or file has no identity until CTFd creates it.
//! `Record<F>` makes that explicit: `Pending` has never been created (or
//! was never bound to a recorded entity), `Committed` carries the id CTFd
//! assigned. On disk both look like `{"id": "7", ...fields}`, with `id`
//! omitted (or empty) for pending records.

use ctfd_state::RemoteId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A sub-entity that exists remotely under `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committed<F> {
    pub id: RemoteId,
    #[serde(flatten)]
    pub fields: F,
}

impl<F> Committed<F> {
    pub fn new(id: RemoteId, fields: F) -> Self {
        Committed { id, fields }
    }
}

/// A declared keyed sub-entity, with or without a remote identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record<F> {
    Pending(F),
    Committed(Committed<F>),
}

impl<F> Record<F> {
    pub fn pending(fields: F) -> Self {
        Record::Pending(fields)
    }

    pub fn committed(id: impl Into<RemoteId>, fields: F) -> Self {
        Record::Committed(Committed::new(id.into(), fields))
    }

    pub fn id(&self) -> Option<&RemoteId> {
        match self {
            Record::Pending(_) => None,
            Record::Committed(c) => Some(&c.id),
        }
    }

    pub fn fields(&self) -> &F {
        match self {
            Record::Pending(f) => f,
            Record::Committed(c) => &c.fields,
        }
    }

    pub fn into_fields(self) -> F {
        match self {
            Record::Pending(f) => f,
            Record::Committed(c) => c.fields,
        }
    }
}

impl<F> From<Committed<F>> for Record<F> {
    fn from(c: Committed<F>) -> Self {
        Record::Committed(c)
    }
}

#[derive(Serialize)]
struct RecordRef<'a, F> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a RemoteId>,
    #[serde(flatten)]
    fields: &'a F,
}

#[derive(Deserialize)]
struct RecordRepr<F> {
    #[serde(default)]
    id: Option<RemoteId>,
    #[serde(flatten)]
    fields: F,
}

impl<F: Serialize> Serialize for Record<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RecordRef {
            id: self.id(),
            fields: self.fields(),
        }
        .serialize(serializer)
    }
}

impl<'de, F: Deserialize<'de>> Deserialize<'de> for Record<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = RecordRepr::<F>::deserialize(deserializer)?;
        Ok(match repr.id.filter(|id| !id.as_str().is_empty()) {
            Some(id) => Record::committed(id, repr.fields),
            None => Record::Pending(repr.fields),
        })
    }
}
