use super::error::{ResolveError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the hyphenated `8-4-4-4-12` form.
const HYPHENATED_LEN: usize = 36;

/// Canonical key issued by the system of record.
///
/// Always held in lowercase hyphenated form. Parsing accepts upper case hex
/// but rejects the simple, braced and urn forms so that two spellings of the
/// same key can never reach the index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpaqueId {
    canonical: String,
    bits: u128,
}

impl OpaqueId {
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() != HYPHENATED_LEN {
            return Err(ResolveError::InvalidFormat(format!(
                "'{}' is not a hyphenated opaque id",
                input
            )));
        }

        let uuid = Uuid::try_parse(input).map_err(|err| {
            ResolveError::InvalidFormat(format!("'{}' is not an opaque id: {}", input, err))
        })?;

        Ok(Self::from(uuid))
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// The 128 bits of the key, most significant hex digit first.
    pub fn as_u128(&self) -> u128 {
        self.bits
    }
}

impl From<Uuid> for OpaqueId {
    fn from(uuid: Uuid) -> Self {
        Self {
            canonical: uuid.hyphenated().to_string(),
            bits: uuid.as_u128(),
        }
    }
}

impl FromStr for OpaqueId {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OpaqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl AsRef<str> for OpaqueId {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

impl Serialize for OpaqueId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for OpaqueId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Compact routing id derived from an [`OpaqueId`]. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectedId(u64);

impl ProjectedId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl FromStr for ProjectedId {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>().map(Self).map_err(|_| {
            ResolveError::InvalidFormat(format!("'{}' is not a numeric id", s))
        })
    }
}

impl fmt::Display for ProjectedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ProjectedId> for u64 {
    fn from(id: ProjectedId) -> Self {
        id.0
    }
}
