use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Strongly typed call identifier backed by ULID.
///
/// ULIDs sort by creation time, so call logs and queue dumps read in
/// submission order without an extra timestamp column.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct CallId(pub ulid::Ulid);

impl CallId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub fn from_ulid(id: ulid::Ulid) -> Self {
        Self(id)
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CallId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = ulid::Ulid::from_string(s)?;
        Ok(CallId(id))
    }
}

impl Serialize for CallId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CallId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<CallId>()
            .map_err(|_| serde::de::Error::custom("invalid call id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_display_parse() {
        let id = CallId::new();
        let parsed: CallId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_call_id_rejects_garbage() {
        assert!("not-a-ulid".parse::<CallId>().is_err());
    }

    #[test]
    fn test_call_id_serializes_as_string() {
        let id = CallId::new();
        let v = serde_json::to_value(id).unwrap();
        assert_eq!(v, serde_json::Value::String(id.to_string()));
    }
}
