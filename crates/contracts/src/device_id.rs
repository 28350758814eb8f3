//! DeviceId - configured name of a timing device
//!
//! Every `DetectionEvent` carries one, so it is backed by `Arc<str>` and
//! clones without allocating.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Timing device identifier.
///
/// Serializes as a plain string; usable as a map key and looked up by `&str`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for DeviceId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

// `Arc<str>` hashes like `str`, so map lookups by `&str` agree with `Hash`
impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({:?})", &*self.0)
    }
}

impl PartialEq<str> for DeviceId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for DeviceId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        Ok(Self(Arc::from(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_status_map_lookup_by_name() {
        let mut status: HashMap<DeviceId, bool> = HashMap::new();
        status.insert(DeviceId::new("gate"), true);
        status.insert(DeviceId::new("split-1"), false);

        assert_eq!(status.get("gate"), Some(&true));
        assert_eq!(status.get("split-1"), Some(&false));
        assert_eq!(status.get("split-2"), None);
    }

    #[test]
    fn test_config_and_event_wire_form() {
        let id = DeviceId::new("gate");
        assert_eq!(id.to_string(), "gate");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"gate\"");

        let parsed: DeviceId = serde_json::from_str("\"gate\"").unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed, "gate");
    }
}
