//! Particle system identifiers

use crate::error::EmberError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SYSTEM: AtomicU64 = AtomicU64::new(1);

const PREFIX: &str = "ps#";

/// Handle of one registered particle system, written `ps#N`.
///
/// Render frames are keyed by it, so an id is never handed out twice within a
/// process, even after its system is unregistered.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SystemId(u64);

impl SystemId {
    /// Hand out the next unused id
    pub fn allocate() -> Self {
        Self(NEXT_SYSTEM.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemId({self})")
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

impl FromStr for SystemId {
    type Err = EmberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(PREFIX)
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| EmberError::ConfigError(format!("Invalid particle system id '{s}'")))
    }
}

impl Serialize for SystemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SystemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tagged {
        system: SystemId,
    }

    #[test]
    fn allocated_ids_increase() {
        let a = SystemId::allocate();
        let b = SystemId::allocate();
        assert!(b > a);
    }

    #[test]
    fn display_and_parse() {
        let id = SystemId::from_raw(42);
        assert_eq!(id.to_string(), "ps#42");
        assert_eq!(format!("{id:?}"), "SystemId(ps#42)");
        assert_eq!("ps#42".parse::<SystemId>().unwrap(), id);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        for s in ["42", "ps#", "ps#-1", "ps#x", "sys#4"] {
            assert!(matches!(s.parse::<SystemId>(), Err(EmberError::ConfigError(_))), "{s}");
        }
    }

    #[test]
    fn serialized_as_string() {
        let tagged = Tagged {
            system: SystemId::from_raw(7),
        };
        let text = toml::to_string(&tagged).unwrap();
        assert_eq!(text.trim(), "system = \"ps#7\"");
        assert_eq!(toml::from_str::<Tagged>(&text).unwrap(), tagged);
    }
}
