use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(TaskId, "task");
branded_id!(TurnId, "turn");
branded_id!(ToolCallId, "tool");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        assert!(TaskId::new().as_str().starts_with("task_"));
        assert!(TurnId::new().as_str().starts_with("turn_"));
        assert!(ToolCallId::new().as_str().starts_with("tool_"));
    }

    #[test]
    fn ids_are_unique_and_ordered() {
        let ids: Vec<TurnId> = (0..50).map(|_| TurnId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = ToolCallId::from_raw("tool_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""tool_abc""#);
        let parsed: ToolCallId = "tool_abc".parse().unwrap();
        assert_eq!(parsed, id);
    }
}
