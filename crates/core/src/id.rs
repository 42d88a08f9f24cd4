//! Strongly-typed identifiers used across the bus.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a registered event (e.g. `"SET_VALUE"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

/// Identifier of a live node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

/// Type name of a node. A static node uses its type name as its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeType(String);

macro_rules! impl_string_newtype {
    ($t:ty) => {
        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&$t> for $t {
            fn from(value: &$t) -> Self {
                value.clone()
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $t {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $t {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $t {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

impl_string_newtype!(EventId);
impl_string_newtype!(NodeId);
impl_string_newtype!(NodeType);

impl NodeId {
    /// Id of a static node: the type name itself.
    pub fn for_static(node_type: &NodeType) -> Self {
        Self(node_type.0.clone())
    }

    /// Fresh id for a non-static node: `<type>_<uuid>`.
    ///
    /// Uses UUIDv7 (time-ordered), so ids of one type are unique and sort by creation.
    pub fn generate(node_type: &NodeType) -> Self {
        Self(format!("{}_{}", node_type.0, Uuid::now_v7().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn static_id_is_the_type_name() {
        let ty = NodeType::from("COUNTER");
        assert_eq!(NodeId::for_static(&ty), "COUNTER");
    }

    #[test]
    fn generated_id_is_prefixed_by_type() {
        let ty = NodeType::from("VIEW");
        let id = NodeId::generate(&ty);
        assert!(id.as_str().starts_with("VIEW_"));
        assert!(id.as_str().len() > "VIEW_".len());
    }

    proptest! {
        #[test]
        fn generated_ids_are_pairwise_distinct(n in 2usize..64) {
            let ty = NodeType::from("WIDGET");
            let ids: std::collections::HashSet<NodeId> =
                (0..n).map(|_| NodeId::generate(&ty)).collect();
            prop_assert_eq!(ids.len(), n);
        }
    }
}
