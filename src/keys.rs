//! Primary keys and store-key derivation.
//!
//! A cached instance is addressed by the triple (cache version, entity type,
//! primary key), rendered into a flat store key. `_` is the component
//! separator; the config layer rejects prefixes and version identifiers that
//! contain it, and type names registered with the engine must not either.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Primary key of a cached entity.
///
/// Integer keys cover the common auto-increment case; string keys cover
/// slugs, UUIDs rendered as text, and other natural identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pk {
    Int(i64),
    Str(String),
}

impl Pk {
    /// A pk is usable only when it is non-empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Pk::Int(_) => false,
            Pk::Str(s) => s.is_empty(),
        }
    }
}

impl fmt::Display for Pk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pk::Int(n) => write!(f, "{n}"),
            Pk::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Pk {
    fn from(value: i64) -> Self {
        Pk::Int(value)
    }
}

impl From<i32> for Pk {
    fn from(value: i32) -> Self {
        Pk::Int(value.into())
    }
}

impl From<&str> for Pk {
    fn from(value: &str) -> Self {
        Pk::Str(value.to_string())
    }
}

impl From<String> for Pk {
    fn from(value: String) -> Self {
        Pk::Str(value)
    }
}

/// Render the store key for a cached instance.
///
/// The same (version, type, pk) triple always yields the same key; keys for
/// different versions never collide.
pub fn store_key(prefix: &str, version: &str, type_name: &str, pk: &Pk) -> String {
    format!("{prefix}_{version}_{type_name}_{pk}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_triple_same_key() {
        let a = store_key("strato", "v1", "User", &Pk::Int(1));
        let b = store_key("strato", "v1", "User", &Pk::Int(1));
        assert_eq!(a, b);
        insta::assert_snapshot!(a, @"strato_v1_User_1");
    }

    #[test]
    fn versions_never_collide() {
        let v1 = store_key("strato", "v1", "User", &Pk::Int(1));
        let v2 = store_key("strato", "v2", "User", &Pk::Int(1));
        assert_ne!(v1, v2);
    }

    #[test]
    fn string_pks_render_verbatim() {
        let key = store_key("strato", "v1", "Feature", &Pk::from("web-css-display"));
        assert_eq!(key, "strato_v1_Feature_web-css-display");
    }

    #[test]
    fn pk_equality_and_display() {
        assert_eq!(Pk::from(7), Pk::Int(7));
        assert_ne!(Pk::from(7), Pk::from("7"));
        assert_eq!(Pk::from("7").to_string(), Pk::from(7).to_string());
    }

    #[test]
    fn empty_string_pk_is_empty() {
        assert!(Pk::from("").is_empty());
        assert!(!Pk::Int(0).is_empty());
    }

    #[test]
    fn pk_serializes_untagged() {
        assert_eq!(serde_json::to_value(Pk::Int(3)).unwrap(), serde_json::json!(3));
        assert_eq!(
            serde_json::to_value(Pk::from("abc")).unwrap(),
            serde_json::json!("abc")
        );
        let back: Pk = serde_json::from_value(serde_json::json!(3)).unwrap();
        assert_eq!(back, Pk::Int(3));
    }
}
