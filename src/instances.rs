//! Lazy materialization facade over cached entities.
//!
//! `CachedInstance` gives typed, explicit field access to a decoded payload.
//! `EntityRef` / `EntityRefList` are the lazy handles produced by the `pk`
//! and `pklist` codecs: they carry only identity and are materialized on
//! demand through the engine's batched reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::FieldValue;
use crate::engine::InstanceCache;
use crate::error::CacheError;
use crate::keys::Pk;

/// A decoded cached payload with explicit field access.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedInstance {
    fields: HashMap<String, FieldValue>,
}

impl CachedInstance {
    pub fn from_fields(fields: HashMap<String, FieldValue>) -> Self {
        Self { fields }
    }

    /// Get a field, failing if it is absent.
    pub fn field(&self, name: &str) -> Result<&FieldValue, CacheError> {
        self.fields.get(name).ok_or_else(|| CacheError::FieldNotPresent {
            name: name.to_string(),
        })
    }

    /// Get a field, `None` if absent.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Lazy reference to a single cached entity.
///
/// Produced by the `pk` codec; holds identity only. `fetch` resolves it
/// through the engine, which may in turn hit the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub ns: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub pk: Pk,
}

impl EntityRef {
    pub fn new(ns: impl Into<String>, type_name: impl Into<String>, pk: impl Into<Pk>) -> Self {
        Self {
            ns: ns.into(),
            type_name: type_name.into(),
            pk: pk.into(),
        }
    }

    /// Materialize the referenced entity, `None` if it no longer exists.
    pub async fn fetch<E: Send + Sync + 'static>(
        &self,
        cache: &InstanceCache<E>,
    ) -> Result<Option<CachedInstance>, CacheError> {
        cache.instance(&self.type_name, self.pk.clone()).await
    }
}

/// Lazy ordered collection of references to cached entities.
///
/// Produced by the `pklist` codec. Preserves the pk order it was serialized
/// with; iteration is restartable and fetches nothing until asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRefList {
    pub ns: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub pks: Vec<Pk>,
}

impl EntityRefList {
    pub fn new(
        ns: impl Into<String>,
        type_name: impl Into<String>,
        pks: impl IntoIterator<Item = Pk>,
    ) -> Self {
        Self {
            ns: ns.into(),
            type_name: type_name.into(),
            pks: pks.into_iter().collect(),
        }
    }

    pub fn pks(&self) -> &[Pk] {
        &self.pks
    }

    pub fn len(&self) -> usize {
        self.pks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pks.is_empty()
    }

    /// Iterate the member references without fetching anything.
    pub fn iter(&self) -> impl Iterator<Item = EntityRef> + '_ {
        self.pks
            .iter()
            .map(|pk| EntityRef::new(self.ns.clone(), self.type_name.clone(), pk.clone()))
    }

    /// Materialize all members in one batched read, preserving pk order.
    ///
    /// Members that no longer exist are omitted.
    pub async fn fetch_all<E: Send + Sync + 'static>(
        &self,
        cache: &InstanceCache<E>,
    ) -> Result<Vec<CachedInstance>, CacheError> {
        let specs = self
            .pks
            .iter()
            .map(|pk| crate::engine::EntitySpec::new(self.type_name.clone(), pk.clone()))
            .collect();
        let mut found = cache.get_instances(specs, None).await?;
        let mut out = Vec::with_capacity(self.pks.len());
        for pk in &self.pks {
            if let Some(result) = found.remove(&(self.type_name.clone(), pk.clone())) {
                out.push(result.instance);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::FieldValue;

    fn sample_instance() -> CachedInstance {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), FieldValue::Json(json!(1)));
        fields.insert(
            "username".to_string(),
            FieldValue::Json(json!("alice")),
        );
        CachedInstance::from_fields(fields)
    }

    #[test]
    fn field_access() {
        let instance = sample_instance();
        assert_eq!(
            instance.field("username").unwrap(),
            &FieldValue::Json(json!("alice"))
        );
        assert_eq!(instance.len(), 2);
    }

    #[test]
    fn absent_field_fails() {
        let instance = sample_instance();
        let err = instance.field("email").unwrap_err();
        assert!(matches!(
            err,
            CacheError::FieldNotPresent { name } if name == "email"
        ));
        assert!(instance.get("email").is_none());
    }

    #[test]
    fn ref_list_iteration_is_restartable() {
        let list = EntityRefList::new("app", "User", [Pk::Int(3), Pk::Int(1), Pk::Int(2)]);
        let first: Vec<Pk> = list.iter().map(|r| r.pk).collect();
        let second: Vec<Pk> = list.iter().map(|r| r.pk).collect();
        assert_eq!(first, vec![Pk::Int(3), Pk::Int(1), Pk::Int(2)]);
        assert_eq!(first, second);
    }

    #[test]
    fn ref_serde_shape() {
        let r = EntityRef::new("app", "User", 9);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value, json!({"ns": "app", "type": "User", "pk": 9}));
        let back: EntityRef = serde_json::from_value(value).unwrap();
        assert_eq!(back, r);
    }
}
