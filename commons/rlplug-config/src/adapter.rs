use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::{Kwargs, error::AdaptError, introspect::declared_fields};

/// A configuration type whose constructor validates keyword arguments
/// against a fixed field set.
///
/// Types with somewhere to put additional attributes return it from
/// [`ConfigSchema::extra_fields_mut`] and are treated as mutable. Types that
/// keep the default are frozen; anything preserved for them is recorded in
/// the registry's side table instead.
pub trait ConfigSchema: DeserializeOwned + Send + Sync + 'static {
    fn extra_fields_mut(&mut self) -> Option<&mut Kwargs> {
        None
    }
}

/// What an adapted constructor does with keyword arguments beyond the
/// declared schema.
#[derive(Debug, Clone, Default)]
pub struct AdaptOptions {
    keep: BTreeSet<String>,
    overrides: Kwargs,
}

impl AdaptOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preserves `key` aside instead of passing it to the constructor.
    pub fn keep<K: Into<String>>(mut self, key: K) -> Self {
        self.keep.insert(key.into());
        self
    }

    /// Forces `key` to `value`, replacing whatever the caller supplied.
    pub fn set<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn kept(&self) -> &BTreeSet<String> {
        &self.keep
    }

    pub fn overrides(&self) -> &Kwargs {
        &self.overrides
    }
}

/// Keyword arguments after adaptation.
#[derive(Debug, Default)]
pub struct Filtered {
    /// Passed on to the schema-checked constructor.
    pub accepted: Kwargs,
    /// Kept aside for the caller; never seen by the constructor.
    pub preserved: Kwargs,
    /// Undeclared names that were discarded.
    pub dropped: Vec<String>,
}

/// Constructor wrapper compiled for one configuration type.
#[derive(Debug)]
pub struct Adapter {
    type_name: &'static str,
    declared: BTreeSet<&'static str>,
    options: AdaptOptions,
}

impl Adapter {
    /// Fails when `T` is not introspectable, or when an override names a
    /// field `T` does not declare.
    pub fn for_type<T: ConfigSchema>(options: AdaptOptions) -> Result<Self, AdaptError> {
        let type_name = std::any::type_name::<T>();
        let declared: BTreeSet<&'static str> =
            declared_fields::<T>()?.iter().copied().collect();
        if let Some(field) = options
            .overrides
            .keys()
            .find(|k| !declared.contains(k.as_str()))
        {
            return Err(AdaptError::UndeclaredOverride {
                type_name,
                field: field.clone(),
            });
        }
        Ok(Self {
            type_name,
            declared,
            options,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn declared(&self) -> &BTreeSet<&'static str> {
        &self.declared
    }

    pub fn options(&self) -> &AdaptOptions {
        &self.options
    }

    /// Splits caller kwargs into what the constructor sees and what is kept
    /// aside. Preservation runs first, so a kept key never reaches the
    /// constructor even when the schema declares it.
    pub fn filter(&self, kwargs: Kwargs) -> Filtered {
        let mut out = Filtered::default();
        let mut forced: BTreeMap<&str, &Value> = self
            .options
            .overrides
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();

        for (key, value) in kwargs {
            if self.options.keep.contains(&key) {
                out.preserved.insert(key, value);
            } else if !self.declared.contains(key.as_str()) {
                out.dropped.push(key);
            } else if let Some(v) = forced.remove(key.as_str()) {
                out.accepted.insert(key, v.clone());
            } else {
                out.accepted.insert(key, value);
            }
        }
        for (key, value) in forced {
            out.accepted.insert(key.to_string(), value.clone());
        }

        if !out.dropped.is_empty() {
            debug!("{}: dropped unknown kwargs {:?}", self.type_name, out.dropped);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[allow(dead_code)]
    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Cluster {
        engine: String,
        #[serde(default)]
        offload: bool,
    }

    impl ConfigSchema for Cluster {}

    fn kwargs(value: Value) -> Kwargs {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_filter_steps() {
        let adapter = Adapter::for_type::<Cluster>(
            AdaptOptions::new().keep("rules").set("engine", "vanilla"),
        )
        .unwrap();
        let out = adapter.filter(kwargs(json!({
            "engine": "vllm",
            "offload": true,
            "rules": {"actor": []},
            "future_knob": 3,
        })));
        assert_eq!(
            Value::Object(out.accepted),
            json!({"engine": "vanilla", "offload": true})
        );
        assert_eq!(Value::Object(out.preserved), json!({"rules": {"actor": []}}));
        assert_eq!(out.dropped, vec!["future_knob".to_string()]);
    }

    #[test]
    fn test_override_without_caller_value() {
        let adapter =
            Adapter::for_type::<Cluster>(AdaptOptions::new().set("engine", "vanilla"))
                .unwrap();
        let out = adapter.filter(Kwargs::new());
        assert_eq!(Value::Object(out.accepted), json!({"engine": "vanilla"}));
    }

    #[test]
    fn test_keep_wins_over_declared() {
        let adapter =
            Adapter::for_type::<Cluster>(AdaptOptions::new().keep("offload")).unwrap();
        let out = adapter.filter(kwargs(json!({"engine": "x", "offload": true})));
        assert_eq!(Value::Object(out.accepted), json!({"engine": "x"}));
        assert_eq!(Value::Object(out.preserved), json!({"offload": true}));
    }

    #[test]
    fn test_undeclared_override_rejected() {
        let err = Adapter::for_type::<Cluster>(AdaptOptions::new().set("speed", 1))
            .unwrap_err();
        assert!(matches!(
            err,
            AdaptError::UndeclaredOverride { ref field, .. } if field == "speed"
        ));
    }
}
