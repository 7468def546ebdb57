use std::{any::TypeId, sync::Arc};

use lazy_static::lazy_static;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    Kwargs,
    adapter::{AdaptOptions, Adapter, ConfigSchema},
    error::{AdaptError, ConfigError},
    side_table::IdentityTable,
};

lazy_static! {
    static ref REGISTRY: AdapterRegistry = AdapterRegistry::new();
}

/// The process-wide registry used by configuration constructors.
pub fn registry() -> &'static AdapterRegistry {
    &REGISTRY
}

/// Table of adapted configuration types plus the side table holding
/// preserved kwargs of frozen instances.
///
/// Adaptation is expected during single-threaded startup; the maps are
/// concurrent only so the registry can live in a `static`.
pub struct AdapterRegistry {
    adapters: scc::HashMap<TypeId, Arc<Adapter>>,
    extra_fields: IdentityTable<Kwargs>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: scc::HashMap::new(),
            extra_fields: IdentityTable::new(),
        }
    }

    /// Wraps the constructor of `T`. Adapting an already adapted type is a
    /// no-op: the first adaptation stays in effect and nothing is re-wrapped.
    pub fn adapt<T: ConfigSchema>(&self, options: AdaptOptions) -> Result<(), AdaptError> {
        let type_id = TypeId::of::<T>();
        if self.adapters.contains(&type_id) {
            debug!("{} already adapted", std::any::type_name::<T>());
            return Ok(());
        }
        let adapter = Adapter::for_type::<T>(options)?;
        info!(
            "adapt {} (declared: {:?}, keep: {:?}, override: {:?})",
            adapter.type_name(),
            adapter.declared(),
            adapter.options().kept(),
            adapter.options().overrides().keys().collect::<Vec<_>>()
        );
        let _ = self.adapters.insert(type_id, Arc::new(adapter));
        Ok(())
    }

    pub fn is_adapted<T: ConfigSchema>(&self) -> bool {
        self.adapters.contains(&TypeId::of::<T>())
    }

    pub fn adapter<T: ConfigSchema>(&self) -> Option<Arc<Adapter>> {
        self.adapters
            .read(&TypeId::of::<T>(), |_, adapter| adapter.clone())
    }

    /// Builds a `T` from keyword arguments.
    ///
    /// Unadapted types go straight to the schema-checked constructor, which
    /// rejects unknown fields. Adapted types have kept keys set aside,
    /// unknown keys dropped and overrides applied first; kept keys then land
    /// in the instance's extras slot, or in the side table for frozen types.
    pub fn construct<T: ConfigSchema>(&self, kwargs: Kwargs) -> Result<Arc<T>, ConfigError> {
        let Some(adapter) = self.adapter::<T>() else {
            let value = serde_json::from_value::<T>(Value::Object(kwargs))?;
            return Ok(Arc::new(value));
        };

        let filtered = adapter.filter(kwargs);
        let mut value = serde_json::from_value::<T>(Value::Object(filtered.accepted))?;
        if filtered.preserved.is_empty() {
            return Ok(Arc::new(value));
        }

        match value.extra_fields_mut() {
            Some(slot) => {
                slot.extend(filtered.preserved);
                Ok(Arc::new(value))
            }
            None => {
                let value = Arc::new(value);
                self.extra_fields.put(&value, filtered.preserved);
                Ok(value)
            }
        }
    }

    /// Preserved kwargs recorded for a frozen instance.
    pub fn extra_fields<T: ?Sized>(&self, object: &Arc<T>) -> Option<Kwargs> {
        self.extra_fields.get(object)
    }

    pub fn side_table(&self) -> &IdentityTable<Kwargs> {
        &self.extra_fields
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
