use std::sync::Arc;

use rlplug_mesh::DeviceMesh;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RolloutEngine;

/// Minimal architecture view consumed by the rollout side (KV-cache sizing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchDescriptor {
    pub num_layers: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
}

/// The fields of the training driver's model config the descriptor is
/// built from. Other fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    pub num_decoder_layers: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
}

impl From<&DecoderConfig> for ArchDescriptor {
    fn from(config: &DecoderConfig) -> Self {
        Self {
            num_layers: config.num_decoder_layers,
            num_kv_heads: config.num_kv_heads,
            head_dim: config.head_dim,
        }
    }
}

/// Models carrying an architecture descriptor.
pub trait Describe {
    fn arch_descriptor(&self) -> Option<&ArchDescriptor>;
    fn set_arch_descriptor(&mut self, descriptor: ArchDescriptor);
}

/// Source of a freshly built model and the mesh it was created on.
pub trait ModelProvider {
    type Model;
    type Error;

    fn get_model(
        &self,
        config: &DecoderConfig,
    ) -> Result<(Self::Model, Arc<DeviceMesh>), Self::Error>;
}

/// Provider wrapper that replaces the descriptor of every retrieved model
/// with one derived from the decoder config.
pub struct ArchOverwrite<P> {
    inner: P,
    enabled: bool,
}

impl<P> ArchOverwrite<P> {
    /// Enabled only for engines that read the descriptor.
    pub fn new(inner: P, engine: &RolloutEngine) -> Self {
        Self {
            inner,
            enabled: engine.overwrites_arch_descriptor(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P> ModelProvider for ArchOverwrite<P>
where
    P: ModelProvider,
    P::Model: Describe,
{
    type Model = P::Model;
    type Error = P::Error;

    fn get_model(
        &self,
        config: &DecoderConfig,
    ) -> Result<(Self::Model, Arc<DeviceMesh>), Self::Error> {
        let (mut model, mesh) = self.inner.get_model(config)?;
        if self.enabled {
            let descriptor = ArchDescriptor::from(config);
            debug!("overwrite arch descriptor: {:?}", descriptor);
            model.set_arch_descriptor(descriptor);
        }
        Ok((model, mesh))
    }
}
