use std::error::Error;

use rlplug_config::ConfigError;
use rlplug_mesh::ShardingError;

#[derive(thiserror::Error, Debug)]
pub enum PlacementError {
    #[error("Sharding error: {0}")]
    Sharding(#[from] ShardingError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Runtime error: {0}")]
    Runtime(Box<dyn Error + Send + Sync + 'static>),
    #[error("Load error: {0}")]
    Load(Box<dyn Error + Send + Sync + 'static>),
}

impl PlacementError {
    pub fn runtime<E>(error: E) -> PlacementError
    where
        E: Error + Send + Sync + 'static,
    {
        PlacementError::Runtime(Box::new(error))
    }

    pub fn load<E>(error: E) -> PlacementError
    where
        E: Error + Send + Sync + 'static,
    {
        PlacementError::Load(Box::new(error))
    }
}
