mod common;

use common::{actor_rules, kwargs, mesh, mesh_json};
use rlplug_config::{AdaptError, AdaptOptions, AdapterRegistry, ConfigError, registry};
use rlplug_mesh::MemoryKind;
use rlplug_reshard::{
    ClusterConfig, PluginConfig, ROLE_AXIS_RULES_KEY, RlCluster, Role, RolloutConfig,
    install,
};
use serde_json::json;

fn role_map() -> serde_json::Value {
    json!({"actor": mesh_json(&mesh(&[("fsdp", 2)], 0))})
}

#[test]
fn test_cluster_config_keeps_axis_rules_aside() {
    install(&PluginConfig::default()).unwrap();
    let config = ClusterConfig::from_kwargs(kwargs(json!({
        "role_to_mesh": role_map(),
        "default_memory_kind": "pinned_host",
        "role_to_logical_axis_rule": {"actor": actor_rules()},
        "training_mode": "grpo",
    })))
    .unwrap();
    assert_eq!(config.default_memory_kind, MemoryKind::PinnedHost);

    let extra = registry().extra_fields(&config).unwrap();
    assert_eq!(extra.get(ROLE_AXIS_RULES_KEY), Some(&json!({"actor": actor_rules()})));
    assert!(!extra.contains_key("training_mode"));

    let cluster = RlCluster::new(config, ());
    assert!(cluster.role_axis_rules().get(Role::Actor).is_some());
    assert!(cluster.role_axis_rules().get(Role::Rollout).is_none());
}

#[test]
fn test_rollout_engine_override_wins() {
    install(&PluginConfig::default()).unwrap();
    let config = ClusterConfig::from_kwargs(kwargs(json!({
        "role_to_mesh": role_map(),
        "rollout_engine": "vllm",
    })))
    .unwrap();
    assert_eq!(config.rollout_engine, "vanilla");

    let config = ClusterConfig::from_kwargs(kwargs(json!({"role_to_mesh": role_map()})))
        .unwrap();
    assert_eq!(config.rollout_engine, "vanilla");
    assert!(registry().extra_fields(&config).is_none());
}

#[test]
fn test_install_is_idempotent() {
    install(&PluginConfig::default()).unwrap();
    let vllm = PluginConfig {
        rollout_engine: "vllm".to_string(),
    };
    install(&vllm).unwrap();

    let adapter = registry().adapter::<ClusterConfig>().unwrap();
    assert_eq!(adapter.options().overrides().get("rollout_engine"), Some(&json!("vanilla")));
    assert!(adapter.options().kept().contains(ROLE_AXIS_RULES_KEY));
    assert!(registry().is_adapted::<RolloutConfig>());
}

#[test]
fn test_rollout_config_drops_unknown_fields() {
    install(&PluginConfig::default()).unwrap();
    let rollout = RolloutConfig::from_kwargs(kwargs(json!({
        "max_tokens_to_generate": 256,
        "temperature": 0.7,
        "rollout_vllm_model_version": "gemma-2b",
    })))
    .unwrap();
    assert_eq!(rollout.max_tokens_to_generate, 256);
    assert_eq!(rollout.max_prompt_length, 64);
    assert_eq!(rollout.kv_cache_size, 1024);
    assert!(rollout.extra.is_empty());
    assert!(rollout.extra("rollout_vllm_model_version").is_none());
}

#[test]
fn test_unadapted_registry_is_strict() {
    let local = AdapterRegistry::new();
    let err = local
        .construct::<ClusterConfig>(kwargs(json!({
            "role_to_mesh": role_map(),
            "role_to_logical_axis_rule": {},
        })))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Schema(_)));

    // Type errors on declared fields are not swallowed by the adapter.
    local.adapt::<ClusterConfig>(AdaptOptions::new()).unwrap();
    let err = local
        .construct::<ClusterConfig>(kwargs(json!({
            "role_to_mesh": role_map(),
            "offload_to_cpu": "yes",
        })))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Schema(_)));
}

#[test]
fn test_override_must_be_declared() {
    let local = AdapterRegistry::new();
    let err = local
        .adapt::<RolloutConfig>(AdaptOptions::new().set("engine_version", "v2"))
        .unwrap_err();
    assert!(matches!(
        err,
        AdaptError::UndeclaredOverride { ref field, .. } if field == "engine_version"
    ));
    assert!(!local.is_adapted::<RolloutConfig>());
}

#[test]
fn test_mutable_config_attaches_kept_fields() {
    let local = AdapterRegistry::new();
    local
        .adapt::<RolloutConfig>(AdaptOptions::new().keep("engine_version"))
        .unwrap();
    let rollout = local
        .construct::<RolloutConfig>(kwargs(json!({
            "engine_version": "v2",
            "unknown": 1,
        })))
        .unwrap();
    assert_eq!(rollout.extra("engine_version"), Some(&json!("v2")));
    assert!(rollout.extra("unknown").is_none());
    assert!(local.side_table().is_empty());
}
