//! Configuration Management Module
//!
//! Loads the network layout (chains, validator sets, quorum) and relayer
//! settings for the icm-gmp service.
//!
//! Values come from a TOML file and can be overridden by environment
//! variables of the form `ICM_GMP__<SECTION>__<KEY>`, e.g.
//! `ICM_GMP__RELAYER__POLLING_INTERVAL_MS=500`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::gateway::Quorum;
use crate::primitives::{Address, ChainId};

/// Environment variable holding the config file path.
pub const CONFIG_PATH_ENV: &str = "ICM_GMP_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/icm-gmp.toml";
const ENV_PREFIX: &str = "ICM_GMP";
const ENV_SEPARATOR: &str = "__";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    /// Chains taking part in the network; at least one
    pub chains: Vec<ChainConfig>,
    pub relayer: RelayerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network ID stamped into every envelope
    pub network_id: u32,
    #[serde(default = "default_quorum_numerator")]
    pub quorum_numerator: u64,
    #[serde(default = "default_quorum_denominator")]
    pub quorum_denominator: u64,
}

fn default_quorum_numerator() -> u64 {
    67
}

fn default_quorum_denominator() -> u64 {
    100
}

impl NetworkConfig {
    pub fn quorum(&self) -> Quorum {
        Quorum {
            numerator: self.quorum_numerator,
            denominator: self.quorum_denominator,
        }
    }
}

/// One chain of the network and its validator set.
///
/// Validators are either read from environment variables (base64 Ed25519
/// seeds, one variable per validator) or derived deterministically for local
/// development.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// 32-byte chain ID, hex encoded
    pub chain_id: ChainId,
    /// Names of environment variables holding validator keys
    #[serde(default)]
    pub validator_key_envs: Vec<String>,
    /// Number of deterministic dev validators when no key variables are given
    #[serde(default = "default_dev_validators")]
    pub dev_validators: u32,
    #[serde(default = "default_validator_weight")]
    pub validator_weight: u64,
}

fn default_dev_validators() -> u32 {
    4
}

fn default_validator_weight() -> u64 {
    100
}

impl ChainConfig {
    /// Loads validator keys from the configured environment variables.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<String>)` - Base64 encoded keys, in validator order
    /// * `Err(anyhow::Error)` - A variable is not set
    pub fn get_validator_keys(&self) -> anyhow::Result<Vec<String>> {
        self.validator_key_envs
            .iter()
            .map(|env| {
                std::env::var(env).map_err(|_| {
                    anyhow::anyhow!(
                        "Environment variable '{}' not set. Please set it with a validator Ed25519 private key (base64 encoded).",
                        env
                    )
                })
            })
            .collect()
    }
}

/// Relayer service settings.
///
/// The operator key is loaded from the environment at runtime; the file only
/// names the variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerSettings {
    /// Environment variable name containing the operator key (base64 Ed25519 seed)
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// Where relayer rewards are credited; defaults to the operator address
    #[serde(default)]
    pub reward_address: Option<Address>,
    /// Polling interval for new send events in milliseconds
    pub polling_interval_ms: u64,
    /// Deadline for one signature aggregation request in milliseconds
    pub aggregation_timeout_ms: u64,
    /// Largest delivery gas limit the relayer is willing to supply
    #[serde(default = "default_max_gas_limit")]
    pub max_gas_limit: u64,
}

fn default_private_key_env() -> String {
    "ICM_RELAYER_PRIVATE_KEY".to_string()
}

fn default_max_gas_limit() -> u64 {
    15_000_000
}

impl RelayerSettings {
    /// Loads the operator private key from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The private key (base64 encoded)
    /// * `Err(anyhow::Error)` - Failed to load from environment
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.private_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the relayer Ed25519 private key (base64 encoded).",
                self.private_key_env
            )
        })
    }
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - At least one chain is configured
    /// - Chain IDs are non-zero and unique, chain names are unique
    /// - Every chain has at least one validator with non-zero weight
    /// - The quorum is a proper fraction and timing values are non-zero
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - Description of the first problem found
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chains.is_empty() {
            return Err(anyhow::anyhow!("Configuration error: no chains configured."));
        }

        self.network
            .quorum()
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

        let mut chain_ids = HashSet::new();
        let mut names = HashSet::new();
        for chain in &self.chains {
            if chain.chain_id.is_zero() {
                return Err(anyhow::anyhow!(
                    "Configuration error: chain '{}' has a zero chain ID.",
                    chain.name
                ));
            }
            if !chain_ids.insert(chain.chain_id) {
                return Err(anyhow::anyhow!(
                    "Configuration error: chain ID {} is used by more than one chain. Each chain must have a unique chain ID.",
                    chain.chain_id
                ));
            }
            if !names.insert(chain.name.as_str()) {
                return Err(anyhow::anyhow!(
                    "Configuration error: chain name '{}' is used more than once.",
                    chain.name
                ));
            }
            if chain.validator_key_envs.is_empty() && chain.dev_validators == 0 {
                return Err(anyhow::anyhow!(
                    "Configuration error: chain '{}' has no validators.",
                    chain.name
                ));
            }
            if chain.validator_weight == 0 {
                return Err(anyhow::anyhow!(
                    "Configuration error: chain '{}' has zero validator weight.",
                    chain.name
                ));
            }
        }

        if self.relayer.polling_interval_ms == 0 || self.relayer.aggregation_timeout_ms == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: relayer polling interval and aggregation timeout must be non-zero."
            ));
        }

        Ok(())
    }

    /// Loads configuration from the path in `ICM_GMP_CONFIG_PATH`, or
    /// `config/icm-gmp.toml` if unset.
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&config_path)
    }

    /// Loads configuration from a TOML file.
    ///
    /// This function:
    /// 1. Checks that the file exists
    /// 2. Layers `ICM_GMP__*` environment overrides on top of it
    /// 3. Validates the result
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - File missing, unparsable, or invalid
    pub fn load_from(config_path: &str) -> anyhow::Result<Self> {
        if !Path::new(config_path).exists() {
            return Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/icm-gmp.template.toml config/icm-gmp.toml\n\
                Then edit config/icm-gmp.toml with your actual values.",
                config_path
            ));
        }

        let config: Config = ::config::Config::builder()
            .add_source(::config::File::new(config_path, ::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Two-chain local development network with deterministic validators.
    pub fn local_dev() -> Self {
        Self {
            network: NetworkConfig {
                network_id: 1337,
                quorum_numerator: default_quorum_numerator(),
                quorum_denominator: default_quorum_denominator(),
            },
            chains: vec![
                ChainConfig {
                    name: "c-chain".to_string(),
                    chain_id: ChainId::from_low_u64(1),
                    validator_key_envs: Vec::new(),
                    dev_validators: default_dev_validators(),
                    validator_weight: default_validator_weight(),
                },
                ChainConfig {
                    name: "subnet-a".to_string(),
                    chain_id: ChainId::from_low_u64(2),
                    validator_key_envs: Vec::new(),
                    dev_validators: default_dev_validators(),
                    validator_weight: default_validator_weight(),
                },
            ],
            relayer: RelayerSettings {
                private_key_env: default_private_key_env(),
                reward_address: None,
                polling_interval_ms: 2000,
                aggregation_timeout_ms: 5000,
                max_gas_limit: default_max_gas_limit(),
            },
        }
    }
}
