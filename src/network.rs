//! Network of independent chains.
//!
//! Holds every chain, the validator-set history used to verify envelopes and
//! the signature gateway relayers use to obtain aggregates. Chains never touch
//! each other's state; the only path between them is a relayed envelope
//! passing through [`Network::deliver`].

use ed25519_dalek::SigningKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::chain::{Chain, DeliveryRequest, ReceiveOutcome};
use crate::codec::SignedEnvelope;
use crate::config::Config;
use crate::crypto;
use crate::error::IcmError;
use crate::gateway::{LocalAggregator, Quorum, QuorumVerifier, SignatureGateway, Validator, ValidatorRegistry};
use crate::primitives::ChainId;

pub struct Network {
    network_id: u32,
    chains: BTreeMap<ChainId, Chain>,
    verifier: QuorumVerifier,
    gateway: SignatureGateway,
}

impl Network {
    /// Builds the network described by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut builder = NetworkBuilder::new(config.network.network_id).with_quorum(config.network.quorum());
        for chain in &config.chains {
            let keys = if chain.validator_key_envs.is_empty() {
                (0..chain.dev_validators)
                    .map(|i| crypto::dev_validator_key(&chain.chain_id, i))
                    .collect()
            } else {
                chain
                    .get_validator_keys()?
                    .iter()
                    .map(|key| crypto::signing_key_from_base64(key))
                    .collect::<anyhow::Result<Vec<_>>>()?
            };
            builder = builder.add_chain(&chain.name, chain.chain_id, keys, chain.validator_weight);
        }
        Ok(builder.build()?)
    }

    pub fn network_id(&self) -> u32 {
        self.network_id
    }

    pub fn chain(&self, chain_id: &ChainId) -> Option<&Chain> {
        self.chains.get(chain_id)
    }

    pub fn chain_mut(&mut self, chain_id: &ChainId) -> Option<&mut Chain> {
        self.chains.get_mut(chain_id)
    }

    /// Looks a chain up by its configured name.
    pub fn chain_by_name(&self, name: &str) -> Option<&Chain> {
        self.chains.values().find(|c| c.name() == name)
    }

    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.keys().copied().collect()
    }

    pub fn verifier(&self) -> &QuorumVerifier {
        &self.verifier
    }

    pub fn gateway(&self) -> &SignatureGateway {
        &self.gateway
    }

    /// Submits a delivery transaction to `destination`.
    pub fn deliver(
        &mut self,
        destination: &ChainId,
        request: &DeliveryRequest,
    ) -> Result<ReceiveOutcome, IcmError> {
        let chain = self
            .chains
            .get_mut(destination)
            .ok_or(IcmError::UnknownChain(*destination))?;
        chain.receive_message(&self.verifier, request)
    }

    /// Applies a signed protocol version update to the chain that signed it.
    pub fn apply_registry_update(&mut self, signed: &SignedEnvelope) -> Result<u64, IcmError> {
        let chain_id = signed.unsigned.source_chain_id;
        let chain = self
            .chains
            .get_mut(&chain_id)
            .ok_or(IcmError::UnknownChain(chain_id))?;
        chain.apply_signed_registry_update(&self.verifier, signed)
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles chains and validator keys into a [`Network`].
pub struct NetworkBuilder {
    network_id: u32,
    quorum: Quorum,
    chains: Vec<(String, ChainId)>,
    validators: ValidatorRegistry,
    keys: Vec<SigningKey>,
    offline: Vec<[u8; 32]>,
    latency: Option<Duration>,
}

impl NetworkBuilder {
    pub fn new(network_id: u32) -> Self {
        Self {
            network_id,
            quorum: Quorum::default(),
            chains: Vec::new(),
            validators: ValidatorRegistry::new(),
            keys: Vec::new(),
            offline: Vec::new(),
            latency: None,
        }
    }

    pub fn with_quorum(mut self, quorum: Quorum) -> Self {
        self.quorum = quorum;
        self
    }

    /// Adds a chain whose validators hold `keys`, each with `weight`.
    pub fn add_chain(mut self, name: &str, chain_id: ChainId, keys: Vec<SigningKey>, weight: u64) -> Self {
        let validators = keys
            .iter()
            .map(|key| Validator::from_signing_key(key, weight))
            .collect();
        self.validators.register(chain_id, 0, validators);
        self.keys.extend(keys);
        self.chains.push((name.to_string(), chain_id));
        self
    }

    /// Adds a chain with `count` deterministic dev validators of equal weight.
    pub fn add_dev_chain(self, name: &str, chain_id: ChainId, count: u32) -> Self {
        let keys = (0..count)
            .map(|i| crypto::dev_validator_key(&chain_id, i))
            .collect();
        self.add_chain(name, chain_id, keys, 100)
    }

    /// Validator that will not sign anything.
    pub fn with_offline_validator(mut self, public_key: [u8; 32]) -> Self {
        self.offline.push(public_key);
        self
    }

    pub fn with_aggregation_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn build(self) -> Result<Network, IcmError> {
        self.quorum.validate()?;

        let mut chains = BTreeMap::new();
        for (name, chain_id) in self.chains {
            if chains.contains_key(&chain_id) {
                return Err(IcmError::InvalidInput(format!("duplicate chain id {}", chain_id)));
            }
            chains.insert(chain_id, Chain::new(name, self.network_id, chain_id)?);
        }

        let validators = Arc::new(self.validators);
        let verifier = QuorumVerifier::new(validators.clone(), self.quorum);
        let mut aggregator = LocalAggregator::new(validators).with_keys(self.keys);
        for public_key in self.offline {
            aggregator.set_offline(public_key, true);
        }
        if let Some(latency) = self.latency {
            aggregator = aggregator.with_latency(latency);
        }
        let gateway = SignatureGateway::new(Arc::new(aggregator), verifier.clone());

        info!(
            "Network built: network_id={}, chains={}, quorum={}/{}",
            self.network_id,
            chains.len(),
            self.quorum.numerator,
            self.quorum.denominator
        );
        Ok(Network {
            network_id: self.network_id,
            chains,
            verifier,
            gateway,
        })
    }
}
