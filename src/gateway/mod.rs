//! Signature Verification Gateway
//!
//! Turns an unsigned envelope into a signed one and decides whether a signed
//! envelope carries enough validator weight to be trusted.
//!
//! ## Pieces
//!
//! - [`ValidatorSetSource`]: who the validators of a chain were at a height
//! - [`Aggregator`]: the opaque signing oracle (async, may be slow or partial)
//! - [`QuorumVerifier`]: recomputes signer weight and enforces the threshold
//! - [`SignatureGateway`]: requests an aggregate under a deadline and verifies it
//!
//! ## Security
//!
//! **CRITICAL**: The verifier is the only thing standing between a relayer and
//! the destination state. Every signature is checked with `verify_strict`, and
//! the threshold comparison is done in 128-bit arithmetic so large weights
//! cannot overflow into acceptance.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codec::{AggregateSignature, SignedEnvelope, UnsignedEnvelope};
use crate::error::IcmError;
use crate::primitives::ChainId;

// ============================================================================
// VALIDATOR SETS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    /// Ed25519 public key
    pub public_key: [u8; 32],
    pub weight: u64,
}

impl Validator {
    pub fn from_signing_key(key: &SigningKey, weight: u64) -> Self {
        Self {
            public_key: key.verifying_key().to_bytes(),
            weight,
        }
    }
}

/// Source of validator sets, indexed by chain and height.
pub trait ValidatorSetSource: Send + Sync {
    /// Validators of `chain_id` in effect at `height`, in signer-bitmap order.
    fn validators_at(&self, chain_id: &ChainId, height: u64) -> Result<Vec<Validator>, IcmError>;
}

/// In-memory validator set history. A set registered at height `h` applies
/// to every height `>= h` until the next registration.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    sets: HashMap<ChainId, BTreeMap<u64, Vec<Validator>>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, chain_id: ChainId, from_height: u64, validators: Vec<Validator>) {
        info!(
            "Validator set registered: chain={}, from_height={}, validators={}",
            chain_id,
            from_height,
            validators.len()
        );
        self.sets
            .entry(chain_id)
            .or_default()
            .insert(from_height, validators);
    }
}

impl ValidatorSetSource for ValidatorRegistry {
    fn validators_at(&self, chain_id: &ChainId, height: u64) -> Result<Vec<Validator>, IcmError> {
        self.sets
            .get(chain_id)
            .and_then(|history| history.range(..=height).next_back())
            .map(|(_, set)| set.clone())
            .filter(|set| !set.is_empty())
            .ok_or(IcmError::UnknownValidatorSet(*chain_id))
    }
}

// ============================================================================
// QUORUM
// ============================================================================

/// Fraction of total validator weight that must sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quorum {
    pub numerator: u64,
    pub denominator: u64,
}

impl Default for Quorum {
    fn default() -> Self {
        Self {
            numerator: 67,
            denominator: 100,
        }
    }
}

impl Quorum {
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, IcmError> {
        let quorum = Self {
            numerator,
            denominator,
        };
        quorum.validate()?;
        Ok(quorum)
    }

    pub fn validate(&self) -> Result<(), IcmError> {
        if self.denominator == 0 || self.numerator == 0 || self.numerator > self.denominator {
            return Err(IcmError::InvalidInput(format!(
                "quorum {}/{} must satisfy 0 < numerator <= denominator",
                self.numerator, self.denominator
            )));
        }
        Ok(())
    }

    /// `signed / total >= numerator / denominator`
    pub fn is_met(&self, signed: u64, total: u64) -> bool {
        (signed as u128) * (self.denominator as u128) >= (total as u128) * (self.numerator as u128)
    }
}

/// Checks signed envelopes against the validator set of their source chain.
#[derive(Clone)]
pub struct QuorumVerifier {
    validators: Arc<dyn ValidatorSetSource>,
    quorum: Quorum,
}

impl QuorumVerifier {
    pub fn new(validators: Arc<dyn ValidatorSetSource>, quorum: Quorum) -> Self {
        Self { validators, quorum }
    }

    pub fn quorum(&self) -> Quorum {
        self.quorum
    }

    pub fn validators(&self) -> Arc<dyn ValidatorSetSource> {
        Arc::clone(&self.validators)
    }

    /// Verifies `signed` against the default quorum. Returns the signed weight.
    pub fn verify_quorum(&self, signed: &SignedEnvelope) -> Result<u64, IcmError> {
        self.verify_quorum_with(signed, self.quorum)
    }

    /// Verifies `signed` against `quorum`.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Total weight of valid signers
    /// * `Err(IcmError::UnknownValidatorSet)` - No set for the source chain at the envelope height
    /// * `Err(IcmError::InvalidSignature)` - Bitmap out of range, count mismatch or bad signature
    /// * `Err(IcmError::InsufficientQuorum)` - Signed weight below threshold
    pub fn verify_quorum_with(&self, signed: &SignedEnvelope, quorum: Quorum) -> Result<u64, IcmError> {
        quorum.validate()?;
        let envelope = &signed.unsigned;
        let validators = self
            .validators
            .validators_at(&envelope.source_chain_id, envelope.height)?;

        let indices = signed.signature.signer_indices();
        if indices.len() != signed.signature.signatures.len() {
            return Err(IcmError::InvalidSignature(format!(
                "{} signers marked but {} signatures supplied",
                indices.len(),
                signed.signature.signatures.len()
            )));
        }

        let digest = envelope.digest()?;
        let mut signed_weight: u64 = 0;
        for (index, signature_bytes) in indices.iter().zip(&signed.signature.signatures) {
            let validator = validators.get(*index).ok_or_else(|| {
                IcmError::InvalidSignature(format!(
                    "signer index {} outside validator set of {}",
                    index,
                    validators.len()
                ))
            })?;
            let verifying_key = VerifyingKey::from_bytes(&validator.public_key)
                .map_err(|e| IcmError::InvalidSignature(format!("validator {}: {}", index, e)))?;
            let signature = Signature::from_bytes(signature_bytes);
            verifying_key
                .verify_strict(&digest, &signature)
                .map_err(|e| IcmError::InvalidSignature(format!("validator {}: {}", index, e)))?;
            signed_weight = signed_weight
                .checked_add(validator.weight)
                .ok_or(IcmError::ArithmeticOverflow)?;
        }

        let total_weight = validators.iter().try_fold(0u64, |acc, v| {
            acc.checked_add(v.weight).ok_or(IcmError::ArithmeticOverflow)
        })?;

        if total_weight == 0 || !quorum.is_met(signed_weight, total_weight) {
            warn!(
                "Insufficient quorum: chain={}, height={}, signed={}/{}",
                envelope.source_chain_id, envelope.height, signed_weight, total_weight
            );
            return Err(IcmError::InsufficientQuorum {
                signed: signed_weight,
                total: total_weight,
                numerator: quorum.numerator,
                denominator: quorum.denominator,
            });
        }

        debug!(
            "Quorum verified: chain={}, height={}, signed={}/{}",
            envelope.source_chain_id, envelope.height, signed_weight, total_weight
        );
        Ok(signed_weight)
    }
}

// ============================================================================
// AGGREGATION ORACLE
// ============================================================================

/// Opaque service that collects validator signatures over an envelope.
///
/// The result may fall short of `quorum`; callers verify it before use.
pub trait Aggregator: Send + Sync {
    fn aggregate<'a>(
        &'a self,
        envelope: &'a UnsignedEnvelope,
        quorum: Quorum,
    ) -> BoxFuture<'a, Result<AggregateSignature, IcmError>>;
}

/// Aggregator backed by signing keys held in process.
///
/// Individual validators can be marked offline to simulate partial
/// participation, and an artificial latency can be injected.
pub struct LocalAggregator {
    validators: Arc<dyn ValidatorSetSource>,
    keys: HashMap<[u8; 32], SigningKey>,
    offline: HashSet<[u8; 32]>,
    latency: Option<Duration>,
}

impl LocalAggregator {
    pub fn new(validators: Arc<dyn ValidatorSetSource>) -> Self {
        Self {
            validators,
            keys: HashMap::new(),
            offline: HashSet::new(),
            latency: None,
        }
    }

    pub fn with_keys(mut self, keys: impl IntoIterator<Item = SigningKey>) -> Self {
        for key in keys {
            self.add_signing_key(key);
        }
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_signing_key(&mut self, key: SigningKey) {
        self.keys.insert(key.verifying_key().to_bytes(), key);
    }

    pub fn set_offline(&mut self, public_key: [u8; 32], offline: bool) {
        if offline {
            self.offline.insert(public_key);
        } else {
            self.offline.remove(&public_key);
        }
    }

    fn sign(&self, envelope: &UnsignedEnvelope) -> Result<AggregateSignature, IcmError> {
        let validators = self
            .validators
            .validators_at(&envelope.source_chain_id, envelope.height)?;
        let digest = envelope.digest()?;

        let mut aggregate = AggregateSignature::default();
        for (index, validator) in validators.iter().enumerate() {
            if self.offline.contains(&validator.public_key) {
                continue;
            }
            let Some(key) = self.keys.get(&validator.public_key) else {
                continue;
            };
            aggregate.set_signer(index);
            aggregate.signatures.push(key.sign(&digest).to_bytes());
        }

        if aggregate.signatures.is_empty() {
            return Err(IcmError::AggregationFailed(format!(
                "no validator of chain {} signed at height {}",
                envelope.source_chain_id, envelope.height
            )));
        }
        debug!(
            "Aggregated {} of {} signatures for chain {}",
            aggregate.signatures.len(),
            validators.len(),
            envelope.source_chain_id
        );
        Ok(aggregate)
    }
}

impl Aggregator for LocalAggregator {
    fn aggregate<'a>(
        &'a self,
        envelope: &'a UnsignedEnvelope,
        _quorum: Quorum,
    ) -> BoxFuture<'a, Result<AggregateSignature, IcmError>> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.sign(envelope)
        })
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

/// Requests aggregates under a deadline and verifies them before handing them out.
#[derive(Clone)]
pub struct SignatureGateway {
    aggregator: Arc<dyn Aggregator>,
    verifier: QuorumVerifier,
}

impl SignatureGateway {
    pub fn new(aggregator: Arc<dyn Aggregator>, verifier: QuorumVerifier) -> Self {
        Self {
            aggregator,
            verifier,
        }
    }

    pub fn verifier(&self) -> &QuorumVerifier {
        &self.verifier
    }

    /// Obtains a signed envelope meeting `quorum` within `deadline`.
    ///
    /// A timed-out request is abandoned; the caller retries with a fresh request.
    pub async fn request_aggregate(
        &self,
        envelope: &UnsignedEnvelope,
        quorum: Quorum,
        deadline: Duration,
    ) -> Result<SignedEnvelope, IcmError> {
        let signature = tokio::time::timeout(deadline, self.aggregator.aggregate(envelope, quorum))
            .await
            .map_err(|_| IcmError::AggregationTimedOut(deadline.as_millis() as u64))??;

        let signed = SignedEnvelope {
            unsigned: envelope.clone(),
            signature,
        };
        self.verifier.verify_quorum_with(&signed, quorum)?;
        Ok(signed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
