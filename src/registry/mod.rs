//! Protocol Version Registry
//!
//! Each chain keeps a table mapping protocol versions to messenger endpoint
//! addresses. Versions are added strictly in sequence (`latest + 1`), so the
//! latest version only ever moves forward. Applications consult the registry
//! through a [`VersionGate`] to refuse deliveries from endpoints that are too
//! old or have been paused.

use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

use crate::codec::{self, AddressedCall, UnsignedEnvelope};
use crate::error::IcmError;
use crate::primitives::{Address, ChainId};

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    address: Address,
    chain_id: ChainId,
    versions: BTreeMap<u64, Address>,
    latest_version: u64,
}

impl ProtocolRegistry {
    /// Creates an empty registry deployed at `address` on `chain_id`.
    pub fn new(address: Address, chain_id: ChainId) -> Self {
        Self {
            address,
            chain_id,
            versions: BTreeMap::new(),
            latest_version: 0,
        }
    }

    /// Creates a registry pre-populated with `entries`, which must be `1..=n` in order.
    pub fn with_initial_versions(
        address: Address,
        chain_id: ChainId,
        entries: &[(u64, Address)],
    ) -> Result<Self, IcmError> {
        let mut registry = Self::new(address, chain_id);
        for (version, endpoint) in entries {
            registry.add_protocol_version(*version, *endpoint)?;
        }
        Ok(registry)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Registers `endpoint` as `version`. Only `latest_version + 1` is accepted.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - The new latest version
    /// * `Err(IcmError::VersionOutOfOrder)` - `version` is not the next version
    /// * `Err(IcmError::InvalidInput)` - Zero or already-registered endpoint address
    pub fn add_protocol_version(&mut self, version: u64, endpoint: Address) -> Result<u64, IcmError> {
        let expected = self
            .latest_version
            .checked_add(1)
            .ok_or(IcmError::ArithmeticOverflow)?;
        if version != expected {
            return Err(IcmError::VersionOutOfOrder {
                expected,
                got: version,
            });
        }
        if endpoint.is_zero() {
            return Err(IcmError::InvalidInput(
                "protocol endpoint address must be non-zero".to_string(),
            ));
        }
        if self.versions.values().any(|a| *a == endpoint) {
            return Err(IcmError::InvalidInput(format!(
                "endpoint {} is already registered",
                endpoint
            )));
        }

        let old_version = self.latest_version;
        self.versions.insert(version, endpoint);
        self.latest_version = version;

        info!(
            "Protocol version added: chain={}, version={}, endpoint={}, latest {} -> {}",
            self.chain_id, version, endpoint, old_version, version
        );
        Ok(version)
    }

    pub fn endpoint_for_version(&self, version: u64) -> Result<Address, IcmError> {
        self.versions
            .get(&version)
            .copied()
            .ok_or(IcmError::UnknownVersion(version))
    }

    pub fn version_of(&self, endpoint: &Address) -> Result<u64, IcmError> {
        self.versions
            .iter()
            .find(|(_, a)| *a == endpoint)
            .map(|(v, _)| *v)
            .ok_or(IcmError::UnknownEndpoint(*endpoint))
    }

    pub fn latest_version(&self) -> u64 {
        self.latest_version
    }

    pub fn latest_endpoint(&self) -> Result<Address, IcmError> {
        self.endpoint_for_version(self.latest_version)
    }
}

// ============================================================================
// SIGNED REGISTRY UPDATES
// ============================================================================

/// Off-chain message authorizing a new protocol version.
///
/// It is signed by the chain's own validators and addressed from the registry
/// contract itself, so only the validator set can extend the table.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProtocolVersionPayload {
    pub version: u64,
    pub endpoint: Address,
}

impl ProtocolVersionPayload {
    pub fn pack(
        &self,
        network_id: u32,
        chain_id: ChainId,
        height: u64,
        registry_address: Address,
    ) -> Result<UnsignedEnvelope, IcmError> {
        let call = AddressedCall {
            source_address: registry_address,
            payload: codec::encode(self)?,
        };
        UnsignedEnvelope::new(network_id, chain_id, height, &call)
    }

    /// Returns `(source_address, payload)`.
    pub fn unpack(envelope: &UnsignedEnvelope) -> Result<(Address, Self), IcmError> {
        let call = envelope.addressed_call()?;
        Ok((call.source_address, codec::decode(&call.payload)?))
    }
}

// ============================================================================
// APPLICATION VERSION GATE
// ============================================================================

/// Per-application policy over which messenger endpoints may deliver to it.
#[derive(Debug, Clone)]
pub struct VersionGate {
    min_version: u64,
    paused: HashSet<Address>,
}

impl Default for VersionGate {
    fn default() -> Self {
        Self::new(1)
    }
}

impl VersionGate {
    pub fn new(min_version: u64) -> Self {
        Self {
            min_version,
            paused: HashSet::new(),
        }
    }

    pub fn min_version(&self) -> u64 {
        self.min_version
    }

    /// Checks that `endpoint` is registered, not paused and at least `min_version`.
    pub fn check(&self, registry: &ProtocolRegistry, endpoint: &Address) -> Result<u64, IcmError> {
        if self.paused.contains(endpoint) {
            return Err(IcmError::EndpointPaused(*endpoint));
        }
        let version = registry.version_of(endpoint)?;
        if version < self.min_version {
            return Err(IcmError::VersionBelowMinimum {
                version,
                minimum: self.min_version,
            });
        }
        Ok(version)
    }

    /// Raises the minimum version. It can never decrease or exceed the registry's latest.
    pub fn update_min_version(
        &mut self,
        registry: &ProtocolRegistry,
        new_min_version: u64,
    ) -> Result<(), IcmError> {
        if new_min_version <= self.min_version {
            return Err(IcmError::InvalidInput(format!(
                "minimum version must increase (current {}, requested {})",
                self.min_version, new_min_version
            )));
        }
        if new_min_version > registry.latest_version() {
            return Err(IcmError::UnknownVersion(new_min_version));
        }
        info!(
            "Minimum protocol version updated: {} -> {}",
            self.min_version, new_min_version
        );
        self.min_version = new_min_version;
        Ok(())
    }

    pub fn pause_endpoint(&mut self, endpoint: Address) {
        self.paused.insert(endpoint);
    }

    pub fn unpause_endpoint(&mut self, endpoint: &Address) {
        self.paused.remove(endpoint);
    }
}

// ============================================================================
// TESTS
// ============================================================================
