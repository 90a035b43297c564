//! Multi-hop routing table of a token home.
//!
//! A multi-hop transfer moves tokens from one remote to another through the
//! home. Only pairs configured here are forwarded; everything else falls back
//! to the sender-chosen recipient on the home chain.

use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use super::home::RemoteTokenTransferrerSettings;
use crate::error::IcmError;
use crate::primitives::{Address, ChainId};

/// `(chain, transferrer address)` of a registered remote.
pub type RemoteKey = (ChainId, Address);

#[derive(Debug, Clone, Default)]
pub struct MultiHopRouter {
    routes: HashSet<(RemoteKey, RemoteKey)>,
}

impl MultiHopRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows transfers between `a` and `b` in both directions.
    ///
    /// # Returns
    ///
    /// * `Err(IcmError::UnknownRemote)` - Either side is not registered with the home
    /// * `Err(IcmError::IncompatibleScaling)` - The two remotes scale differently
    pub fn configure_route(
        &mut self,
        remotes: &HashMap<RemoteKey, RemoteTokenTransferrerSettings>,
        a: RemoteKey,
        b: RemoteKey,
    ) -> Result<(), IcmError> {
        if a == b {
            return Err(IcmError::InvalidInput(
                "multi-hop route endpoints must differ".to_string(),
            ));
        }
        let settings_a = lookup(remotes, &a)?;
        let settings_b = lookup(remotes, &b)?;

        if settings_a.token_multiplier != settings_b.token_multiplier
            || settings_a.multiply_on_remote != settings_b.multiply_on_remote
        {
            warn!(
                "Rejected multi-hop route {}:{} <-> {}:{}: multipliers {} ({}) vs {} ({})",
                a.0,
                a.1,
                b.0,
                b.1,
                settings_a.token_multiplier,
                settings_a.multiply_on_remote,
                settings_b.token_multiplier,
                settings_b.multiply_on_remote
            );
            return Err(IcmError::IncompatibleScaling);
        }

        self.routes.insert((a, b));
        self.routes.insert((b, a));
        info!("Multi-hop route configured: {}:{} <-> {}:{}", a.0, a.1, b.0, b.1);
        Ok(())
    }

    pub fn remove_route(&mut self, a: RemoteKey, b: RemoteKey) {
        self.routes.remove(&(a, b));
        self.routes.remove(&(b, a));
    }

    pub fn route_allowed(&self, from: &RemoteKey, to: &RemoteKey) -> bool {
        self.routes.contains(&(*from, *to))
    }
}

fn lookup(
    remotes: &HashMap<RemoteKey, RemoteTokenTransferrerSettings>,
    key: &RemoteKey,
) -> Result<RemoteTokenTransferrerSettings, IcmError> {
    remotes.get(key).copied().ok_or(IcmError::UnknownRemote {
        chain_id: key.0,
        address: key.1,
    })
}
