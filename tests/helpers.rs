//! Shared test helpers for integration tests
//!
//! - **Constants**: network, chain and account identifiers
//! - **Builders**: dev networks and relayers over them
//! - **Chain access**: short async wrappers around the relayer's shared network

#![allow(dead_code)]

use icm_gmp::chain::Chain;
use icm_gmp::network::{Network, NetworkBuilder};
use icm_gmp::primitives::{Address, ChainId};
use icm_gmp::relayer::{Relayer, RelayerConfig};
use icm_gmp::token::TokenTransferrer;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const TEST_NETWORK_ID: u32 = 1337;

// -------------------------------- CHAINS --------------------------------

pub const HOME_CHAIN: u64 = 1;
pub const REMOTE_CHAIN_A: u64 = 2;
pub const REMOTE_CHAIN_B: u64 = 3;

/// Dev validators per test chain
pub const TEST_VALIDATORS: u32 = 4;

// -------------------------------- USERS ---------------------------------

pub const DUMMY_SENDER: u64 = 0x5e;
pub const DUMMY_RECIPIENT: u64 = 0x7e;
pub const DUMMY_FALLBACK: u64 = 0xfb;
pub const DUMMY_RELAYER: u64 = 0x7e1a;
pub const DUMMY_REWARD_ADDR: u64 = 0x7e3a;
pub const DUMMY_OTHER_RELAYER: u64 = 0x07e7;

/// Fee token used by messaging tests
pub const DUMMY_FEE_TOKEN: u64 = 0xfee;
/// Canonical ERC20 on the home chain
pub const DUMMY_HOME_TOKEN: u64 = 0x70c3;

pub fn chain_id(n: u64) -> ChainId {
    ChainId::from_low_u64(n)
}

pub fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

// ============================================================================
// BUILDERS
// ============================================================================

/// Dev network with the given chains, each with [`TEST_VALIDATORS`] validators.
pub fn build_test_network(chains: &[u64]) -> Network {
    chains
        .iter()
        .fold(NetworkBuilder::new(TEST_NETWORK_ID), |builder, n| {
            builder.add_dev_chain(&format!("chain-{}", n), chain_id(*n), TEST_VALIDATORS)
        })
        .build()
        .expect("test network should build")
}

pub fn build_test_relayer_config() -> RelayerConfig {
    RelayerConfig {
        relayer_address: addr(DUMMY_RELAYER),
        reward_address: addr(DUMMY_REWARD_ADDR),
        polling_interval_ms: 10,
        aggregation_timeout_ms: 1000,
        max_gas_limit: 15_000_000,
    }
}

pub fn build_test_relayer(chains: &[u64]) -> Relayer {
    Relayer::new(build_test_relayer_config(), build_test_network(chains))
}

// ============================================================================
// CHAIN ACCESS
// ============================================================================

/// Runs `f` against chain `n` under the network write lock.
pub async fn with_chain<T>(relayer: &Relayer, n: u64, f: impl FnOnce(&mut Chain) -> T) -> T {
    let network = relayer.network();
    let mut network = network.write().await;
    let chain = network.chain_mut(&chain_id(n)).expect("chain should exist");
    f(chain)
}

pub async fn balance(relayer: &Relayer, n: u64, token: Address, holder: Address) -> u128 {
    with_chain(relayer, n, |c| c.balance_of(&token, &holder)).await
}

// ============================================================================
// TOKEN BRIDGE SETUP
// ============================================================================

/// A home ERC20 transferrer plus one registered ERC20 remote per remote chain.
pub struct Erc20Bridge {
    pub home: Address,
    pub home_token: Address,
    pub remotes: Vec<(u64, Address)>,
}

impl Erc20Bridge {
    pub fn remote(&self, n: u64) -> Address {
        self.remotes
            .iter()
            .find(|(c, _)| *c == n)
            .map(|(_, a)| *a)
            .expect("remote should exist")
    }
}

/// Deploys and registers a home ERC20 bridge with `decimals` on every remote.
///
/// `funded` receives `supply` of the home token.
pub async fn deploy_erc20_bridge(
    relayer: &Relayer,
    home_decimals: u8,
    remotes: &[(u64, u8)],
    funded: Address,
    supply: u128,
) -> Erc20Bridge {
    let home_token = addr(DUMMY_HOME_TOKEN);
    let home = with_chain(relayer, HOME_CHAIN, |c| {
        c.mint(home_token, funded, supply).unwrap();
        c.deploy(TokenTransferrer::home_erc20(home_token, home_decimals))
    })
    .await;

    let mut deployed = Vec::new();
    for (n, decimals) in remotes {
        let remote = with_chain(relayer, *n, |c| {
            let remote = c.deploy(
                TokenTransferrer::remote_erc20(chain_id(HOME_CHAIN), home, home_decimals, *decimals).unwrap(),
            );
            c.register_with_home(remote, funded, Address::ZERO, 0).unwrap();
            remote
        })
        .await;
        deployed.push((*n, remote));
    }
    relayer.relay_all(4).await.unwrap();

    Erc20Bridge {
        home,
        home_token,
        remotes: deployed,
    }
}
