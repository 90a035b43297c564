//! Integration tests for protocol versioning
//!
//! Covers the per-chain version registry, validator-signed registry updates
//! and the per-application version gate.

mod helpers;

use helpers::{
    addr, build_test_relayer, chain_id, with_chain, DUMMY_FEE_TOKEN, DUMMY_REWARD_ADDR, DUMMY_SENDER, HOME_CHAIN,
    REMOTE_CHAIN_A, TEST_NETWORK_ID,
};
use icm_gmp::apps::MessageStore;
use icm_gmp::chain::{ReceiveOutcome, RetryOutcome};
use icm_gmp::crypto;
use icm_gmp::error::IcmError;
use icm_gmp::gateway::Quorum;
use icm_gmp::messenger::MessageInput;
use icm_gmp::primitives::{Address, MessageId};
use icm_gmp::registry::ProtocolVersionPayload;
use icm_gmp::relayer::Relayer;
use std::time::Duration;

const SOURCE: u64 = HOME_CHAIN;
const DESTINATION: u64 = REMOTE_CHAIN_A;

async fn deploy_store(relayer: &Relayer) -> Address {
    with_chain(relayer, DESTINATION, |c| c.deploy(MessageStore::new())).await
}

async fn send(relayer: &Relayer, input: MessageInput) -> MessageId {
    with_chain(relayer, SOURCE, |c| c.send_message(addr(DUMMY_SENDER), input))
        .await
        .unwrap()
}

async fn upgrade_both(relayer: &Relayer) -> Address {
    let (_, endpoint) = with_chain(relayer, SOURCE, |c| c.upgrade_messenger()).await.unwrap();
    let (_, remote_endpoint) = with_chain(relayer, DESTINATION, |c| c.upgrade_messenger())
        .await
        .unwrap();
    assert_eq!(endpoint, remote_endpoint);
    endpoint
}

// ============================================================================
// REGISTRY
// ============================================================================

/// 1. Test: Versions Must Be Added In Order
/// Verifies that skipping a version fails with VersionOutOfOrder and leaves
/// the chain untouched.
/// Why: The latest version only ever advances by one.
#[tokio::test]
async fn test_version_out_of_order_rejected() {
    let relayer = build_test_relayer(&[SOURCE, DESTINATION]);
    with_chain(&relayer, SOURCE, |c| {
        let height = c.height();
        assert_eq!(
            c.add_protocol_version(3, crypto::messenger_address(3)),
            Err(IcmError::VersionOutOfOrder { expected: 2, got: 3 })
        );
        assert_eq!(c.height(), height);
        assert_eq!(c.registry().latest_version(), 1);
        assert!(c.messenger(&crypto::messenger_address(3)).is_none());

        assert_eq!(c.add_protocol_version(2, crypto::messenger_address(2)), Ok(2));
        assert_eq!(c.registry().latest_endpoint(), Ok(crypto::messenger_address(2)));
    })
    .await;
}

/// 2. Test: Upgrade Keeps Old Endpoint Delivering
/// Verifies that a message sent before an upgrade is still delivered through
/// the old endpoint, while new sends go through the new one.
/// Why: Upgrades must not strand in-flight messages.
#[tokio::test]
async fn test_upgrade_keeps_old_endpoint_delivering() {
    let relayer = build_test_relayer(&[SOURCE, DESTINATION]);
    let store = deploy_store(&relayer).await;
    let old = send(&relayer, MessageInput::new(chain_id(DESTINATION), store, b"v1".to_vec())).await;

    let new_endpoint = upgrade_both(&relayer).await;
    let new = send(&relayer, MessageInput::new(chain_id(DESTINATION), store, b"v2".to_vec())).await;
    // Both are the first send of their endpoint; the IDs must still differ.
    assert_ne!(old, new);

    let report = relayer.relay_all(3).await.unwrap();
    assert_eq!(report.delivered, 2);

    with_chain(&relayer, DESTINATION, |c| {
        let v1 = c.messenger(&crypto::messenger_address(1)).unwrap();
        let v2 = c.messenger(&new_endpoint).unwrap();
        assert!(v1.message_received(&old));
        assert!(!v1.message_received(&new));
        assert!(v2.message_received(&new));
    })
    .await;
}

/// 3. Test: Signed Registry Update
/// Verifies that a protocol version authorized by the chain's own validators
/// is applied, and that one not addressed from the registry is refused.
/// Why: Only the validator set may extend the version table.
#[tokio::test]
async fn test_signed_registry_update() {
    let relayer = build_test_relayer(&[SOURCE, DESTINATION]);
    let network = relayer.network();
    let gateway = network.read().await.gateway().clone();
    let payload = ProtocolVersionPayload {
        version: 2,
        endpoint: crypto::messenger_address(2),
    };

    let forged = payload
        .pack(TEST_NETWORK_ID, chain_id(SOURCE), 1, addr(0xbad))
        .unwrap();
    let forged = gateway
        .request_aggregate(&forged, Quorum::default(), Duration::from_secs(1))
        .await
        .unwrap();
    assert!(matches!(
        network.write().await.apply_registry_update(&forged),
        Err(IcmError::InvalidInput(_))
    ));

    let envelope = payload
        .pack(TEST_NETWORK_ID, chain_id(SOURCE), 1, crypto::registry_address())
        .unwrap();
    let signed = gateway
        .request_aggregate(&envelope, Quorum::default(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(network.write().await.apply_registry_update(&signed), Ok(2));

    let latest = network
        .read()
        .await
        .chain(&chain_id(SOURCE))
        .unwrap()
        .registry()
        .latest_version();
    assert_eq!(latest, 2);

    // Replaying the same update is out of order now.
    assert_eq!(
        network.write().await.apply_registry_update(&signed),
        Err(IcmError::VersionOutOfOrder { expected: 3, got: 2 })
    );
}

/// 4. Test: Unsigned Registry Update Rejected
/// Verifies that a registry update without enough validator signatures is refused.
/// Why: The registry must not trust unsigned version announcements.
#[tokio::test]
async fn test_unsigned_registry_update_rejected() {
    let relayer = build_test_relayer(&[SOURCE, DESTINATION]);
    let network = relayer.network();
    let envelope = ProtocolVersionPayload {
        version: 2,
        endpoint: crypto::messenger_address(2),
    }
    .pack(TEST_NETWORK_ID, chain_id(SOURCE), 1, crypto::registry_address())
    .unwrap();
    let unsigned = icm_gmp::codec::SignedEnvelope {
        unsigned: envelope,
        signature: Default::default(),
    };

    let result = network.write().await.apply_registry_update(&unsigned);
    assert!(matches!(result, Err(IcmError::InsufficientQuorum { signed: 0, .. })));
}

// ============================================================================
// MINIMUM VERSIONS
// ============================================================================

/// 5. Test: Message Minimum Destination Version
/// Verifies that a message requiring a newer destination endpoint than the
/// one delivering it is rejected and not marked delivered.
/// Why: Senders can refuse delivery through endpoints they do not trust.
#[tokio::test]
async fn test_message_min_destination_version() {
    let relayer = build_test_relayer(&[SOURCE, DESTINATION]);
    let store = deploy_store(&relayer).await;
    let id = send(
        &relayer,
        MessageInput::new(chain_id(DESTINATION), store, vec![]).with_min_destination_version(2),
    )
    .await;
    let event = with_chain(&relayer, SOURCE, |c| {
        c.latest_messenger().unwrap().sent_event(&id).cloned()
    })
    .await
    .unwrap();

    assert_eq!(
        relayer.relay_message(&event).await,
        Err(IcmError::VersionBelowMinimum { version: 1, minimum: 2 })
    );
    let report = relayer.relay_pending().await.unwrap();
    assert_eq!(report.skipped, 1);
}

/// 6. Test: Application Minimum Version
/// Verifies that an application that raised its minimum version refuses an
/// old endpoint's delivery as a retryable failure, and that the minimum
/// cannot exceed the latest registered version.
/// Why: Applications opt out of deprecated messengers independently.
#[tokio::test]
async fn test_application_min_version() {
    let relayer = build_test_relayer(&[SOURCE, DESTINATION]);
    let store = deploy_store(&relayer).await;
    let id = send(&relayer, MessageInput::new(chain_id(DESTINATION), store, vec![7])).await;

    upgrade_both(&relayer).await;
    with_chain(&relayer, DESTINATION, |c| {
        assert_eq!(
            c.update_min_version(store, 3),
            Err(IcmError::UnknownVersion(3))
        );
        c.update_min_version(store, 2).unwrap();
    })
    .await;

    let report = relayer.relay_pending().await.unwrap();
    assert_eq!(report.execution_failed, 1);

    with_chain(&relayer, DESTINATION, |c| {
        let messenger = c.messenger(&crypto::messenger_address(1)).unwrap();
        assert!(messenger.message_received(&id));
        let store = c.app(&store).unwrap().as_message_store().unwrap();
        assert!(store.messages().is_empty());
    })
    .await;
}

/// 7. Test: Paused Endpoint
/// Verifies that deliveries through a paused endpoint fail with a retryable
/// status and succeed on retry once the endpoint is unpaused.
/// Why: Pausing must be reversible without losing messages.
#[tokio::test]
async fn test_paused_endpoint_then_retry() {
    let relayer = build_test_relayer(&[SOURCE, DESTINATION]);
    let store = deploy_store(&relayer).await;
    let endpoint = crypto::messenger_address(1);
    with_chain(&relayer, DESTINATION, |c| c.pause_endpoint(store, endpoint))
        .await
        .unwrap();

    let id = send(&relayer, MessageInput::new(chain_id(DESTINATION), store, b"p".to_vec())).await;
    let event = with_chain(&relayer, SOURCE, |c| {
        c.latest_messenger().unwrap().sent_event(&id).cloned()
    })
    .await
    .unwrap();

    match relayer.relay_message(&event).await.unwrap() {
        ReceiveOutcome::ExecutionFailed { message_id, reason } => {
            assert_eq!(message_id, id);
            assert!(reason.contains("paused"), "unexpected reason: {}", reason);
        }
        other => panic!("expected ExecutionFailed, got {:?}", other),
    }

    let retried = with_chain(&relayer, DESTINATION, |c| {
        c.unpause_endpoint(store, endpoint).unwrap();
        c.retry_message_execution(endpoint, chain_id(SOURCE), &event.message)
    })
    .await;
    assert_eq!(retried, Ok(RetryOutcome::Executed(id)));
}

// ============================================================================
// RECEIPTS ACROSS VERSIONS
// ============================================================================

/// 8. Test: Receipts Drain On Every Endpoint After Upgrade
/// Verifies that receipts owed by the pre-upgrade endpoint are flushed along
/// with those of the new one, and that each endpoint on the source credits
/// the fee of its own message.
/// Why: After an upgrade nothing sends through the old endpoint, so its
/// receipts would otherwise never travel back and its fees never unlock.
#[tokio::test]
async fn test_receipts_drain_on_every_endpoint_after_upgrade() {
    let relayer = build_test_relayer(&[SOURCE, DESTINATION]);
    let store = deploy_store(&relayer).await;
    let fee_token = addr(DUMMY_FEE_TOKEN);
    with_chain(&relayer, SOURCE, |c| c.mint(fee_token, addr(DUMMY_SENDER), 10))
        .await
        .unwrap();

    let old = send(
        &relayer,
        MessageInput::new(chain_id(DESTINATION), store, b"v1".to_vec()).with_fee(fee_token, 3),
    )
    .await;
    relayer.relay_all(3).await.unwrap();

    let new_endpoint = upgrade_both(&relayer).await;
    let new = send(
        &relayer,
        MessageInput::new(chain_id(DESTINATION), store, b"v2".to_vec()).with_fee(fee_token, 4),
    )
    .await;
    relayer.relay_all(3).await.unwrap();
    assert_ne!(old, new);

    let outstanding = relayer
        .outstanding_receipts(&chain_id(SOURCE), &chain_id(DESTINATION))
        .await
        .unwrap();
    assert_eq!(outstanding, 2);

    let cycles = relayer
        .clear_receipt_queue(chain_id(SOURCE), chain_id(DESTINATION))
        .await
        .unwrap();
    assert_eq!(cycles, 1);
    let outstanding = relayer
        .outstanding_receipts(&chain_id(SOURCE), &chain_id(DESTINATION))
        .await
        .unwrap();
    assert_eq!(outstanding, 0);

    with_chain(&relayer, SOURCE, |c| {
        let reward = addr(DUMMY_REWARD_ADDR);
        let v1 = c.messenger(&crypto::messenger_address(1)).unwrap();
        let v2 = c.messenger(&new_endpoint).unwrap();
        assert!(v1.fee_info(&old).is_none());
        assert!(v2.fee_info(&new).is_none());
        assert_eq!(v1.check_relayer_reward_amount(&reward, &fee_token), 3);
        assert_eq!(v2.check_relayer_reward_amount(&reward, &fee_token), 4);
    })
    .await;
}
