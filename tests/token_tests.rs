//! Integration tests for the token transfer layer
//!
//! Home and remote transferrers are deployed on dev chains and every
//! cross-chain step goes through the relayer.

mod helpers;

use helpers::{
    addr, balance, build_test_relayer, chain_id, deploy_erc20_bridge, with_chain, DUMMY_FALLBACK,
    DUMMY_RECIPIENT, DUMMY_SENDER, HOME_CHAIN, REMOTE_CHAIN_A, REMOTE_CHAIN_B,
};
use icm_gmp::apps::CallReceiver;
use icm_gmp::chain::ReceiveOutcome;
use icm_gmp::crypto;
use icm_gmp::error::{ErrorKind, IcmError};
use icm_gmp::ledger::NATIVE_TOKEN;
use icm_gmp::messenger::MessageInput;
use icm_gmp::primitives::Address;
use icm_gmp::relayer::Relayer;
use icm_gmp::token::{SendAndCallInput, SendTokensInput, TokenTransferrer, TransferrerMessage};

const E12: u128 = 1_000_000_000_000;

// ============================================================================
// HELPERS
// ============================================================================

/// Deploys a native home on the home chain and a native remote on chain A
/// declaring `imbalance`, and relays the registration.
async fn deploy_native_bridge(relayer: &Relayer, imbalance: u128) -> (Address, Address) {
    let home = with_chain(relayer, HOME_CHAIN, |c| c.deploy(TokenTransferrer::home_native())).await;
    let remote = with_chain(relayer, REMOTE_CHAIN_A, |c| {
        let remote = c.deploy(TokenTransferrer::remote_native(chain_id(HOME_CHAIN), home, 18, imbalance).unwrap());
        c.register_with_home(remote, addr(DUMMY_SENDER), NATIVE_TOKEN, 0).unwrap();
        remote
    })
    .await;
    relayer.relay_all(3).await.unwrap();
    (home, remote)
}

/// Sends `amount` from the home to `recipient` on remote chain `n` and relays it.
async fn fund_remote(relayer: &Relayer, home: Address, n: u64, remote: Address, recipient: Address, amount: u128) {
    with_chain(relayer, HOME_CHAIN, |c| {
        c.send_tokens(home, addr(DUMMY_SENDER), &SendTokensInput::new(chain_id(n), remote, recipient), amount)
    })
    .await
    .unwrap();
    relayer.relay_all(3).await.unwrap();
}

// ============================================================================
// COLLATERAL
// ============================================================================

/// 1. Test: Native Remote Collateralization
/// Verifies that a remote declaring a reserve imbalance of 1000 needs 1000 of
/// collateral, refuses transfers while partly collateralized, and mints
/// exactly what the home sends once collateral is complete.
/// Why: Unbacked remote supply must be covered before the home sends more.
#[tokio::test]
async fn test_native_remote_collateralization() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let (home, remote) = deploy_native_bridge(&relayer, 1_000).await;
    let user = addr(DUMMY_SENDER);
    let remote_chain = chain_id(REMOTE_CHAIN_A);

    with_chain(&relayer, HOME_CHAIN, |c| {
        c.mint(NATIVE_TOKEN, user, 5_000).unwrap();
        assert_eq!(c.settings(&home, remote_chain, remote).unwrap().collateral_needed, 1_000);

        assert_eq!(c.add_collateral(home, user, remote_chain, remote, 600), Ok((600, 400)));
        assert_eq!(
            c.send_tokens(home, user, &SendTokensInput::new(remote_chain, remote, addr(DUMMY_RECIPIENT)), 1_000),
            Err(IcmError::RemoteNotCollateralized { collateral_needed: 400 })
        );

        // Excess over what is needed stays with the sender.
        assert_eq!(c.add_collateral(home, user, remote_chain, remote, 1_000), Ok((400, 0)));
        assert_eq!(c.balance_of(&NATIVE_TOKEN, &user), 4_000);
        assert_eq!(
            c.add_collateral(home, user, remote_chain, remote, 1),
            Err(IcmError::AlreadyCollateralized)
        );

        c.send_tokens(home, user, &SendTokensInput::new(remote_chain, remote, addr(DUMMY_RECIPIENT)), 1_000)
            .unwrap();
    })
    .await;

    let report = relayer.relay_all(3).await.unwrap();
    assert_eq!(report.delivered, 1);

    with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        assert_eq!(c.balance_of(&NATIVE_TOKEN, &addr(DUMMY_RECIPIENT)), 1_000);
        assert!(c.token_remote(&remote).unwrap().is_collateralized());
    })
    .await;
    with_chain(&relayer, HOME_CHAIN, |c| {
        assert_eq!(c.balance_of(&NATIVE_TOKEN, &home), 2_000);
        assert_eq!(c.token_home(&home).unwrap().transferred_balance(remote_chain, remote), 2_000);
    })
    .await;
}

/// 2. Test: Uncollateralized Remote Cannot Send
/// Verifies that a native remote with outstanding imbalance refuses to send
/// before it has received anything from its home.
/// Why: Burning unbacked supply would withdraw collateral that does not exist.
#[tokio::test]
async fn test_uncollateralized_remote_cannot_send() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let (home, remote) = deploy_native_bridge(&relayer, 1_000).await;

    let result = with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        c.mint(NATIVE_TOKEN, addr(DUMMY_SENDER), 1_000).unwrap();
        c.send_tokens(
            remote,
            addr(DUMMY_SENDER),
            &SendTokensInput::new(chain_id(HOME_CHAIN), home, addr(DUMMY_RECIPIENT)),
            100,
        )
    })
    .await;
    assert_eq!(result, Err(IcmError::NotCollateralized));
}

// ============================================================================
// SINGLE HOP
// ============================================================================

/// 3. Test: ERC20 Round Trip
/// Verifies that tokens sent home -> remote are minted 1:1 at equal decimals
/// and that sending them back burns them and releases the home custody.
/// Why: Remote supply must always equal what the home holds for it.
#[tokio::test]
async fn test_erc20_round_trip() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let user = addr(DUMMY_SENDER);
    let bridge = deploy_erc20_bridge(&relayer, 18, &[(REMOTE_CHAIN_A, 18)], user, 1_000).await;
    let remote = bridge.remote(REMOTE_CHAIN_A);

    fund_remote(&relayer, bridge.home, REMOTE_CHAIN_A, remote, addr(DUMMY_RECIPIENT), 400).await;
    assert_eq!(balance(&relayer, REMOTE_CHAIN_A, remote, addr(DUMMY_RECIPIENT)).await, 400);
    assert_eq!(balance(&relayer, HOME_CHAIN, bridge.home_token, user).await, 600);

    with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        c.send_tokens(
            remote,
            addr(DUMMY_RECIPIENT),
            &SendTokensInput::new(chain_id(HOME_CHAIN), bridge.home, user),
            150,
        )
    })
    .await
    .unwrap();
    relayer.relay_all(3).await.unwrap();

    with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        assert_eq!(c.balance_of(&remote, &addr(DUMMY_RECIPIENT)), 250);
        assert_eq!(c.total_supply(&remote), 250);
    })
    .await;
    with_chain(&relayer, HOME_CHAIN, |c| {
        assert_eq!(c.balance_of(&bridge.home_token, &user), 750);
        assert_eq!(c.balance_of(&bridge.home_token, &bridge.home), 250);
        assert_eq!(
            c.token_home(&bridge.home)
                .unwrap()
                .transferred_balance(chain_id(REMOTE_CHAIN_A), remote),
            250
        );
    })
    .await;
}

/// 4. Test: Scaling Up To A Remote With More Decimals
/// Verifies that a 6-decimal home sending 5 units mints 5 * 10^12 on an
/// 18-decimal remote, and that sending back keeps the sub-unit dust with the
/// sender.
/// Why: Conversion must be exact in one direction and dust must never be burned.
#[tokio::test]
async fn test_scaling_to_more_decimals() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let user = addr(DUMMY_SENDER);
    let bridge = deploy_erc20_bridge(&relayer, 6, &[(REMOTE_CHAIN_A, 18)], user, 100).await;
    let remote = bridge.remote(REMOTE_CHAIN_A);

    fund_remote(&relayer, bridge.home, REMOTE_CHAIN_A, remote, addr(DUMMY_RECIPIENT), 5).await;
    assert_eq!(balance(&relayer, REMOTE_CHAIN_A, remote, addr(DUMMY_RECIPIENT)).await, 5 * E12);

    // 123 sub-unit dust is not burned and stays with the sender.
    with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        c.send_tokens(
            remote,
            addr(DUMMY_RECIPIENT),
            &SendTokensInput::new(chain_id(HOME_CHAIN), bridge.home, user),
            3 * E12 + 123,
        )
    })
    .await
    .unwrap();
    relayer.relay_all(3).await.unwrap();

    assert_eq!(balance(&relayer, REMOTE_CHAIN_A, remote, addr(DUMMY_RECIPIENT)).await, 2 * E12);
    assert_eq!(
        with_chain(&relayer, REMOTE_CHAIN_A, |c| c.total_supply(&remote)).await,
        2 * E12
    );
    assert_eq!(balance(&relayer, HOME_CHAIN, bridge.home_token, user).await, 98);

    let result = with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        c.send_tokens(
            remote,
            addr(DUMMY_RECIPIENT),
            &SendTokensInput::new(chain_id(HOME_CHAIN), bridge.home, user),
            E12 - 1,
        )
    })
    .await;
    assert_eq!(result, Err(IcmError::ZeroScaledAmount { amount: E12 - 1 }));
}

/// 5. Test: Scaling Down To A Remote With Fewer Decimals
/// Verifies that an 18-decimal home sending 3 * 10^12 + 77 sends 3 units to a
/// 6-decimal remote, keeps the 77 dust with the sender, and refuses amounts
/// that scale to zero.
/// Why: Truncated dust must neither be lost nor minted.
#[tokio::test]
async fn test_scaling_to_fewer_decimals_keeps_dust() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let user = addr(DUMMY_SENDER);
    let supply = 10 * E12;
    let bridge = deploy_erc20_bridge(&relayer, 18, &[(REMOTE_CHAIN_A, 6)], user, supply).await;
    let remote = bridge.remote(REMOTE_CHAIN_A);

    let settings = with_chain(&relayer, HOME_CHAIN, |c| {
        c.settings(&bridge.home, chain_id(REMOTE_CHAIN_A), remote)
    })
    .await
    .unwrap();
    assert_eq!(settings.token_multiplier, E12);
    assert!(!settings.multiply_on_remote);

    fund_remote(&relayer, bridge.home, REMOTE_CHAIN_A, remote, addr(DUMMY_RECIPIENT), 3 * E12 + 77).await;
    assert_eq!(balance(&relayer, REMOTE_CHAIN_A, remote, addr(DUMMY_RECIPIENT)).await, 3);
    assert_eq!(balance(&relayer, HOME_CHAIN, bridge.home_token, user).await, supply - 3 * E12);

    let result = with_chain(&relayer, HOME_CHAIN, |c| {
        c.send_tokens(
            bridge.home,
            user,
            &SendTokensInput::new(chain_id(REMOTE_CHAIN_A), remote, addr(DUMMY_RECIPIENT)),
            999,
        )
    })
    .await;
    assert_eq!(result, Err(IcmError::ZeroScaledAmount { amount: 999 }));

    // Back home: 2 remote units release 2 * 10^12.
    with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        c.send_tokens(
            remote,
            addr(DUMMY_RECIPIENT),
            &SendTokensInput::new(chain_id(HOME_CHAIN), bridge.home, user),
            2,
        )
    })
    .await
    .unwrap();
    relayer.relay_all(3).await.unwrap();
    assert_eq!(balance(&relayer, HOME_CHAIN, bridge.home_token, user).await, supply - E12);
}

/// 6. Test: Sends To Unknown Or Local Destinations
/// Verifies that the home refuses unregistered remotes and its own chain.
/// Why: Tokens must only be custodied for remotes that can redeem them.
#[tokio::test]
async fn test_home_rejects_bad_destinations() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let user = addr(DUMMY_SENDER);
    let bridge = deploy_erc20_bridge(&relayer, 18, &[(REMOTE_CHAIN_A, 18)], user, 1_000).await;

    with_chain(&relayer, HOME_CHAIN, |c| {
        let unknown = addr(0xdead);
        assert_eq!(
            c.send_tokens(bridge.home, user, &SendTokensInput::new(chain_id(REMOTE_CHAIN_A), unknown, user), 10),
            Err(IcmError::UnknownRemote {
                chain_id: chain_id(REMOTE_CHAIN_A),
                address: unknown
            })
        );
        assert_eq!(
            c.send_tokens(bridge.home, user, &SendTokensInput::new(chain_id(HOME_CHAIN), bridge.home, user), 10),
            Err(IcmError::InvalidDestination)
        );
        assert_eq!(c.balance_of(&bridge.home_token, &user), 1_000);
    })
    .await;
}

/// 7. Test: Remote Only Mints For Its Home
/// Verifies that a transfer payload from anyone other than the remote's home
/// fails execution and mints nothing.
/// Why: Otherwise any sender could mint unbacked supply.
#[tokio::test]
async fn test_remote_rejects_foreign_sender() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let bridge = deploy_erc20_bridge(&relayer, 18, &[(REMOTE_CHAIN_A, 18)], addr(DUMMY_SENDER), 1_000).await;
    let remote = bridge.remote(REMOTE_CHAIN_A);

    let payload = TransferrerMessage::SingleHopSend {
        recipient: addr(DUMMY_RECIPIENT),
        amount: 1_000_000,
    }
    .encode()
    .unwrap();
    with_chain(&relayer, HOME_CHAIN, |c| {
        c.send_message(addr(DUMMY_SENDER), MessageInput::new(chain_id(REMOTE_CHAIN_A), remote, payload))
    })
    .await
    .unwrap();

    let report = relayer.relay_all(3).await.unwrap();
    assert_eq!(report.execution_failed, 1);
    assert_eq!(balance(&relayer, REMOTE_CHAIN_A, remote, addr(DUMMY_RECIPIENT)).await, 0);
}

/// 8. Test: Duplicate Registration
/// Verifies that a second registration of the same remote fails on the home
/// and leaves the original settings in place.
/// Why: Re-registering could reset collateral requirements.
#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let (home, remote) = deploy_native_bridge(&relayer, 1_000).await;

    with_chain(&relayer, HOME_CHAIN, |c| {
        c.mint(NATIVE_TOKEN, addr(DUMMY_SENDER), 300).unwrap();
        c.add_collateral(home, addr(DUMMY_SENDER), chain_id(REMOTE_CHAIN_A), remote, 300)
            .unwrap();
    })
    .await;
    with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        c.register_with_home(remote, addr(DUMMY_SENDER), NATIVE_TOKEN, 0)
    })
    .await
    .unwrap();

    let report = relayer.relay_all(3).await.unwrap();
    assert_eq!(report.execution_failed, 1);
    let settings = with_chain(&relayer, HOME_CHAIN, |c| {
        c.settings(&home, chain_id(REMOTE_CHAIN_A), remote)
    })
    .await
    .unwrap();
    assert_eq!(settings.collateral_needed, 700);
}

// ============================================================================
// SEND AND CALL
// ============================================================================

/// 9. Test: Send And Call Delivers To Contract
/// Verifies that tokens sent with a call end up with the recipient contract,
/// which sees the original sender, amount and payload.
/// Why: The contract callback runs after the tokens are in place.
#[tokio::test]
async fn test_send_and_call_delivers_to_contract() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let user = addr(DUMMY_SENDER);
    let bridge = deploy_erc20_bridge(&relayer, 18, &[(REMOTE_CHAIN_A, 18)], user, 1_000).await;
    let remote = bridge.remote(REMOTE_CHAIN_A);
    let receiver = with_chain(&relayer, REMOTE_CHAIN_A, |c| c.deploy(CallReceiver::new())).await;

    let input = SendAndCallInput::new(
        chain_id(REMOTE_CHAIN_A),
        remote,
        receiver,
        b"memo".to_vec(),
        addr(DUMMY_FALLBACK),
    );
    with_chain(&relayer, HOME_CHAIN, |c| c.send_tokens_and_call(bridge.home, user, &input, 50))
        .await
        .unwrap();
    let report = relayer.relay_all(3).await.unwrap();
    assert_eq!(report.delivered, 1);

    with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        assert_eq!(c.balance_of(&remote, &receiver), 50);
        assert_eq!(c.balance_of(&remote, &addr(DUMMY_FALLBACK)), 0);
        let received = c.app(&receiver).unwrap().as_call_receiver().unwrap().received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].original_sender, user);
        assert_eq!(received[0].amount, 50);
        assert_eq!(received[0].payload, b"memo".to_vec());
    })
    .await;
}

/// 10. Test: Send And Call Falls Back On Revert
/// Verifies that when the recipient contract reverts, the tokens go to the
/// fallback recipient and the message still counts as delivered.
/// Why: A failing recipient must not strand bridged tokens.
#[tokio::test]
async fn test_send_and_call_fallback_on_revert() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let user = addr(DUMMY_SENDER);
    let bridge = deploy_erc20_bridge(&relayer, 18, &[(REMOTE_CHAIN_A, 18)], user, 1_000).await;
    let remote = bridge.remote(REMOTE_CHAIN_A);
    let receiver = with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        let receiver = c.deploy(CallReceiver::new());
        c.app_mut(&receiver).unwrap().as_call_receiver_mut().unwrap().block_sender(user);
        receiver
    })
    .await;

    let input = SendAndCallInput::new(chain_id(REMOTE_CHAIN_A), remote, receiver, vec![], addr(DUMMY_FALLBACK));
    with_chain(&relayer, HOME_CHAIN, |c| c.send_tokens_and_call(bridge.home, user, &input, 50))
        .await
        .unwrap();
    let report = relayer.relay_all(3).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.execution_failed, 0);

    with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        assert_eq!(c.balance_of(&remote, &receiver), 0);
        assert_eq!(c.balance_of(&remote, &addr(DUMMY_FALLBACK)), 50);
        assert!(c.app(&receiver).unwrap().as_call_receiver().unwrap().received().is_empty());
    })
    .await;
}

// ============================================================================
// MULTI-HOP
// ============================================================================

/// 11. Test: Multi-hop Transfer Between Remotes
/// Verifies that 100 tokens sent from remote A to remote B with a secondary
/// fee of 5 arrive as 95 on B, and that the home moves the backing from A to B.
/// Why: The home is the only place where remote balances are reconciled.
#[tokio::test]
async fn test_multi_hop_between_remotes() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A, REMOTE_CHAIN_B]);
    let user = addr(DUMMY_SENDER);
    let bridge = deploy_erc20_bridge(
        &relayer,
        18,
        &[(REMOTE_CHAIN_A, 18), (REMOTE_CHAIN_B, 18)],
        user,
        1_000,
    )
    .await;
    let (remote_a, remote_b) = (bridge.remote(REMOTE_CHAIN_A), bridge.remote(REMOTE_CHAIN_B));
    with_chain(&relayer, HOME_CHAIN, |c| {
        c.configure_multi_hop_route(
            bridge.home,
            (chain_id(REMOTE_CHAIN_A), remote_a),
            (chain_id(REMOTE_CHAIN_B), remote_b),
        )
    })
    .await
    .unwrap();
    fund_remote(&relayer, bridge.home, REMOTE_CHAIN_A, remote_a, user, 100).await;

    let mut input = SendTokensInput::new(chain_id(REMOTE_CHAIN_B), remote_b, addr(DUMMY_RECIPIENT));
    input.secondary_fee = 5;
    input.multi_hop_fallback = addr(DUMMY_FALLBACK);
    with_chain(&relayer, REMOTE_CHAIN_A, |c| c.send_tokens(remote_a, user, &input, 100))
        .await
        .unwrap();

    let report = relayer.relay_all(4).await.unwrap();
    assert_eq!(report.delivered, 2, "Both hops delivered");

    assert_eq!(balance(&relayer, REMOTE_CHAIN_A, remote_a, user).await, 0);
    assert_eq!(balance(&relayer, REMOTE_CHAIN_B, remote_b, addr(DUMMY_RECIPIENT)).await, 95);
    with_chain(&relayer, HOME_CHAIN, |c| {
        let home = c.token_home(&bridge.home).unwrap();
        assert_eq!(home.transferred_balance(chain_id(REMOTE_CHAIN_A), remote_a), 0);
        assert_eq!(home.transferred_balance(chain_id(REMOTE_CHAIN_B), remote_b), 95);
        assert_eq!(c.balance_of(&bridge.home_token, &bridge.home), 95);
        // Secondary fee is escrowed by the messenger for the second hop's relayer.
        assert_eq!(c.balance_of(&bridge.home_token, &crypto::messenger_address(1)), 5);
    })
    .await;
}

/// 12. Test: Multi-hop Without Route Falls Back
/// Verifies that a multi-hop transfer to a remote with no configured route
/// pays the full amount to the fallback on the home chain.
/// Why: Tokens burned on the origin must always land somewhere.
#[tokio::test]
async fn test_multi_hop_without_route_falls_back() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A, REMOTE_CHAIN_B]);
    let user = addr(DUMMY_SENDER);
    let bridge = deploy_erc20_bridge(
        &relayer,
        18,
        &[(REMOTE_CHAIN_A, 18), (REMOTE_CHAIN_B, 18)],
        user,
        1_000,
    )
    .await;
    let (remote_a, remote_b) = (bridge.remote(REMOTE_CHAIN_A), bridge.remote(REMOTE_CHAIN_B));
    fund_remote(&relayer, bridge.home, REMOTE_CHAIN_A, remote_a, user, 100).await;

    let mut input = SendTokensInput::new(chain_id(REMOTE_CHAIN_B), remote_b, addr(DUMMY_RECIPIENT));
    input.multi_hop_fallback = addr(DUMMY_FALLBACK);
    with_chain(&relayer, REMOTE_CHAIN_A, |c| c.send_tokens(remote_a, user, &input, 100))
        .await
        .unwrap();
    relayer.relay_all(4).await.unwrap();

    assert_eq!(balance(&relayer, HOME_CHAIN, bridge.home_token, addr(DUMMY_FALLBACK)).await, 100);
    assert_eq!(balance(&relayer, REMOTE_CHAIN_B, remote_b, addr(DUMMY_RECIPIENT)).await, 0);
}

/// 13. Test: Routes Need Matching Scaling
/// Verifies that remotes with different decimals cannot be joined by a
/// multi-hop route.
/// Why: Forwarding between them would need a second conversion and lose dust.
#[tokio::test]
async fn test_route_requires_matching_scaling() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A, REMOTE_CHAIN_B]);
    let bridge = deploy_erc20_bridge(
        &relayer,
        18,
        &[(REMOTE_CHAIN_A, 18), (REMOTE_CHAIN_B, 6)],
        addr(DUMMY_SENDER),
        1_000,
    )
    .await;

    let result = with_chain(&relayer, HOME_CHAIN, |c| {
        c.configure_multi_hop_route(
            bridge.home,
            (chain_id(REMOTE_CHAIN_A), bridge.remote(REMOTE_CHAIN_A)),
            (chain_id(REMOTE_CHAIN_B), bridge.remote(REMOTE_CHAIN_B)),
        )
    })
    .await;
    assert_eq!(result, Err(IcmError::IncompatibleScaling));
}

// ============================================================================
// CONSISTENCY FAULTS
// ============================================================================

/// 14. Test: Withdrawal Beyond Home Balance Is A Consistency Fault
/// Verifies that a remote withdrawing more than the home holds for it is
/// reported as Faulted, changes nothing on the home, and can never be retried.
/// Why: This only happens when a remote's supply is not what the home
/// believes, which must be surfaced, not silently retried.
#[tokio::test]
async fn test_overdraw_is_consistency_fault() {
    let relayer = build_test_relayer(&[HOME_CHAIN, REMOTE_CHAIN_A]);
    let (home, remote) = deploy_native_bridge(&relayer, 0).await;
    let user = addr(DUMMY_SENDER);

    // Native supply minted on the remote without home backing.
    let id = with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        c.mint(NATIVE_TOKEN, user, 500).unwrap();
        c.send_tokens(remote, user, &SendTokensInput::new(chain_id(HOME_CHAIN), home, user), 100)
    })
    .await
    .unwrap();

    let event = with_chain(&relayer, REMOTE_CHAIN_A, |c| {
        c.latest_messenger().unwrap().sent_event(&id).cloned()
    })
    .await
    .unwrap();
    match relayer.relay_message(&event).await.unwrap() {
        ReceiveOutcome::Faulted { message_id, .. } => assert_eq!(message_id, id),
        other => panic!("expected Faulted, got {:?}", other),
    }

    let retry = with_chain(&relayer, HOME_CHAIN, |c| {
        assert_eq!(c.balance_of(&NATIVE_TOKEN, &user), 0);
        assert_eq!(
            c.token_home(&home)
                .unwrap()
                .transferred_balance(chain_id(REMOTE_CHAIN_A), remote),
            0
        );
        c.retry_message_execution(crypto::messenger_address(1), chain_id(REMOTE_CHAIN_A), &event.message)
    })
    .await;
    let err = retry.unwrap_err();
    assert_eq!(err, IcmError::ConsistencyFaultRecorded(id));
    assert_eq!(err.kind(), ErrorKind::ConsistencyFault);
}
