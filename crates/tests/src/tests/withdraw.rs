use std::{sync::Arc, time::Duration};

use pn_relayer::{router::EventHandler, PolicyViolation};
use pn_types::{
    channel::PaymentNetwork,
    event::ContractEvent,
    payload::{AttestationPayload, Signature},
    submission::{SubmissionStatus, TxOutcome},
    U256,
};
use pn_utils::wallet::verify;
use serde_json::json;

use crate::testing_tool::common::{app_contract, primary_contract, setup, token, user, TestEnv};

fn network(onchain: u64, provider_balance: u64) -> PaymentNetwork {
    PaymentNetwork {
        provider_onchain_balance: onchain.into(),
        provider_balance: provider_balance.into(),
        ..Default::default()
    }
}

fn withdraw_setup(onchain: u64, provider_balance: u64) -> TestEnv {
    let env = setup(0);
    env.primary.set_head(1000);
    env.stub_payment_network(&network(onchain, provider_balance));
    env
}

#[tokio::test]
async fn test_withdraw_above_onchain_balance_is_rejected() {
    let env = withdraw_setup(40, 40);

    let err = env
        .coordinator()
        .propose_withdraw(50u64.into(), token())
        .await
        .unwrap_err();
    assert_eq!(
        err.policy(),
        Some(&PolicyViolation::WithdrawExceedsOnchainBalance {
            amount: 50u64.into(),
            onchain: 40u64.into(),
        })
    );
    assert!(env.app.sent().is_empty());
    assert!(env.primary.sent().is_empty());
}

#[tokio::test]
async fn test_withdraw_into_user_liability_is_rejected() {
    let env = withdraw_setup(100, 30);

    let err = env
        .coordinator()
        .propose_withdraw(50u64.into(), token())
        .await
        .unwrap_err();
    assert!(matches!(
        err.policy(),
        Some(PolicyViolation::WithdrawBelowLiability { .. })
    ));
    assert!(env.app.sent().is_empty());
}

#[tokio::test]
async fn test_propose_withdraw() {
    let env = withdraw_setup(100, 80);

    let outcome = env
        .coordinator()
        .propose_withdraw(50u64.into(), token())
        .await
        .unwrap();
    assert!(outcome.is_success());

    let proposals = env.app.sent_with("providerProposeWithdraw");
    assert_eq!(proposals.len(), 1);
    // horizon is the primary head plus the confirmation margin
    assert_eq!(
        proposals[0].args,
        vec![json!(token()), json!(U256::from(50)), json!(1100)]
    );

    let history = env.relayer.get_transaction_history(token());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SubmissionStatus::Confirmed);
    assert_eq!(Some(history[0].tx_hash), outcome.tx_hash());
}

#[tokio::test]
async fn test_withdraw_outcomes() {
    let env = withdraw_setup(100, 100);

    env.app.fail_receipt("providerProposeWithdraw", "reverted");
    let outcome = env
        .coordinator()
        .propose_withdraw(10u64.into(), token())
        .await
        .unwrap();
    assert!(matches!(outcome, TxOutcome::ConfirmFail { ref error, .. } if error == "reverted"));
    let history = env.coordinator().get_transaction_history(token());
    assert_eq!(history[0].status, SubmissionStatus::Failed("reverted".to_string()));

    env.app.fail_send("providerProposeWithdraw", "gateway down");
    let outcome = env
        .coordinator()
        .propose_withdraw(10u64.into(), token())
        .await
        .unwrap();
    assert!(matches!(outcome, TxOutcome::SendTxFail { ref reason } if reason.contains("gateway down")));
    assert_eq!(env.coordinator().get_transaction_history(token()).len(), 1);
}

#[tokio::test]
async fn test_provider_withdraw_confirmation_is_relayed_once() {
    let env = withdraw_setup(100, 100);
    let event = ContractEvent::ConfirmProviderWithdraw {
        token: token(),
        balance: 60u64.into(),
        last_commit_block: 1100,
        signature: Signature::zero(),
    };

    env.coordinator().handle(event.clone()).await.unwrap();
    env.coordinator().handle(event).await.unwrap();

    let relayed = env.primary.sent_with("providerWithdraw");
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].to, primary_contract());
    assert_eq!(relayed[0].args[0], json!(token()));
    assert_eq!(relayed[0].args[2], json!(1100));
}

#[tokio::test]
async fn test_expired_withdraw_confirmation_is_dropped() {
    let env = withdraw_setup(100, 100);

    env.coordinator()
        .handle(ContractEvent::ConfirmProviderWithdraw {
            token: token(),
            balance: 60u64.into(),
            last_commit_block: 900,
            signature: Signature::zero(),
        })
        .await
        .unwrap();
    assert!(env.primary.sent().is_empty());
}

#[tokio::test]
async fn test_user_withdraw_proposal_is_cosigned_once() {
    let env = setup(0);
    env.stub_channel(1, 30u64.into(), 1);
    let event = ContractEvent::UserProposeWithdraw {
        channel_id: env.channel_id(),
        user: user(),
        balance: 20u64.into(),
        last_commit_block: 500,
    };

    env.coordinator().handle(event.clone()).await.unwrap();
    env.coordinator().handle(event).await.unwrap();

    let confirms = env.app.sent_with("confirmUserWithdraw");
    assert_eq!(confirms.len(), 1);
    let signature: Signature = serde_json::from_value(confirms[0].args[3].clone()).unwrap();
    let payload = AttestationPayload {
        contract: app_contract(),
        channel_id: env.channel_id(),
        balance: 20u64.into(),
        last_commit_block: 500,
    };
    assert!(verify(&payload, &signature, &env.provider()));
}

#[tokio::test]
async fn test_cooperative_settle_is_cosigned() {
    let env = setup(0);
    env.stub_channel(1, 30u64.into(), 1);

    env.coordinator()
        .handle(ContractEvent::ProposeCooperativeSettle {
            channel_id: env.channel_id(),
            user: user(),
            balance: 30u64.into(),
            last_commit_block: 700,
        })
        .await
        .unwrap();

    let confirms = env.app.sent_with("confirmCooperativeSettle");
    assert_eq!(confirms.len(), 1);
    assert_eq!(confirms[0].args[0], json!(env.channel_id()));
    assert_eq!(confirms[0].args[2], json!(700));
}

#[tokio::test]
async fn test_rebalance_respects_provider_balance() {
    let env = setup(0);
    env.stub_channel(1, 0u64.into(), 0);
    env.stub_payment_network(&network(100, 50));

    let err = env
        .coordinator()
        .propose_rebalance(user(), 80u64.into(), token())
        .await
        .unwrap_err();
    assert!(matches!(
        err.policy(),
        Some(PolicyViolation::InsufficientProviderBalance { .. })
    ));

    let outcome = env
        .coordinator()
        .propose_rebalance(user(), 40u64.into(), token())
        .await
        .unwrap();
    assert!(outcome.is_success());
    let proposals = env.app.sent_with("proposeRebalance");
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].args[1], json!(U256::from(40)));
    assert_eq!(proposals[0].args[2], json!(1));
}

#[tokio::test]
async fn test_concurrent_rebalances_get_sequential_nonces() {
    let env = setup(0);
    env.stub_channel(1, 0u64.into(), 0);
    env.stub_payment_network(&network(1000, 1000));
    env.app.set_receipt_delay(Duration::from_millis(2));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(env.coordinator());
            tokio::spawn(async move {
                coordinator
                    .propose_rebalance(user(), 10u64.into(), token())
                    .await
            })
        })
        .collect();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.is_success(), "{:?}", outcome);
    }

    let proposals = env.app.sent_with("proposeRebalance");
    assert_eq!(proposals.len(), 8);
    for (i, tx) in proposals.iter().enumerate() {
        let nonce = i as u64 + 1;
        assert_eq!(tx.args[1], json!(U256::from(10 * nonce)));
        assert_eq!(tx.args[2], json!(nonce));
    }
    let channel = env
        .coordinator()
        .get_channel_info(user(), token())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(channel.rebalance.nonce, 8);
    assert_eq!(channel.rebalance.amount, U256::from(80));
}
