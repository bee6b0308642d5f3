//! Provider side of the channel protocol.
//!
//! Every read-modify-sign-submit sequence on a channel runs under that
//! channel's guard, token scoped streams under the token's guard. When both
//! are needed the channel guard is taken first.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{anyhow, Context};
use pn_config::ProtocolConfig;
use pn_rpc_client::{view, ChainClient};
use pn_store::{submission_log::SubmissionLog, ChannelGuard, ChannelStore, FeeGuard};
use pn_types::{
    callback::{CallbackKind, DomainEvent},
    channel::{Channel, ChannelId, ChannelStatus, ChannelView, PaymentNetwork},
    hash::channel_id,
    is_native_token,
    payload::{FeePayload, Signature},
    serde_helpers::{u256_quantity, u64_quantity},
    submission::{PendingSubmission, SubmissionContext, SubmissionKind, TxOutcome},
    Address, H256, U256,
};
use pn_utils::wallet::Signer;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::{
    callback::{Callback, CallbackDispatcher},
    error::{PolicyViolation, Result},
    submitter::Submitter,
};

/// Latest proof a party signed, as stored by the application contract.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceProofView {
    #[serde(with = "u256_quantity")]
    balance: U256,
    #[serde(with = "u64_quantity")]
    nonce: u64,
    #[serde(default)]
    additional_hash: H256,
    #[serde(default)]
    signature: Signature,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RebalanceProofView {
    #[serde(with = "u256_quantity")]
    amount: U256,
    #[serde(with = "u64_quantity")]
    nonce: u64,
    #[serde(default)]
    signature: Signature,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FeeProofView {
    #[serde(with = "u256_quantity")]
    amount: U256,
    #[serde(with = "u64_quantity")]
    nonce: u64,
}

pub struct ChainContext {
    pub client: Arc<dyn ChainClient>,
    pub contract: Address,
}

pub struct Coordinator {
    signer: Signer,
    provider: Address,
    primary: ChainContext,
    app: ChainContext,
    default_token: Address,
    protocol: ProtocolConfig,
    store: ChannelStore,
    submitter: Submitter,
    callbacks: CallbackDispatcher,
    primary_head: Arc<AtomicU64>,
}

impl Coordinator {
    pub fn new(
        signer: Signer,
        primary: ChainContext,
        app: ChainContext,
        default_token: Address,
        protocol: ProtocolConfig,
    ) -> Self {
        let provider = signer.address();
        let submitter = Submitter::new(
            Arc::clone(&primary.client),
            Arc::clone(&app.client),
            Arc::new(SubmissionLog::with_limit(protocol.submission_history_limit)),
        );
        Coordinator {
            signer,
            provider,
            primary,
            app,
            default_token,
            protocol,
            store: ChannelStore::new(),
            submitter,
            callbacks: CallbackDispatcher::new(),
            primary_head: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn provider(&self) -> Address {
        self.provider
    }

    pub fn default_token(&self) -> Address {
        self.default_token
    }

    pub fn primary_contract(&self) -> Address {
        self.primary.contract
    }

    pub fn app_contract(&self) -> Address {
        self.app.contract
    }

    pub fn store(&self) -> &ChannelStore {
        &self.store
    }

    pub(crate) fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub(crate) fn signer(&self) -> &Signer {
        &self.signer
    }

    pub(crate) fn fee_rate(&self, token: &Address) -> u32 {
        self.protocol.fee_rate(token)
    }

    /// Head of the primary chain as last seen by its poller.
    pub fn primary_head(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.primary_head)
    }

    pub fn channel_id(&self, user: &Address, token: &Address) -> ChannelId {
        channel_id(&self.provider, user, token)
    }

    pub(crate) async fn latest_primary_block(&self) -> anyhow::Result<u64> {
        let observed = self.primary_head.load(Ordering::SeqCst);
        if observed > 0 {
            return Ok(observed);
        }
        let head = self.primary.client.current_block_number().await?;
        self.primary_head.fetch_max(head, Ordering::SeqCst);
        Ok(head)
    }

    async fn validity_horizon(&self) -> anyhow::Result<u64> {
        let head = self.latest_primary_block().await?;
        Ok(head.saturating_add(self.protocol.confirm_block_margin))
    }

    async fn hydrate_channel(&self, id: &ChannelId) -> anyhow::Result<Option<Channel>> {
        let channel_view: ChannelView = view(
            self.primary.client.as_ref(),
            &self.primary.contract,
            "channelMap",
            vec![json!(id)],
        )
        .await?;
        let status = u8::try_from(channel_view.status)
            .ok()
            .and_then(ChannelStatus::from_code);
        let status = match status {
            Some(status) => status,
            None => return Ok(None),
        };
        let mut channel = Channel::new(*id, channel_view.user, channel_view.token, status);

        let sent: BalanceProofView = self
            .app_view("balanceProofMap", vec![json!(id), json!(self.provider)])
            .await?;
        channel.sent.balance = sent.balance;
        channel.sent.nonce = sent.nonce;
        channel.sent.additional_hash = sent.additional_hash;
        channel.sent.signature = sent.signature;

        let received: BalanceProofView = self
            .app_view("balanceProofMap", vec![json!(id), json!(channel.user)])
            .await?;
        channel.received.balance = received.balance;
        channel.received.nonce = received.nonce;
        channel.received.additional_hash = received.additional_hash;
        channel.received.signature = received.signature;

        let rebalance: RebalanceProofView =
            self.app_view("rebalanceProofMap", vec![json!(id)]).await?;
        channel.rebalance.amount = rebalance.amount;
        channel.rebalance.nonce = rebalance.nonce;
        channel.rebalance.signature = rebalance.signature;

        log::info!(
            "hydrated channel {:?} status {} sent nonce {} received nonce {}",
            id,
            channel.status,
            channel.sent.nonce,
            channel.received.nonce
        );
        Ok(Some(channel))
    }

    /// Fill an empty guard from the contracts. `None` if the channel does not
    /// exist on chain.
    pub(crate) async fn ensure_channel<'a>(
        &self,
        guard: &'a mut ChannelGuard,
        id: &ChannelId,
    ) -> anyhow::Result<Option<&'a mut Channel>> {
        if guard.is_none() {
            **guard = self.hydrate_channel(id).await?;
        }
        Ok((**guard).as_mut())
    }

    pub(crate) async fn ensure_fee(
        &self,
        guard: &mut FeeGuard,
        token: &Address,
    ) -> anyhow::Result<()> {
        if guard.hydrated {
            return Ok(());
        }
        let claimed: FeeProofView = self.app_view("feeProofMap", vec![json!(token)]).await?;
        guard
            .sync(claimed.amount, claimed.nonce)
            .ok_or_else(|| anyhow!("fee amount overflow"))?;
        Ok(())
    }

    async fn app_view<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> anyhow::Result<T> {
        view(self.app.client.as_ref(), &self.app.contract, method, args).await
    }

    async fn open_channel<'a>(
        &self,
        guard: &'a mut ChannelGuard,
        user: &Address,
        token: &Address,
    ) -> Result<&'a mut Channel> {
        let id = self.channel_id(user, token);
        let channel = self
            .ensure_channel(guard, &id)
            .await?
            .ok_or(PolicyViolation::ChannelNotFound {
                user: *user,
                token: *token,
            })?;
        if !channel.status.is_open() {
            return Err(PolicyViolation::ChannelNotOpen.into());
        }
        Ok(channel)
    }

    /// Add provider funds to the primary contract. ERC20 tokens are approved
    /// first; an approval that was not sent aborts the deposit.
    #[instrument(skip(self))]
    pub async fn deposit(&self, amount: U256, token: Address) -> Result<TxOutcome> {
        let context = SubmissionContext::Token { token };
        let contract = self.primary.contract;
        let args = vec![json!(token), json!(amount)];
        if is_native_token(&token) {
            return Ok(self
                .submitter
                .submit_primary(contract, amount, SubmissionKind::ProviderDeposit, context, args)
                .await);
        }

        let approve = self
            .submitter
            .submit_primary(
                token,
                U256::zero(),
                SubmissionKind::Approve,
                context,
                vec![json!(contract), json!(amount)],
            )
            .await;
        if !matches!(approve, TxOutcome::Sent { .. }) {
            log::warn!("approve {} of {:?} failed, skip deposit: {:?}", amount, token, approve);
            return Ok(approve);
        }
        Ok(self
            .submitter
            .submit_primary(
                contract,
                U256::zero(),
                SubmissionKind::ProviderDeposit,
                context,
                args,
            )
            .await)
    }

    #[instrument(skip(self))]
    pub async fn propose_withdraw(&self, amount: U256, token: Address) -> Result<TxOutcome> {
        let _guard = self.store.lock_withdraw(&token).await;
        let network = self.payment_network(&token).await?;

        let onchain = network.provider_onchain_balance;
        if amount > onchain {
            return Err(PolicyViolation::WithdrawExceedsOnchainBalance { amount, onchain }.into());
        }
        if onchain - amount > network.provider_balance {
            return Err(PolicyViolation::WithdrawBelowLiability {
                amount,
                available: network.provider_balance,
            }
            .into());
        }

        let horizon = self.validity_horizon().await?;
        Ok(self
            .submitter
            .submit_app(
                self.app.contract,
                SubmissionKind::ProposeWithdraw,
                SubmissionContext::Token { token },
                vec![json!(token), json!(amount), json!(horizon)],
            )
            .await)
    }

    #[instrument(skip(self))]
    pub async fn propose_rebalance(
        &self,
        user: Address,
        amount: U256,
        token: Address,
    ) -> Result<TxOutcome> {
        let mut guard = self.store.lock_channel(&self.channel_id(&user, &token)).await;
        let channel = self.open_channel(&mut guard, &user, &token).await?;

        let network = self.payment_network(&token).await?;
        let required = amount.saturating_sub(channel.rebalance.amount);
        if required > network.provider_balance {
            return Err(PolicyViolation::InsufficientProviderBalance {
                amount: required,
                available: network.provider_balance,
            }
            .into());
        }

        let mut proof = channel.next_rebalance(amount)?;
        proof.signature = self.signer.sign(&proof.payload(self.app.contract))?;
        let outcome = self
            .submitter
            .submit_app(
                self.app.contract,
                SubmissionKind::ProposeRebalance,
                SubmissionContext::Channel {
                    channel_id: channel.id,
                    token,
                },
                vec![
                    json!(channel.id),
                    json!(proof.amount),
                    json!(proof.nonce),
                    json!(proof.signature),
                ],
            )
            .await;
        if outcome.is_success() {
            channel.apply_rebalance(proof)?;
        } else if outcome.is_unknown() {
            Self::forget_channel(&mut guard);
        }
        Ok(outcome)
    }

    pub async fn send_asset(&self, to: Address, amount: U256, token: Address) -> Result<TxOutcome> {
        self.send_asset_with_message(to, amount, token, H256::zero())
            .await
    }

    /// Transfer carrying a message digest in `additional_hash`.
    #[instrument(skip(self))]
    pub async fn send_asset_with_message(
        &self,
        to: Address,
        amount: U256,
        token: Address,
        additional_hash: H256,
    ) -> Result<TxOutcome> {
        let mut guard = self.store.lock_channel(&self.channel_id(&to, &token)).await;
        let channel = self.open_channel(&mut guard, &to, &token).await?;

        let mut proof = channel.next_transfer(amount, additional_hash)?;
        proof.signature = self.signer.sign(&proof.payload())?;
        let outcome = self
            .submitter
            .submit_app(
                self.app.contract,
                SubmissionKind::Transfer,
                SubmissionContext::Channel {
                    channel_id: channel.id,
                    token,
                },
                vec![
                    json!(channel.id),
                    json!(proof.balance),
                    json!(proof.nonce),
                    json!(proof.additional_hash),
                    json!(proof.signature),
                ],
            )
            .await;
        if outcome.is_success() {
            channel.apply_sent(proof)?;
        } else if outcome.is_unknown() {
            Self::forget_channel(&mut guard);
        }
        Ok(outcome)
    }

    /// Submit the latest user proof and rebalance proof to the primary
    /// contract. The status moves once `ChannelClosed` is observed.
    #[instrument(skip(self))]
    pub async fn close_channel(&self, user: Address, token: Address) -> Result<TxOutcome> {
        let mut guard = self.store.lock_channel(&self.channel_id(&user, &token)).await;
        let channel = self.open_channel(&mut guard, &user, &token).await?;
        let id = channel.id;

        let balance: BalanceProofView = self
            .app_view("balanceProofMap", vec![json!(id), json!(user)])
            .await?;
        let rebalance: RebalanceProofView =
            self.app_view("rebalanceProofMap", vec![json!(id)]).await?;

        Ok(self
            .submitter
            .submit_primary(
                self.primary.contract,
                U256::zero(),
                SubmissionKind::CloseChannel,
                SubmissionContext::Channel {
                    channel_id: id,
                    token,
                },
                vec![
                    json!(id),
                    json!({
                        "balance": balance.balance,
                        "nonce": balance.nonce,
                        "additionalHash": balance.additional_hash,
                        "signature": balance.signature,
                    }),
                    json!({
                        "amount": rebalance.amount,
                        "nonce": rebalance.nonce,
                        "signature": rebalance.signature,
                    }),
                ],
            )
            .await)
    }

    /// Drop the cached channel after a submission of unknown outcome. The
    /// next operation reads the proofs the contract actually holds.
    fn forget_channel(guard: &mut ChannelGuard) {
        if let Some(channel) = guard.take() {
            log::warn!(
                "outcome on channel {:?} unknown, reload it from the contracts",
                channel.id
            );
        }
    }

    /// Accrue the fee of an incoming transfer and claim it when it grew.
    /// Must be called with the channel guard of the transfer held. The fee is
    /// accrued before any chain call, a failure only defers the claim.
    pub(crate) async fn claim_fee(&self, token: &Address, delta: U256) -> anyhow::Result<()> {
        let rate = self.fee_rate(token);
        if rate == 0 {
            return Ok(());
        }
        let mut fee = self.store.lock_fee(token).await;
        fee.accrue(rate, delta)
            .ok_or_else(|| anyhow!("fee amount overflow"))?;
        self.ensure_fee(&mut fee, token).await?;

        if fee.accrued == fee.claimed_amount {
            log::debug!("fee of {:?} unchanged at {}, skip claim", token, fee.accrued);
            return Ok(());
        }

        let payload = FeePayload {
            contract: self.app.contract,
            token: *token,
            amount: fee.accrued,
            nonce: fee.nonce.checked_add(1).context("fee nonce overflow")?,
        };
        let signature = self.signer.sign(&payload)?;
        let outcome = self
            .submitter
            .submit_app(
                self.app.contract,
                SubmissionKind::SubmitFee,
                SubmissionContext::Token { token: *token },
                vec![
                    json!(token),
                    json!(payload.amount),
                    json!(payload.nonce),
                    json!(signature),
                ],
            )
            .await;
        if outcome.is_success() {
            fee.claimed_amount = payload.amount;
            fee.nonce = payload.nonce;
        } else if outcome.is_unknown() {
            log::warn!(
                "fee claim {} of {:?} unknown, resync with the contract",
                payload.amount,
                token
            );
            fee.hydrated = false;
        } else {
            log::warn!(
                "fee claim {} of {:?} not accepted, folded into the next claim: {:?}",
                payload.amount,
                token,
                outcome
            );
        }
        Ok(())
    }

    pub fn register_callback(&self, kind: CallbackKind, callback: Callback) {
        self.callbacks.register(kind, callback);
    }

    pub(crate) fn notify(&self, event: DomainEvent) {
        let kind = event.kind();
        if !self.callbacks.dispatch(event) {
            log::debug!("no subscriber for {:?}", kind);
        }
    }

    async fn payment_network(&self, token: &Address) -> anyhow::Result<PaymentNetwork> {
        self.app_view("paymentNetworkMap", vec![json!(token)])
            .await
            .context("read payment network")
    }

    pub async fn get_payment_network_info(&self, token: Address) -> Result<PaymentNetwork> {
        Ok(self.payment_network(&token).await?)
    }

    /// Local view of the channel, hydrating it on first use.
    pub async fn get_channel_info(&self, user: Address, token: Address) -> Result<Option<Channel>> {
        let id = self.channel_id(&user, &token);
        let mut guard = self.store.lock_channel(&id).await;
        let channel = self.ensure_channel(&mut guard, &id).await?;
        Ok(channel.cloned())
    }

    pub fn get_transaction_history(&self, token: Address) -> Vec<PendingSubmission> {
        self.submitter.submissions().by_token(&token)
    }

    pub(crate) fn status_transition(channel: &mut Channel, next: ChannelStatus) {
        let current = channel.status;
        if channel.advance_status(next) {
            log::info!("channel {:?} {} -> {}", channel.id, current, next);
        } else {
            log::debug!("channel {:?} stays {} on {}", channel.id, current, next);
        }
    }
}
