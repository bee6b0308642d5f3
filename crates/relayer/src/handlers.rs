use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use pn_types::{
    callback::DomainEvent,
    channel::{Attestation, AttestationKind, BalanceProof, Channel, ChannelId, ChannelStatus},
    event::{ContractEvent, EventFilter, EventKind},
    payload::{AttestationPayload, Signature},
    submission::{SubmissionContext, SubmissionKind, TxOutcome},
    Address, H256, U256,
};
use serde_json::json;
use tracing::instrument;

use crate::{
    coordinator::Coordinator,
    router::{EventHandler, WatchItem},
};

impl Coordinator {
    /// Events of the primary contract.
    pub fn primary_watch_item(self: &Arc<Self>) -> WatchItem {
        let mut item = WatchItem::new(self.primary_contract());
        for kind in EventKind::PRIMARY {
            item.register(kind, EventFilter::new(), Arc::clone(self) as Arc<dyn EventHandler>);
        }
        item
    }

    /// Events of the application contract. Transfers and messages are only
    /// watched when addressed to the provider.
    pub fn app_watch_item(self: &Arc<Self>) -> WatchItem {
        let mut item = WatchItem::new(self.app_contract());
        for kind in EventKind::APP {
            let filter = match kind {
                EventKind::Transfer | EventKind::SendMessage => {
                    EventFilter::new().with_address("to", &self.provider())
                }
                _ => EventFilter::new(),
            };
            item.register(kind, filter, Arc::clone(self) as Arc<dyn EventHandler>);
        }
        item
    }

    #[instrument(skip(self, signature))]
    async fn on_transfer(
        &self,
        from: Address,
        channel_id: ChannelId,
        balance: U256,
        nonce: u64,
        additional_hash: H256,
        signature: Signature,
    ) -> Result<()> {
        let mut guard = self.store().lock_channel(&channel_id).await;
        let channel = match self.ensure_channel(&mut guard, &channel_id).await? {
            Some(channel) => channel,
            None => {
                log::warn!("transfer on unknown channel {:?}", channel_id);
                return Ok(());
            }
        };
        let proof = BalanceProof {
            channel_id,
            balance,
            nonce,
            additional_hash,
            signature,
        };
        if !channel.is_new_received(&proof) {
            log::debug!(
                "skip transfer nonce {} on {:?}, received nonce is {}",
                nonce,
                channel_id,
                channel.received.nonce
            );
            return Ok(());
        }

        let delta = balance.saturating_sub(channel.received.balance);
        let token = channel.token;
        if let Err(err) = self.claim_fee(&token, delta).await {
            log::error!("claim fee of {:?} failed: {:#}", token, err);
        }
        channel.apply_received(proof)?;

        if additional_hash.is_zero() {
            self.notify(DomainEvent::Transfer {
                channel_id,
                from,
                token,
                amount: delta,
                balance,
                nonce,
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn on_attestation_request(
        &self,
        kind: AttestationKind,
        channel_id: ChannelId,
        balance: U256,
        last_commit_block: u64,
    ) -> Result<()> {
        let mut guard = self.store().lock_channel(&channel_id).await;
        let channel = match self.ensure_channel(&mut guard, &channel_id).await? {
            Some(channel) => channel,
            None => {
                log::warn!("{:?} proposal on unknown channel {:?}", kind, channel_id);
                return Ok(());
            }
        };
        let attestation = Attestation {
            kind,
            balance,
            last_commit_block,
        };
        if channel.last_attestation.as_ref() == Some(&attestation) {
            log::debug!("{:?} on {:?} already co-signed", kind, channel_id);
            return Ok(());
        }

        let payload = AttestationPayload {
            contract: self.app_contract(),
            channel_id,
            balance,
            last_commit_block,
        };
        let signature = self.signer().sign(&payload)?;
        let submission = match kind {
            AttestationKind::UserWithdraw => SubmissionKind::ConfirmUserWithdraw,
            AttestationKind::CooperativeSettle => SubmissionKind::ConfirmCooperativeSettle,
        };
        let outcome = self
            .submitter()
            .submit_app(
                self.app_contract(),
                submission,
                SubmissionContext::Channel {
                    channel_id,
                    token: channel.token,
                },
                vec![
                    json!(channel_id),
                    json!(balance),
                    json!(last_commit_block),
                    json!(signature),
                ],
            )
            .await;
        if outcome.is_success() {
            channel.last_attestation = Some(attestation);
        }
        Ok(())
    }

    #[instrument(skip(self, signature))]
    async fn on_confirm_provider_withdraw(
        &self,
        token: Address,
        balance: U256,
        last_commit_block: u64,
        signature: Signature,
    ) -> Result<()> {
        let mut relayed = self.store().lock_withdraw(&token).await;
        if relayed.is_relayed(balance, last_commit_block) {
            log::debug!("withdraw confirmation of {:?} already relayed", token);
            return Ok(());
        }
        let head = self.latest_primary_block().await?;
        if last_commit_block < head {
            log::warn!(
                "withdraw confirmation of {:?} expired at {}, primary head {}",
                token,
                last_commit_block,
                head
            );
            return Ok(());
        }

        let outcome = self
            .submitter()
            .submit_primary(
                self.primary_contract(),
                U256::zero(),
                SubmissionKind::ProviderWithdraw,
                SubmissionContext::Token { token },
                vec![
                    json!(token),
                    json!(balance),
                    json!(last_commit_block),
                    json!(signature),
                ],
            )
            .await;
        if let TxOutcome::Sent { .. } = outcome {
            relayed.balance = balance;
            relayed.last_commit_block = last_commit_block;
        }
        Ok(())
    }

    /// Load the channel for a primary event, creating it from the event when
    /// the contracts do not know it yet.
    async fn with_channel<F>(
        &self,
        channel_id: ChannelId,
        opened: Option<(Address, Address)>,
        f: F,
    ) -> Result<Option<Channel>>
    where
        F: FnOnce(&mut Channel),
    {
        let mut guard = self.store().lock_channel(&channel_id).await;
        if let Some(channel) = self.ensure_channel(&mut guard, &channel_id).await? {
            f(channel);
            return Ok(Some(channel.clone()));
        }
        match opened {
            Some((user, token)) => {
                let mut channel = Channel::new(channel_id, user, token, ChannelStatus::Open);
                f(&mut channel);
                *guard = Some(channel.clone());
                Ok(Some(channel))
            }
            None => {
                log::warn!("event on unknown channel {:?}", channel_id);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl EventHandler for Coordinator {
    async fn handle(&self, event: ContractEvent) -> Result<()> {
        match event {
            ContractEvent::ChannelOpened {
                channel_id,
                user,
                token,
                amount,
            } => {
                self.with_channel(channel_id, Some((user, token)), |_| {})
                    .await?;
                self.notify(DomainEvent::UserDeposit {
                    channel_id,
                    user,
                    token,
                    amount,
                });
            }
            ContractEvent::UserNewDeposit {
                channel_id,
                user,
                token,
                new_deposit,
                ..
            } => {
                self.notify(DomainEvent::UserDeposit {
                    channel_id,
                    user,
                    token,
                    amount: new_deposit,
                });
            }
            ContractEvent::UserWithdraw {
                channel_id,
                user,
                token,
                amount,
            } => {
                self.notify(DomainEvent::UserWithdraw {
                    channel_id,
                    user,
                    token,
                    amount,
                });
            }
            ContractEvent::CooperativeSettled {
                channel_id,
                user,
                token,
                balance,
            } => {
                self.with_channel(channel_id, None, |channel| {
                    Coordinator::status_transition(channel, ChannelStatus::Closed)
                })
                .await?;
                self.notify(DomainEvent::UserWithdraw {
                    channel_id,
                    user,
                    token,
                    amount: balance,
                });
            }
            ContractEvent::ChannelClosed {
                channel_id,
                closer,
                nonce,
                ..
            } => {
                log::info!(
                    "channel {:?} closed by {:?} at nonce {}",
                    channel_id,
                    closer,
                    nonce
                );
                self.with_channel(channel_id, None, |channel| {
                    Coordinator::status_transition(channel, ChannelStatus::Closing)
                })
                .await?;
            }
            ContractEvent::ChannelSettled {
                channel_id,
                transfer_to_user_amount,
                transfer_to_provider_amount,
            } => {
                self.with_channel(channel_id, None, |channel| {
                    Coordinator::status_transition(channel, ChannelStatus::Settled)
                })
                .await?;
                self.notify(DomainEvent::UserForceWithdraw {
                    channel_id,
                    user_amount: transfer_to_user_amount,
                    provider_amount: transfer_to_provider_amount,
                });
            }
            ContractEvent::ProviderNewDeposit { token, amount } => {
                self.notify(DomainEvent::ProviderDeposit { token, amount });
            }
            ContractEvent::ProviderWithdraw { token, amount } => {
                self.notify(DomainEvent::ProviderWithdraw { token, amount });
            }
            ContractEvent::Transfer {
                from,
                to,
                channel_id,
                balance,
                nonce,
                additional_hash,
                signature,
            } => {
                if to != self.provider() {
                    return Ok(());
                }
                self.on_transfer(from, channel_id, balance, nonce, additional_hash, signature)
                    .await?;
            }
            ContractEvent::UserProposeWithdraw {
                channel_id,
                balance,
                last_commit_block,
                ..
            } => {
                self.on_attestation_request(
                    AttestationKind::UserWithdraw,
                    channel_id,
                    balance,
                    last_commit_block,
                )
                .await?;
            }
            ContractEvent::ProposeCooperativeSettle {
                channel_id,
                balance,
                last_commit_block,
                ..
            } => {
                self.on_attestation_request(
                    AttestationKind::CooperativeSettle,
                    channel_id,
                    balance,
                    last_commit_block,
                )
                .await?;
            }
            ContractEvent::ConfirmProviderWithdraw {
                token,
                balance,
                last_commit_block,
                signature,
            } => {
                self.on_confirm_provider_withdraw(token, balance, last_commit_block, signature)
                    .await?;
            }
            ContractEvent::InitSession { session_id } => {
                log::debug!("session {:?} initialized", session_id);
                self.notify(DomainEvent::InitSession);
            }
            ContractEvent::JoinSession { session_id, user } => {
                log::debug!("{:?} joined session {:?}", user, session_id);
                self.notify(DomainEvent::JoinSession);
            }
            ContractEvent::CloseSession { session_id } => {
                log::debug!("session {:?} closed", session_id);
                self.notify(DomainEvent::CloseSession);
            }
            ContractEvent::SendMessage {
                session_id,
                from,
                to,
                content,
            } => {
                self.notify(DomainEvent::Message {
                    session_id,
                    from,
                    to,
                    content,
                });
            }
        }
        Ok(())
    }
}
