// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Photo Market Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Marketplace engine.
//!
//! The [`Market`] is the central component coordinating the user directory,
//! photo catalog, bid ledger, payment ledger, and notification store. It
//! drives the offer/payment lifecycle:
//!
//! - **Bids**: appended to the ledger unconditionally; the offer policy
//!   decides whether the photo's cached best offer is overwritten.
//! - **Acceptance**: flips an approved photo to sold and asks the cached
//!   bidder to pay. Moves no money.
//! - **Payments**: insert the completed payment, flip the photo to sold, and
//!   credit the seller, with the photo row lock held across check and insert.
//! - **Notifications**: a best-effort side channel; a failed dispatch never
//!   aborts the operation that triggered it.
//!
//! # Thread Safety
//!
//! All stores are [`DashMap`]-backed and operations may run concurrently.
//! Paths that nest acquisitions always take locks in the same direction:
//! photo row first, then ledger entries, then directory rows.
//!
//! [`DashMap`]: dashmap::DashMap

use crate::base::{ExternalId, NotificationId, PhotoId, UserId};
use crate::bid::{Bid, BidLedger};
use crate::error::MarketError;
use crate::notification::{Notification, NotificationKind, NotificationPayload, NotificationStore};
use crate::offer::{AcceptedOffer, BestOffer, OfferPolicy};
use crate::payment::{
    DEFAULT_PAYMENT_METHOD, IdempotencyKey, Payment, PaymentLedger, PaymentReceipt, RecordOutcome,
};
use crate::photo::{PhotoCatalog, PhotoSnapshot, PhotoStatus};
use crate::user::{Role, User, UserDirectory};
use rust_decimal::Decimal;
use serde::Serialize;

/// One row of the balance reconciliation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceCorrection {
    pub user_id: UserId,
    pub external_id: ExternalId,
    pub previous: Decimal,
    pub recomputed: Decimal,
}

/// Marketplace engine tying the stores together.
///
/// # Invariants
///
/// - A photo gains at most one completed payment; the losing side of a
///   concurrent payment race observes a conflict.
/// - A seller's balance equals the sum of their completed payment amounts,
///   except for surfaced drift repairable via [`Market::recompute_balances`].
/// - The bid ledger is append-only; the cached best offer is derived from it
///   by the configured [`OfferPolicy`].
pub struct Market {
    users: UserDirectory,
    photos: PhotoCatalog,
    bids: BidLedger,
    payments: PaymentLedger,
    notifications: NotificationStore,
    policy: OfferPolicy,
}

impl Market {
    /// Creates an empty market with the last-write-wins offer policy.
    pub fn new() -> Self {
        Self::with_policy(OfferPolicy::default())
    }

    /// Creates an empty market with an explicit offer policy.
    pub fn with_policy(policy: OfferPolicy) -> Self {
        Market {
            users: UserDirectory::new(),
            photos: PhotoCatalog::new(),
            bids: BidLedger::new(),
            payments: PaymentLedger::new(),
            notifications: NotificationStore::new(),
            policy,
        }
    }

    pub fn policy(&self) -> OfferPolicy {
        self.policy
    }

    // === Directory ===

    /// Provisions a user with an explicit role, promoting an existing row.
    ///
    /// Normal callers are auto-created with role `user` by the operations
    /// they invoke; this exists so admins can be provisioned.
    pub fn register(&self, external_id: &ExternalId, name: &str, role: Role) -> UserId {
        self.users.register(external_id, name, role)
    }

    pub fn user_id(&self, external_id: &ExternalId) -> Option<UserId> {
        self.users.lookup(external_id)
    }

    pub fn get_user(
        &self,
        id: UserId,
    ) -> Option<dashmap::mapref::one::Ref<'_, UserId, User>> {
        self.users.get(id)
    }

    /// Returns an iterator over all directory rows.
    ///
    /// Useful for generating balance reports.
    pub fn users(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, UserId, User>> {
        self.users.users()
    }

    /// Current balance for an identity, auto-creating the row on first sight.
    pub fn balance_of(&self, external_id: &ExternalId) -> Decimal {
        let id = self.users.resolve_or_create(external_id, None);
        self.users
            .get(id)
            .map(|user| user.balance())
            .unwrap_or(Decimal::ZERO)
    }

    // === Catalog ===

    /// Submits a new listing for moderation; the owner row is auto-created.
    pub fn submit_photo(&self, owner: &ExternalId, title: &str) -> PhotoId {
        let owner_id = self.users.resolve_or_create(owner, None);
        self.photos.submit(owner_id, title)
    }

    pub fn photo(&self, photo_id: PhotoId) -> Option<PhotoSnapshot> {
        self.photos.snapshot(photo_id)
    }

    /// Snapshots of every listing, ordered by id.
    pub fn photos(&self) -> Vec<PhotoSnapshot> {
        self.photos.snapshots()
    }

    /// Transitions a photo's status.
    ///
    /// | Transition | Who |
    /// |------------|-----|
    /// | `approved`/`rejected` moderation and any override | admin |
    /// | `sold` | owner or admin, via the acceptance flow |
    ///
    /// # Errors
    ///
    /// - [`MarketError::PhotoNotFound`] - Unknown photo id.
    /// - [`MarketError::AdminRequired`] - Non-admin caller on a moderation or
    ///   override transition.
    /// - Acceptance-flow errors when `to` is `sold` (see
    ///   [`Market::accept_offer`]).
    pub fn set_status(
        &self,
        photo_id: PhotoId,
        caller: &ExternalId,
        to: PhotoStatus,
    ) -> Result<PhotoSnapshot, MarketError> {
        if to == PhotoStatus::Sold {
            self.accept_offer(photo_id, caller)?;
        } else {
            if !self.users.is_admin(caller) {
                return Err(MarketError::AdminRequired);
            }
            let photo = self
                .photos
                .get(photo_id)
                .ok_or(MarketError::PhotoNotFound)?;
            let from = photo.set_status(to);
            if !from.is_forward(to) {
                tracing::debug!(%photo_id, %from, %to, "administrative status override");
            }
        }
        self.photos
            .snapshot(photo_id)
            .ok_or(MarketError::PhotoNotFound)
    }

    /// Deletes a listing and cascades to its dependents.
    ///
    /// The catalog row goes first, then every bid and payment referencing
    /// it. Balances are not retroactively debited; run
    /// [`Market::recompute_balances`] to reconcile afterwards.
    ///
    /// # Errors
    ///
    /// - [`MarketError::PhotoNotFound`] - Unknown photo id.
    /// - [`MarketError::NotOwner`] - Caller is neither owner nor admin.
    pub fn delete_photo(&self, photo_id: PhotoId, caller: &ExternalId) -> Result<(), MarketError> {
        let owner_id = {
            let photo = self
                .photos
                .get(photo_id)
                .ok_or(MarketError::PhotoNotFound)?;
            photo.owner_id()
        };
        self.authorize_owner(owner_id, caller)?;

        // Remove the row before sweeping dependents. The removal waits out
        // in-flight holders of the row, and once it returns no new bid or
        // payment can resolve the photo, so the sweep sees the final set and
        // nothing can append an orphan behind it.
        if self.photos.remove(photo_id).is_none() {
            return Err(MarketError::PhotoNotFound);
        }
        let dropped_bids = self.bids.remove_for_photo(photo_id);
        let dropped_payments = self.payments.remove_for_photo(photo_id);
        tracing::debug!(%photo_id, dropped_bids, dropped_payments, "photo deleted with cascade");
        Ok(())
    }

    // === Bidding ===

    /// Places a bid: appends to the ledger, lets the policy update the cached
    /// best offer, and notifies the owner when the bidder is someone else.
    ///
    /// The ledger never rejects a bid for being lower than a previous one.
    ///
    /// # Errors
    ///
    /// - [`MarketError::InvalidAmount`] - Zero or negative amount.
    /// - [`MarketError::PhotoNotFound`] - Unknown photo id.
    pub fn place_bid(
        &self,
        photo_id: PhotoId,
        bidder: &ExternalId,
        display_name: &str,
        amount: Decimal,
    ) -> Result<Bid, MarketError> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount);
        }
        let photo = self
            .photos
            .get(photo_id)
            .ok_or(MarketError::PhotoNotFound)?;
        self.users.resolve_or_create(bidder, Some(display_name));

        let bid = self
            .bids
            .append(photo_id, bidder.clone(), display_name, amount);
        photo.record_offer(
            self.policy,
            BestOffer {
                amount,
                bidder_name: display_name.to_owned(),
                bidder_id: bidder.clone(),
            },
        );

        // Best-effort side channel; a missing owner row is logged, never an
        // error for the bidder.
        match self.users.get(photo.owner_id()) {
            Some(owner) if owner.external_id() != *bidder => {
                self.dispatch(
                    owner.external_id(),
                    NotificationKind::BidPlaced,
                    "New Bid!",
                    &format!("{display_name} placed a bid of {amount} on your photo."),
                    NotificationPayload::BidPlaced {
                        photo_id,
                        amount,
                        bidder_name: display_name.to_owned(),
                    },
                );
            }
            Some(_) => {}
            None => {
                tracing::warn!(%photo_id, "bid notification skipped: owner row missing");
            }
        }
        Ok(bid)
    }

    pub fn bids_for_photo(&self, photo_id: PhotoId) -> Vec<Bid> {
        self.bids.for_photo(photo_id)
    }

    // === Acceptance and payment ===

    /// Accepts the photo's cached best offer. Status change only; no money
    /// moves until the bidder pays.
    ///
    /// # Errors
    ///
    /// - [`MarketError::PhotoNotFound`] - Unknown photo id.
    /// - [`MarketError::NotOwner`] - Caller is neither owner nor admin.
    /// - [`MarketError::InvalidTransition`] - Photo is not `approved`.
    /// - [`MarketError::NoCurrentOffer`] - Nothing is cached to accept.
    pub fn accept_offer(
        &self,
        photo_id: PhotoId,
        caller: &ExternalId,
    ) -> Result<AcceptedOffer, MarketError> {
        let photo = self
            .photos
            .get(photo_id)
            .ok_or(MarketError::PhotoNotFound)?;
        self.authorize_owner(photo.owner_id(), caller)?;

        let offer = photo.accept()?;
        let title = photo.title();
        self.dispatch(
            offer.bidder_id.clone(),
            NotificationKind::PaymentRequired,
            "Offer Accepted!",
            &format!(
                "Your offer of {} for '{}' was accepted. Please pay now.",
                offer.amount, title
            ),
            NotificationPayload::PaymentRequired {
                photo_id,
                photo_title: title,
                amount: offer.amount,
            },
        );
        Ok(offer)
    }

    /// Records a completed payment for a photo.
    ///
    /// Under the photo's row lock: the payment is inserted and the photo
    /// flipped to sold. The seller credit follows immediately; if it fails
    /// after the insert committed, the payment stays accepted and the drift
    /// is logged at error level for the operator.
    ///
    /// Supplying an idempotency key makes retries safe: a key seen before
    /// returns the original receipt and changes nothing.
    ///
    /// # Errors
    ///
    /// - [`MarketError::InvalidAmount`] - Zero or negative amount.
    /// - [`MarketError::PhotoNotFound`] - Unknown photo id.
    /// - [`MarketError::AlreadySold`] - The photo already has a payment.
    pub fn record_payment(
        &self,
        photo_id: PhotoId,
        buyer: &ExternalId,
        amount: Decimal,
        payment_method: Option<&str>,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<PaymentReceipt, MarketError> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount);
        }
        if let Some(key) = &idempotency_key {
            if let Some(original) = self.payments.replay(key) {
                return Ok(PaymentReceipt::from(&original));
            }
        }

        let photo = self
            .photos
            .get(photo_id)
            .ok_or(MarketError::PhotoNotFound)?;
        let buyer_id = self.users.resolve_or_create(buyer, None);
        let method = payment_method.unwrap_or(DEFAULT_PAYMENT_METHOD);

        // The row lock serializes sales of this photo, so the ledger's
        // replay and paid checks run race-free.
        let mut sale = photo.lock_for_sale();
        let payment = match self.payments.record(
            buyer_id,
            sale.owner_id(),
            photo_id,
            amount,
            method,
            idempotency_key,
        )? {
            RecordOutcome::Created(payment) => {
                sale.mark_sold();
                payment
            }
            // A retry that lost the race to the row lock; the winning
            // attempt already sold the photo and credited the seller.
            RecordOutcome::Replayed(original) => {
                return Ok(PaymentReceipt::from(&original));
            }
        };
        drop(sale);
        drop(photo);

        if let Err(error) = self.users.credit(payment.seller_id, payment.amount) {
            tracing::error!(
                payment_id = %payment.id,
                seller_id = %payment.seller_id,
                amount = %payment.amount,
                %error,
                "seller credit failed after payment commit; balance has drifted from the ledger"
            );
        }
        Ok(PaymentReceipt::from(&payment))
    }

    /// Payments where the caller is buyer or seller, newest first.
    ///
    /// The caller's row is auto-created on first sight, so an unseen identity
    /// gets an empty list, not an error.
    pub fn payments_for(&self, caller: &ExternalId) -> Vec<Payment> {
        let id = self.users.resolve_or_create(caller, None);
        self.payments.for_participant(id)
    }

    /// All payments referencing a photo, in creation order.
    pub fn payments_for_photo(&self, photo_id: PhotoId) -> Vec<Payment> {
        self.payments.for_photo(photo_id)
    }

    // === Notifications ===

    /// The caller's notifications, newest first.
    pub fn notifications_for(&self, caller: &ExternalId) -> Vec<Notification> {
        self.notifications.for_recipient(caller)
    }

    /// Deletes a notification; the caller must be its recipient.
    ///
    /// # Errors
    ///
    /// - [`MarketError::NotificationNotFound`] - Unknown notification id.
    /// - [`MarketError::NotRecipient`] - Caller is not the recipient.
    pub fn delete_notification(
        &self,
        id: NotificationId,
        caller: &ExternalId,
    ) -> Result<(), MarketError> {
        self.notifications.delete(id, caller)
    }

    /// Marks a notification read; the caller must be its recipient.
    ///
    /// # Errors
    ///
    /// - [`MarketError::NotificationNotFound`] - Unknown notification id.
    /// - [`MarketError::NotRecipient`] - Caller is not the recipient.
    pub fn mark_notification_read(
        &self,
        id: NotificationId,
        caller: &ExternalId,
    ) -> Result<(), MarketError> {
        self.notifications.mark_read(id, caller)
    }

    // === Reconciliation ===

    /// Recomputes every balance from the payment ledger.
    ///
    /// An administrative capability: each user's balance becomes the sum of
    /// completed payments where they are seller, zero when none. Returns the
    /// corrections applied to drifted rows, ordered by user id.
    ///
    /// # Errors
    ///
    /// - [`MarketError::AdminRequired`] - Caller does not hold the admin role.
    pub fn recompute_balances(
        &self,
        caller: &ExternalId,
    ) -> Result<Vec<BalanceCorrection>, MarketError> {
        if !self.users.is_admin(caller) {
            return Err(MarketError::AdminRequired);
        }

        let totals = self.payments.completed_by_seller();
        let mut corrections = Vec::new();
        for user in self.users.users() {
            let id = user.id();
            let recomputed = totals.get(&id).copied().unwrap_or(Decimal::ZERO);
            let previous = user.replace_balance(recomputed);
            if previous != recomputed {
                corrections.push(BalanceCorrection {
                    user_id: id,
                    external_id: user.external_id(),
                    previous,
                    recomputed,
                });
            }
        }
        corrections.sort_by_key(|correction| correction.user_id);
        if corrections.is_empty() {
            tracing::info!("balance recompute found no drift");
        } else {
            tracing::warn!(
                drifted = corrections.len(),
                "balance recompute corrected drifted rows"
            );
        }
        Ok(corrections)
    }

    // === Internals ===

    fn authorize_owner(&self, owner_id: UserId, caller: &ExternalId) -> Result<(), MarketError> {
        let owns = self
            .users
            .get(owner_id)
            .map(|owner| owner.external_id() == *caller)
            .unwrap_or(false);
        if owns || self.users.is_admin(caller) {
            Ok(())
        } else {
            Err(MarketError::NotOwner)
        }
    }

    fn dispatch(
        &self,
        recipient: ExternalId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        payload: NotificationPayload,
    ) {
        let notification = self
            .notifications
            .push(recipient, kind, title, message, payload);
        tracing::debug!(
            notification_id = %notification.id,
            recipient = %notification.recipient_id,
            %kind,
            "notification dispatched"
        );
    }
}

impl Default for Market {
    fn default() -> Self {
        Self::new()
    }
}
