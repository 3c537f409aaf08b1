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

//! Payment records, the per-photo sale gate, and the idempotency index.
//!
//! A payment is created exactly once per photo and is immutable afterwards.
//! Client-supplied idempotency keys are stored uniquely; replaying a key
//! yields the original record instead of a second charge.

use crate::base::{PaymentId, PhotoId, UserId};
use crate::error::MarketError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Payment method recorded when a client does not name one.
pub const DEFAULT_PAYMENT_METHOD: &str = "unknown";

/// Prefix of every tracking number.
const TRACKING_PREFIX: &str = "TRX-";

/// Client-supplied retry token for payment creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(value: &str) -> Self {
        IdempotencyKey(value.to_owned())
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        IdempotencyKey(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Modeled intake state; the engine itself only writes completed rows.
    Pending,
    Completed,
}

/// One immutable payment record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub photo_id: PhotoId,
    pub amount: Decimal,
    pub payment_method: String,
    pub status: PaymentStatus,
    pub tracking_number: String,
    pub created_at: DateTime<Utc>,
}

/// What `record_payment` hands back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaymentReceipt {
    pub payment_id: PaymentId,
    pub tracking_number: String,
}

impl From<&Payment> for PaymentReceipt {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            tracking_number: payment.tracking_number.clone(),
        }
    }
}

/// Result of a ledger insert attempt.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// A fresh row was written; the caller owns the follow-up effects.
    Created(Payment),
    /// The idempotency key was seen before; no row was written.
    Replayed(Payment),
}

/// Thread-safe payment store enforcing one completed payment per photo.
///
/// Three maps: records keyed by monotonic id, a unique per-photo index, and
/// an idempotency-key index. The per-photo entry API makes the
/// paid-check-and-insert atomic, so a photo can never gain a second payment;
/// key replays are resolved before that gate, so a retried request answers
/// with its original receipt instead of a conflict.
#[derive(Debug, Default)]
pub struct PaymentLedger {
    payments: DashMap<PaymentId, Payment>,
    by_photo: DashMap<PhotoId, PaymentId>,
    idempotency: DashMap<IdempotencyKey, PaymentId>,
    next_id: AtomicU64,
}

impl PaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a completed payment, honoring an idempotency key when given.
    ///
    /// Callers serialize per photo on the catalog row lock; the replay check
    /// therefore sees any earlier retry of the same request before the
    /// per-photo gate can reject it.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::AlreadySold`] if the photo already has a
    /// payment and no replay matched.
    pub fn record(
        &self,
        buyer_id: UserId,
        seller_id: UserId,
        photo_id: PhotoId,
        amount: Decimal,
        payment_method: &str,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<RecordOutcome, MarketError> {
        if let Some(key) = &idempotency_key {
            if let Some(original) = self.replay(key) {
                return Ok(RecordOutcome::Replayed(original));
            }
        }

        // Atomic check-and-insert on the photo index: exactly one payment
        // can ever occupy the slot.
        match self.by_photo.entry(photo_id) {
            Entry::Occupied(_) => Err(MarketError::AlreadySold),
            Entry::Vacant(entry) => {
                let payment = self.insert(buyer_id, seller_id, photo_id, amount, payment_method);
                entry.insert(payment.id);
                if let Some(key) = idempotency_key {
                    self.idempotency.insert(key, payment.id);
                }
                Ok(RecordOutcome::Created(payment))
            }
        }
    }

    fn insert(
        &self,
        buyer_id: UserId,
        seller_id: UserId,
        photo_id: PhotoId,
        amount: Decimal,
        payment_method: &str,
    ) -> Payment {
        let id = PaymentId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let payment = Payment {
            id,
            buyer_id,
            seller_id,
            photo_id,
            amount,
            payment_method: payment_method.to_owned(),
            status: PaymentStatus::Completed,
            tracking_number: tracking_number(),
            created_at: Utc::now(),
        };
        self.payments.insert(id, payment.clone());
        payment
    }

    /// Returns the payment a key was originally spent on, if any.
    pub fn replay(&self, key: &IdempotencyKey) -> Option<Payment> {
        let id = *self.idempotency.get(key)?;
        self.payments.get(&id).map(|payment| payment.clone())
    }

    /// Payments where the user is buyer or seller, newest first.
    pub fn for_participant(&self, user_id: UserId) -> Vec<Payment> {
        let mut rows: Vec<Payment> = self
            .payments
            .iter()
            .filter(|payment| payment.buyer_id == user_id || payment.seller_id == user_id)
            .map(|payment| payment.clone())
            .collect();
        rows.sort_by_key(|payment| std::cmp::Reverse(payment.id));
        rows
    }

    /// All payments referencing a photo, in creation order.
    pub fn for_photo(&self, photo_id: PhotoId) -> Vec<Payment> {
        let mut rows: Vec<Payment> = self
            .payments
            .iter()
            .filter(|payment| payment.photo_id == photo_id)
            .map(|payment| payment.clone())
            .collect();
        rows.sort_by_key(|payment| payment.id);
        rows
    }

    /// Sum of completed amounts grouped by seller, the recompute source.
    pub fn completed_by_seller(&self) -> HashMap<UserId, Decimal> {
        let mut totals: HashMap<UserId, Decimal> = HashMap::new();
        for payment in self.payments.iter() {
            if payment.status == PaymentStatus::Completed {
                *totals.entry(payment.seller_id).or_insert(Decimal::ZERO) += payment.amount;
            }
        }
        totals
    }

    /// Removes every payment for a photo along with any keys pointing at
    /// them; returns how many rows were dropped.
    pub fn remove_for_photo(&self, photo_id: PhotoId) -> usize {
        let ids: Vec<PaymentId> = self
            .payments
            .iter()
            .filter(|payment| payment.photo_id == photo_id)
            .map(|payment| payment.id)
            .collect();
        for id in &ids {
            self.payments.remove(id);
        }
        self.by_photo.remove(&photo_id);
        if !ids.is_empty() {
            self.idempotency.retain(|_, id| !ids.contains(id));
        }
        ids.len()
    }

    pub fn len(&self) -> usize {
        self.payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payments.is_empty()
    }
}

/// Opaque unique token shown to clients for a completed payment.
fn tracking_number() -> String {
    format!(
        "{}{}",
        TRACKING_PREFIX,
        Uuid::new_v4().simple().to_string().to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tracking_numbers_carry_prefix_and_differ() {
        let a = tracking_number();
        let b = tracking_number();
        assert!(a.starts_with("TRX-"));
        assert!(b.starts_with("TRX-"));
        assert_ne!(a, b);
        // Suffix is uppercase hex from a v4 UUID.
        assert!(a["TRX-".len()..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn same_key_records_once() {
        let ledger = PaymentLedger::new();
        let first = ledger
            .record(
                UserId(2),
                UserId(1),
                PhotoId(7),
                dec!(30.00),
                DEFAULT_PAYMENT_METHOD,
                Some("retry-1".into()),
            )
            .unwrap();
        let second = ledger
            .record(
                UserId(2),
                UserId(1),
                PhotoId(7),
                dec!(30.00),
                DEFAULT_PAYMENT_METHOD,
                Some("retry-1".into()),
            )
            .unwrap();

        let RecordOutcome::Created(original) = first else {
            panic!("first insert should create");
        };
        let RecordOutcome::Replayed(replayed) = second else {
            panic!("second insert should replay");
        };
        assert_eq!(original, replayed);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn second_payment_for_photo_conflicts() {
        let ledger = PaymentLedger::new();
        ledger
            .record(UserId(2), UserId(1), PhotoId(7), dec!(30.00), "card", None)
            .unwrap();

        // A different buyer with a different key still hits the gate.
        let second = ledger.record(
            UserId(3),
            UserId(1),
            PhotoId(7),
            dec!(35.00),
            "card",
            Some("other-key".into()),
        );
        assert_eq!(second.unwrap_err(), MarketError::AlreadySold);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn distinct_photos_record_independently() {
        let ledger = PaymentLedger::new();
        for photo in 1..=3 {
            ledger
                .record(UserId(2), UserId(1), PhotoId(photo), dec!(10.00), "card", None)
                .unwrap();
        }
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn cascade_remove_sweeps_all_indexes() {
        let ledger = PaymentLedger::new();
        let key = IdempotencyKey::from("pm-1");
        ledger
            .record(UserId(2), UserId(1), PhotoId(7), dec!(30.00), "card", Some(key.clone()))
            .unwrap();

        assert_eq!(ledger.remove_for_photo(PhotoId(7)), 1);
        assert!(ledger.is_empty());
        assert!(ledger.replay(&key).is_none());

        // The photo slot is free again once its rows are gone.
        ledger
            .record(UserId(3), UserId(1), PhotoId(7), dec!(12.00), "card", None)
            .unwrap();
        assert_eq!(ledger.len(), 1);
    }
}
