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

//! Photo catalog and listing state machine.
//!
//! Transitions are one-directional; only an admin override moves a photo
//! against the arrows. The row also carries the denormalized best-offer
//! cache maintained by the offer policy.
//
//  Pending ──approve──► Approved ──accept/pay──► Sold
//     │
//     └───reject───► Rejected

use crate::base::{PhotoId, UserId};
use crate::error::MarketError;
use crate::offer::{AcceptedOffer, BestOffer, OfferPolicy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Listing state of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Pending,
    Approved,
    Rejected,
    Sold,
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoStatus::Pending => write!(f, "pending"),
            PhotoStatus::Approved => write!(f, "approved"),
            PhotoStatus::Rejected => write!(f, "rejected"),
            PhotoStatus::Sold => write!(f, "sold"),
        }
    }
}

impl PhotoStatus {
    /// One-directional transition table; everything else needs an admin
    /// override.
    pub fn is_forward(self, to: PhotoStatus) -> bool {
        matches!(
            (self, to),
            (PhotoStatus::Pending, PhotoStatus::Approved)
                | (PhotoStatus::Pending, PhotoStatus::Rejected)
                | (PhotoStatus::Approved, PhotoStatus::Sold)
        )
    }
}

#[derive(Debug)]
struct PhotoData {
    id: PhotoId,
    owner_id: UserId,
    title: String,
    status: PhotoStatus,
    best_offer: Option<BestOffer>,
    created_at: DateTime<Utc>,
}

impl PhotoData {
    fn new(id: PhotoId, owner_id: UserId, title: &str) -> Self {
        Self {
            id,
            owner_id,
            title: title.to_owned(),
            status: PhotoStatus::Pending,
            best_offer: None,
            created_at: Utc::now(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.best_offer
                .as_ref()
                .is_none_or(|offer| offer.amount > Decimal::ZERO),
            "Invariant violated: cached offer amount is not positive"
        );
    }

    fn snapshot(&self) -> PhotoSnapshot {
        PhotoSnapshot {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title.clone(),
            status: self.status,
            best_offer: self.best_offer.clone(),
            created_at: self.created_at,
        }
    }
}

/// Point-in-time copy of a catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PhotoSnapshot {
    pub id: PhotoId,
    pub owner_id: UserId,
    pub title: String,
    pub status: PhotoStatus,
    pub best_offer: Option<BestOffer>,
    pub created_at: DateTime<Utc>,
}

/// Catalog row for one photo.
#[derive(Debug)]
pub struct Photo {
    inner: Mutex<PhotoData>,
}

impl Photo {
    pub fn new(id: PhotoId, owner_id: UserId, title: &str) -> Self {
        Self {
            inner: Mutex::new(PhotoData::new(id, owner_id, title)),
        }
    }

    pub fn id(&self) -> PhotoId {
        self.inner.lock().id
    }

    pub fn owner_id(&self) -> UserId {
        self.inner.lock().owner_id
    }

    pub fn title(&self) -> String {
        self.inner.lock().title.clone()
    }

    pub fn status(&self) -> PhotoStatus {
        self.inner.lock().status
    }

    pub fn best_offer(&self) -> Option<BestOffer> {
        self.inner.lock().best_offer.clone()
    }

    pub fn snapshot(&self) -> PhotoSnapshot {
        self.inner.lock().snapshot()
    }

    /// Applies a bid to the cached best offer under the row lock.
    ///
    /// Returns whether the cache was overwritten; the ledger append never
    /// depends on this.
    pub fn record_offer(&self, policy: OfferPolicy, offer: BestOffer) -> bool {
        let mut data = self.inner.lock();
        let current = data.best_offer.as_ref().map(|best| best.amount);
        if !policy.accepts(current, offer.amount) {
            return false;
        }
        data.best_offer = Some(offer);
        data.assert_invariants();
        true
    }

    /// Accepts the cached best offer, flipping the row to sold.
    ///
    /// Check and flip happen under one lock so a concurrent payment cannot
    /// interleave between them.
    pub fn accept(&self) -> Result<AcceptedOffer, MarketError> {
        let mut data = self.inner.lock();
        if data.status != PhotoStatus::Approved {
            return Err(MarketError::InvalidTransition {
                from: data.status,
                to: PhotoStatus::Sold,
            });
        }
        let offer = data.best_offer.clone().ok_or(MarketError::NoCurrentOffer)?;
        data.status = PhotoStatus::Sold;
        Ok(AcceptedOffer {
            photo_id: data.id,
            amount: offer.amount,
            bidder_name: offer.bidder_name,
            bidder_id: offer.bidder_id,
        })
    }

    /// Takes the row lock for a payment.
    ///
    /// The guard is held across the payment insert and the status flip, so
    /// concurrent payments on one photo serialize and no reader observes the
    /// row between insert and flip. Acceptance already flips the row to sold
    /// before the buyer pays, so sold status alone is no conflict; the
    /// payment ledger's per-photo uniqueness is the gate.
    pub fn lock_for_sale(&self) -> SaleLock<'_> {
        SaleLock {
            data: self.inner.lock(),
        }
    }

    /// Unconditional status overwrite for administrative overrides.
    pub fn set_status(&self, to: PhotoStatus) -> PhotoStatus {
        let mut data = self.inner.lock();
        std::mem::replace(&mut data.status, to)
    }
}

/// Exclusive hold on a photo row while its payment is recorded.
pub struct SaleLock<'a> {
    data: MutexGuard<'a, PhotoData>,
}

impl SaleLock<'_> {
    pub fn owner_id(&self) -> UserId {
        self.data.owner_id
    }

    pub fn title(&self) -> &str {
        &self.data.title
    }

    pub fn mark_sold(&mut self) {
        self.data.status = PhotoStatus::Sold;
    }
}

/// Concurrent photo store keyed by catalog id.
#[derive(Debug, Default)]
pub struct PhotoCatalog {
    photos: DashMap<PhotoId, Photo>,
    next_id: AtomicU32,
}

impl PhotoCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new pending listing and returns its id.
    pub fn submit(&self, owner_id: UserId, title: &str) -> PhotoId {
        let id = PhotoId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.photos.insert(id, Photo::new(id, owner_id, title));
        id
    }

    pub fn get(&self, id: PhotoId) -> Option<Ref<'_, PhotoId, Photo>> {
        self.photos.get(&id)
    }

    pub fn snapshot(&self, id: PhotoId) -> Option<PhotoSnapshot> {
        self.photos.get(&id).map(|photo| photo.snapshot())
    }

    /// Snapshots every row, ordered by catalog id.
    pub fn snapshots(&self) -> Vec<PhotoSnapshot> {
        let mut rows: Vec<PhotoSnapshot> =
            self.photos.iter().map(|photo| photo.snapshot()).collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    pub fn remove(&self, id: PhotoId) -> Option<Photo> {
        self.photos.remove(&id).map(|(_, photo)| photo)
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }
}
