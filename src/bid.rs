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

//! Append-only bid ledger.
//!
//! Every placed bid is recorded here regardless of what the offer policy
//! does with the cache, so the cached best offer stays recomputable from
//! first principles. Entries are never updated; the only removal is the
//! cascade when a photo is deleted.

use crate::base::{BidId, ExternalId, PhotoId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// One ledger entry.
///
/// `bidder_name` is a display-name snapshot taken at placement time; the
/// directory row may be renamed later without rewriting history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Bid {
    pub id: BidId,
    pub photo_id: PhotoId,
    pub bidder_id: ExternalId,
    pub bidder_name: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe append-only ledger of bids.
///
/// A [`DashMap`] keyed by monotonically allocated [`BidId`] gives O(1)
/// concurrent appends; placement order is the id order.
#[derive(Debug, Default)]
pub struct BidLedger {
    bids: DashMap<BidId, Bid>,
    next_id: AtomicU64,
}

impl BidLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a bid and returns the stored record.
    pub fn append(
        &self,
        photo_id: PhotoId,
        bidder_id: ExternalId,
        bidder_name: &str,
        amount: Decimal,
    ) -> Bid {
        let id = BidId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let bid = Bid {
            id,
            photo_id,
            bidder_id,
            bidder_name: bidder_name.to_owned(),
            amount,
            created_at: Utc::now(),
        };
        self.bids.insert(id, bid.clone());
        bid
    }

    /// Ledger slice for one photo, in placement order.
    pub fn for_photo(&self, photo_id: PhotoId) -> Vec<Bid> {
        let mut slice: Vec<Bid> = self
            .bids
            .iter()
            .filter(|bid| bid.photo_id == photo_id)
            .map(|bid| bid.clone())
            .collect();
        slice.sort_by_key(|bid| bid.id);
        slice
    }

    /// Removes every bid for a photo; returns how many were dropped.
    pub fn remove_for_photo(&self, photo_id: PhotoId) -> usize {
        // Collect first: counting around a retain would misreport if
        // unrelated appends interleave.
        let ids: Vec<BidId> = self
            .bids
            .iter()
            .filter(|bid| bid.photo_id == photo_id)
            .map(|bid| bid.id)
            .collect();
        for id in &ids {
            self.bids.remove(id);
        }
        ids.len()
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }
}
