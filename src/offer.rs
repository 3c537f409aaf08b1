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

//! Best-offer cache policy.
//!
//! Every placed bid lands in the append-only ledger; the policy only decides
//! whether the bid also becomes the photo's cached best offer. The default is
//! last-write-wins: the cache shows the most recent offer, not necessarily
//! the highest, so a bidder can legally lower the apparent best. The
//! ascending-auction alternative is available as [`OfferPolicy::HighestWins`].
//!
//! # Example
//!
//! ```
//! use photo_market_rs::OfferPolicy;
//! use rust_decimal_macros::dec;
//!
//! let policy = OfferPolicy::default();
//! assert!(policy.accepts(Some(dec!(50.00)), dec!(30.00)));
//! assert!(!OfferPolicy::HighestWins.accepts(Some(dec!(50.00)), dec!(30.00)));
//! ```

use crate::base::{ExternalId, PhotoId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cached top-bid fields on a photo.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BestOffer {
    pub amount: Decimal,
    pub bidder_name: String,
    pub bidder_id: ExternalId,
}

/// Rule deciding whether an incoming bid overwrites the cached best offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OfferPolicy {
    /// Every bid overwrites the cache, regardless of amount ordering.
    #[default]
    LastWriteWins,
    /// A bid overwrites the cache only when strictly higher than the cached
    /// amount; an empty cache accepts any bid.
    HighestWins,
}

impl OfferPolicy {
    /// Decides whether a candidate amount replaces the current cached amount.
    pub fn accepts(self, current: Option<Decimal>, candidate: Decimal) -> bool {
        match self {
            OfferPolicy::LastWriteWins => true,
            OfferPolicy::HighestWins => current.is_none_or(|best| candidate > best),
        }
    }
}

impl fmt::Display for OfferPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferPolicy::LastWriteWins => write!(f, "last-write-wins"),
            OfferPolicy::HighestWins => write!(f, "highest-wins"),
        }
    }
}

/// Offer snapshot handed to the acceptance flow, pairing the cached fields
/// with the photo they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedOffer {
    pub photo_id: PhotoId,
    pub amount: Decimal,
    pub bidder_name: String,
    pub bidder_id: ExternalId,
}
