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

//! # Photo Market
//!
//! This library provides the backend engine for a photo marketplace: listings
//! move through a moderation and sale lifecycle (pending, approved, rejected,
//! sold) while bids, payments, notifications, and seller balances are tracked
//! concurrently.
//!
//! ## Core Components
//!
//! - [`Market`]: Central engine coordinating listings, bids, payments, and balances
//! - [`PhotoCatalog`]: Photo rows carrying status and the cached best offer
//! - [`UserDirectory`]: User rows keyed by external identity, auto-created on first sight
//! - [`OfferPolicy`]: How an incoming bid replaces the cached best offer
//! - [`MarketError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use photo_market_rs::{Market, PhotoStatus, Role};
//! use rust_decimal_macros::dec;
//!
//! let market = Market::new();
//! market.register(&"moderator".into(), "Mo", Role::Admin);
//!
//! // List a photo and let the moderator approve it.
//! let photo_id = market.submit_photo(&"seller".into(), "Dusk over the bay");
//! market
//!     .set_status(photo_id, &"moderator".into(), PhotoStatus::Approved)
//!     .unwrap();
//!
//! // A buyer bids, the owner accepts, the buyer pays.
//! market
//!     .place_bid(photo_id, &"buyer".into(), "Billie", dec!(45.00))
//!     .unwrap();
//! market.accept_offer(photo_id, &"seller".into()).unwrap();
//! let receipt = market
//!     .record_payment(photo_id, &"buyer".into(), dec!(45.00), Some("card"), None)
//!     .unwrap();
//!
//! assert!(receipt.tracking_number.starts_with("TRX-"));
//! assert_eq!(market.balance_of(&"seller".into()), dec!(45.00));
//! ```
//!
//! ## Thread Safety
//!
//! Every operation takes `&self` and may be called from multiple threads.
//! Sales of the same photo are serialized on its row lock, so a photo can be
//! paid for at most once no matter how many buyers race.

pub mod error;
pub mod user;

mod base;
mod bid;
mod market;
mod notification;
mod offer;
mod payment;
mod photo;

pub use base::{BidId, ExternalId, NotificationId, PaymentId, PhotoId, UserId};
pub use bid::{Bid, BidLedger};
pub use error::MarketError;
pub use market::{BalanceCorrection, Market};
pub use notification::{Notification, NotificationKind, NotificationPayload, NotificationStore};
pub use offer::{AcceptedOffer, BestOffer, OfferPolicy};
pub use payment::{
    DEFAULT_PAYMENT_METHOD, IdempotencyKey, Payment, PaymentLedger, PaymentReceipt, PaymentStatus,
    RecordOutcome,
};
pub use photo::{Photo, PhotoCatalog, PhotoSnapshot, PhotoStatus, SaleLock};
pub use user::{Role, User, UserDirectory};
