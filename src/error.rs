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

//! Error types for marketplace operations.

use crate::photo::PhotoStatus;
use thiserror::Error;

/// Marketplace operation errors.
///
/// Variants group into the taxonomy the HTTP layer maps onto status codes:
/// validation, not-found, authorization, and state-conflict failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Referenced photo does not exist
    #[error("photo not found")]
    PhotoNotFound,

    /// Referenced user does not exist
    #[error("user not found")]
    UserNotFound,

    /// Referenced notification does not exist
    #[error("notification not found")]
    NotificationNotFound,

    /// Caller is neither the photo owner nor an admin
    #[error("caller does not own this photo")]
    NotOwner,

    /// Caller is not the notification recipient
    #[error("caller is not the notification recipient")]
    NotRecipient,

    /// Operation is an administrative capability
    #[error("admin role required")]
    AdminRequired,

    /// Photo already has a completed payment
    #[error("photo already sold")]
    AlreadySold,

    /// No best offer is cached for the photo
    #[error("no offer to accept")]
    NoCurrentOffer,

    /// Requested status change is not a permitted transition
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: PhotoStatus, to: PhotoStatus },
}
