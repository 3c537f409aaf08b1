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

//! Notification records and the per-recipient inbox.
//!
//! The dispatcher is a pure insert with no business logic; the bid and
//! payment flows decide who gets notified and with what text. Reading,
//! marking read, and deleting all require the caller to be the recipient.

use crate::base::{ExternalId, NotificationId, PhotoId};
use crate::error::MarketError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BidPlaced,
    PaymentRequired,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::BidPlaced => write!(f, "bid_placed"),
            NotificationKind::PaymentRequired => write!(f, "payment_required"),
        }
    }
}

/// Structured payload carried alongside the display text.
///
/// Variants are distinguished by field shape on the wire; the row's kind is
/// the tag clients dispatch on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    BidPlaced {
        photo_id: PhotoId,
        amount: Decimal,
        bidder_name: String,
    },
    PaymentRequired {
        photo_id: PhotoId,
        photo_title: String,
        amount: Decimal,
    },
}

impl NotificationPayload {
    pub fn photo_id(&self) -> PhotoId {
        match self {
            Self::BidPlaced { photo_id, .. } => *photo_id,
            Self::PaymentRequired { photo_id, .. } => *photo_id,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            Self::BidPlaced { amount, .. } => *amount,
            Self::PaymentRequired { amount, .. } => *amount,
        }
    }
}

/// One inbox row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: ExternalId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub payload: NotificationPayload,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe notification store.
#[derive(Debug, Default)]
pub struct NotificationStore {
    notifications: DashMap<NotificationId, Notification>,
    next_id: AtomicU64,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure insert; returns the stored row.
    pub fn push(
        &self,
        recipient_id: ExternalId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        payload: NotificationPayload,
    ) -> Notification {
        let id = NotificationId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let notification = Notification {
            id,
            recipient_id,
            kind,
            title: title.to_owned(),
            message: message.to_owned(),
            payload,
            is_read: false,
            created_at: Utc::now(),
        };
        self.notifications.insert(id, notification.clone());
        notification
    }

    /// The recipient's inbox, newest first.
    pub fn for_recipient(&self, recipient_id: &ExternalId) -> Vec<Notification> {
        let mut rows: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|notification| notification.recipient_id == *recipient_id)
            .map(|notification| notification.clone())
            .collect();
        rows.sort_by_key(|notification| std::cmp::Reverse(notification.id));
        rows
    }

    /// Deletes a row, but only for its recipient.
    pub fn delete(
        &self,
        id: NotificationId,
        caller: &ExternalId,
    ) -> Result<(), MarketError> {
        // remove_if makes the recipient check and the removal one atomic
        // step; a mismatched caller cannot race the row away.
        match self
            .notifications
            .remove_if(&id, |_, notification| notification.recipient_id == *caller)
        {
            Some(_) => Ok(()),
            None if self.notifications.contains_key(&id) => Err(MarketError::NotRecipient),
            None => Err(MarketError::NotificationNotFound),
        }
    }

    /// Marks a row read, but only for its recipient.
    pub fn mark_read(
        &self,
        id: NotificationId,
        caller: &ExternalId,
    ) -> Result<(), MarketError> {
        let mut notification = self
            .notifications
            .get_mut(&id)
            .ok_or(MarketError::NotificationNotFound)?;
        if notification.recipient_id != *caller {
            return Err(MarketError::NotRecipient);
        }
        notification.is_read = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}
