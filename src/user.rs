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

//! User directory and seller balances.
//!
//! Users are created on first sight of a new external identity and are never
//! deleted; their balance is mutated only by the payment path and the
//! administrative recompute.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use photo_market_rs::{Role, User, UserId};
//!
//! let user = User::new(UserId(1), "uid-1".into(), "Alice", Role::User);
//! assert_eq!(user.balance(), dec!(0.00));
//! ```

use crate::base::{ExternalId, UserId};
use crate::error::MarketError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Directory role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug)]
struct UserData {
    id: UserId,
    external_id: ExternalId,
    name: String,
    role: Role,
    balance: Decimal,
}

impl UserData {
    fn new(id: UserId, external_id: ExternalId, name: &str, role: Role) -> Self {
        Self {
            id,
            external_id,
            name: name.to_owned(),
            role,
            balance: Decimal::ZERO,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }

    /// Increases the balance, returning the new value.
    fn credit(&mut self, amount: Decimal) -> Result<Decimal, MarketError> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount);
        }
        self.balance += amount;
        self.assert_invariants();
        Ok(self.balance)
    }

    /// Overwrites the balance, returning the previous value.
    fn replace_balance(&mut self, amount: Decimal) -> Decimal {
        let previous = std::mem::replace(&mut self.balance, amount);
        self.assert_invariants();
        previous
    }
}

/// Directory row for one user.
#[derive(Debug)]
pub struct User {
    inner: Mutex<UserData>,
}

impl User {
    const DECIMAL_PRECISION: u32 = 2;

    pub fn new(id: UserId, external_id: ExternalId, name: &str, role: Role) -> Self {
        Self {
            inner: Mutex::new(UserData::new(id, external_id, name, role)),
        }
    }

    pub fn id(&self) -> UserId {
        self.inner.lock().id
    }

    pub fn external_id(&self) -> ExternalId {
        self.inner.lock().external_id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn role(&self) -> Role {
        self.inner.lock().role
    }

    pub fn is_admin(&self) -> bool {
        self.inner.lock().role == Role::Admin
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    pub(crate) fn credit(&self, amount: Decimal) -> Result<Decimal, MarketError> {
        self.inner.lock().credit(amount)
    }

    pub(crate) fn replace_balance(&self, amount: Decimal) -> Decimal {
        self.inner.lock().replace_balance(amount)
    }

    pub(crate) fn set_role(&self, role: Role) {
        self.inner.lock().role = role;
    }

    /// Fills the display name if none was known when the row was auto-created.
    pub(crate) fn fill_name(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        let mut data = self.inner.lock();
        if data.name.is_empty() {
            data.name = name.to_owned();
        }
    }
}

impl Serialize for User {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("User", 5)?;
        state.serialize_field("id", &data.id)?;
        state.serialize_field("identity", &data.external_id)?;
        state.serialize_field("name", &data.name)?;
        state.serialize_field("role", &data.role)?;
        state.serialize_field("balance", &data.balance.round_dp(User::DECIMAL_PRECISION))?;
        state.end()
    }
}

/// Maps opaque external identities to directory rows.
///
/// Lookups by external identity go through an index map; the row map is keyed
/// by internal id. Paths that touch both always lock index before row, never
/// the reverse.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: DashMap<UserId, User>,
    index: DashMap<ExternalId, UserId>,
    next_id: AtomicU32,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the internal id for an external identity, creating a row with
    /// role `user` and zero balance on first sight.
    ///
    /// A display name supplied here fills the row's name if the row was
    /// previously created without one.
    pub fn resolve_or_create(&self, external_id: &ExternalId, name: Option<&str>) -> UserId {
        match self.index.entry(external_id.clone()) {
            Entry::Occupied(entry) => {
                let id = *entry.get();
                if let (Some(name), Some(user)) = (name, self.users.get(&id)) {
                    user.fill_name(name);
                }
                id
            }
            Entry::Vacant(entry) => {
                let id = UserId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                self.users.insert(
                    id,
                    User::new(id, external_id.clone(), name.unwrap_or(""), Role::User),
                );
                entry.insert(id);
                id
            }
        }
    }

    /// Provisions a row with an explicit role, promoting an existing row if
    /// the identity was already known.
    pub fn register(&self, external_id: &ExternalId, name: &str, role: Role) -> UserId {
        let id = self.resolve_or_create(external_id, Some(name));
        if let Some(user) = self.users.get(&id) {
            user.set_role(role);
        }
        id
    }

    pub fn get(&self, id: UserId) -> Option<Ref<'_, UserId, User>> {
        self.users.get(&id)
    }

    pub fn lookup(&self, external_id: &ExternalId) -> Option<UserId> {
        self.index.get(external_id).map(|id| *id)
    }

    pub fn is_admin(&self, external_id: &ExternalId) -> bool {
        self.lookup(external_id)
            .and_then(|id| self.users.get(&id))
            .map(|user| user.is_admin())
            .unwrap_or(false)
    }

    pub fn balance_of(&self, external_id: &ExternalId) -> Result<Decimal, MarketError> {
        let id = self.lookup(external_id).ok_or(MarketError::UserNotFound)?;
        let user = self.users.get(&id).ok_or(MarketError::UserNotFound)?;
        Ok(user.balance())
    }

    pub fn credit(&self, id: UserId, amount: Decimal) -> Result<Decimal, MarketError> {
        let user = self.users.get(&id).ok_or(MarketError::UserNotFound)?;
        user.credit(amount)
    }

    /// Iterates over all directory rows in unspecified order.
    pub fn users(&self) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, UserId, User>> {
        self.users.iter()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
