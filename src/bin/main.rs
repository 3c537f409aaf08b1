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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use photo_market_rs::{ExternalId, Market, MarketError, OfferPolicy, PhotoId, PhotoStatus, Role};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Photo Market - Replay marketplace event CSV files
///
/// Reads marketplace events from a CSV file and outputs user balances to
/// stdout. Supports listing, moderation, bidding, acceptance, payment, and
/// deletion events.
#[derive(Parser, Debug)]
#[command(name = "photo-market-rs")]
#[command(about = "A marketplace engine that replays event CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with events
    ///
    /// Expected format: event,photo,user,name,amount
    /// Example: cargo run -- events.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// How an incoming bid replaces a photo's cached best offer
    #[arg(long, value_enum, default_value_t = OfferPolicy::default())]
    policy: OfferPolicy,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photo_market_rs=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let market = match process_events(BufReader::new(file), args.policy) {
        Ok(market) => market,
        Err(e) => {
            eprintln!("Error processing events: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_balances(&market, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `event, photo, user, name, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    event: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    photo: Option<u32>,
    user: String,
    name: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
}

/// A marketplace event addressed by the submitter's photo label.
///
/// The `photo` column is a file-local label: `submit` binds it, later events
/// reference it. Labels are independent of the ids the catalog assigns.
#[derive(Debug)]
enum Event {
    Admin { user: ExternalId, name: String },
    Submit { label: u32, user: ExternalId, title: String },
    Approve { label: u32, user: ExternalId },
    Reject { label: u32, user: ExternalId },
    Bid { label: u32, user: ExternalId, name: String, amount: Decimal },
    Accept { label: u32, user: ExternalId },
    Pay { label: u32, user: ExternalId, amount: Decimal },
    Delete { label: u32, user: ExternalId },
}

impl CsvRecord {
    /// Converts a CSV record to a marketplace event.
    ///
    /// Returns `None` for unknown event names or missing required fields.
    /// The `name` column is the photo title for `submit` and the bidder's
    /// display name for `bid`.
    fn into_event(self) -> Option<Event> {
        if self.user.is_empty() {
            return None;
        }
        let user = ExternalId::from(self.user);

        match self.event.to_lowercase().as_str() {
            "admin" => Some(Event::Admin {
                user,
                name: self.name.unwrap_or_default(),
            }),
            "submit" => Some(Event::Submit {
                label: self.photo?,
                user,
                title: self.name?,
            }),
            "approve" => Some(Event::Approve {
                label: self.photo?,
                user,
            }),
            "reject" => Some(Event::Reject {
                label: self.photo?,
                user,
            }),
            "bid" => Some(Event::Bid {
                label: self.photo?,
                user,
                name: self.name?,
                amount: self.amount?,
            }),
            "accept" => Some(Event::Accept {
                label: self.photo?,
                user,
            }),
            "pay" => Some(Event::Pay {
                label: self.photo?,
                user,
                amount: self.amount?,
            }),
            "delete" => Some(Event::Delete {
                label: self.photo?,
                user,
            }),
            _ => None,
        }
    }
}

/// Process marketplace events from a CSV reader.
///
/// This function uses streaming parsing to handle arbitrarily large CSV files
/// without loading the entire file into memory. Malformed rows and rejected
/// events are silently skipped.
///
/// # CSV Format
///
/// Expected columns: `event, photo, user, name, amount`
/// - `event`: Event name (admin, submit, approve, reject, bid, accept, pay, delete)
/// - `photo`: Photo label (u32, bound by `submit`; empty for `admin`)
/// - `user`: External identity of the acting user
/// - `name`: Photo title for `submit`, bidder display name for `bid`
/// - `amount`: Decimal amount (required for bid and pay)
///
/// # Example
///
/// ```csv
/// event,photo,user,name,amount
/// admin,,m1,Mia,
/// submit,1,u1,Sunset,
/// approve,1,m1,,
/// bid,1,u2,Bob,25.00
/// accept,1,u1,,
/// pay,1,u2,,25.00
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
/// Individual event rejections are logged in debug mode but don't stop
/// processing.
pub fn process_events<R: Read>(reader: R, policy: OfferPolicy) -> Result<Market, csv::Error> {
    let market = Market::with_policy(policy);
    let mut labels: HashMap<u32, PhotoId> = HashMap::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " bid "
        .flexible(true) // Allow missing trailing fields
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(event) = record.into_event() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid event record");
                    continue;
                };

                // Apply the event, ignoring rejections (silent failure)
                if let Err(e) = apply(&market, &mut labels, event) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping event: {}", e);
                }
            }
            Err(e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(market)
}

/// Applies one event to the market, resolving its photo label first.
fn apply(
    market: &Market,
    labels: &mut HashMap<u32, PhotoId>,
    event: Event,
) -> Result<(), MarketError> {
    match event {
        Event::Admin { user, name } => {
            market.register(&user, &name, Role::Admin);
        }
        Event::Submit { label, user, title } => {
            let id = market.submit_photo(&user, &title);
            labels.insert(label, id);
        }
        Event::Approve { label, user } => {
            market.set_status(resolve(labels, label)?, &user, PhotoStatus::Approved)?;
        }
        Event::Reject { label, user } => {
            market.set_status(resolve(labels, label)?, &user, PhotoStatus::Rejected)?;
        }
        Event::Bid {
            label,
            user,
            name,
            amount,
        } => {
            market.place_bid(resolve(labels, label)?, &user, &name, amount)?;
        }
        Event::Accept { label, user } => {
            market.accept_offer(resolve(labels, label)?, &user)?;
        }
        Event::Pay {
            label,
            user,
            amount,
        } => {
            market.record_payment(resolve(labels, label)?, &user, amount, None, None)?;
        }
        Event::Delete { label, user } => {
            market.delete_photo(resolve(labels, label)?, &user)?;
        }
    }
    Ok(())
}

fn resolve(labels: &HashMap<u32, PhotoId>, label: u32) -> Result<PhotoId, MarketError> {
    labels
        .get(&label)
        .copied()
        .ok_or(MarketError::PhotoNotFound)
}

/// One output row of the balance report.
#[derive(Debug, Serialize)]
struct BalanceRow {
    user: String,
    role: Role,
    balance: Decimal,
}

/// Write user balances to a CSV writer.
///
/// Outputs all directory rows with 2 decimal precision, ordered by the id
/// they were created under.
///
/// # CSV Format
///
/// Columns: `user, role, balance`
///
/// # Example
///
/// ```csv
/// user,role,balance
/// u1,user,30.00
/// m1,admin,0.00
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_balances<W: Write>(market: &Market, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut rows: Vec<_> = market
        .users()
        .map(|user| {
            // Rescale so whole numbers still print as e.g. 0.00.
            let mut balance = user.balance();
            balance.rescale(2);
            (
                user.id(),
                BalanceRow {
                    user: user.external_id().to_string(),
                    role: user.role(),
                    balance,
                },
            )
        })
        .collect();
    rows.sort_by_key(|(id, _)| *id);

    for (_, row) in rows {
        wtr.serialize(&row)?;
    }

    wtr.flush()?;
    Ok(())
}
