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

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! These tests verify that the locking patterns used in the market engine
//! (dashmap shard locks plus the per-row parking_lot mutexes) do not lead
//! to deadlocks under various concurrent access scenarios.
//!
//! Every operation on [`Market`] takes `&self`, so the tests drive the real
//! engine directly from plain threads; the detector thread watches for
//! cycles in the parking_lot lock graph while they run.

use parking_lot::deadlock;
use photo_market_rs::{ExternalId, IdempotencyKey, Market, MarketError, PhotoId, PhotoStatus, Role};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

// === Helper Functions ===

const MODERATOR: &str = "moderator";

fn seeded_market() -> Arc<Market> {
    let market = Market::new();
    market.register(&ExternalId::from(MODERATOR), "Mo", Role::Admin);
    Arc::new(market)
}

/// Submits and approves a listing for `owner`.
fn approved_photo(market: &Market, owner: &str, title: &str) -> PhotoId {
    let id = market.submit_photo(&ExternalId::from(owner), title);
    market
        .set_status(id, &ExternalId::from(MODERATOR), PhotoStatus::Approved)
        .expect("moderation should succeed");
    id
}

// === Tests ===

/// Test high contention on a single photo with many threads.
#[test]
fn no_deadlock_high_contention_single_photo() {
    let detector = start_deadlock_detector();
    let market = seeded_market();
    let photo_id = approved_photo(&market, "seller", "Contested");

    const NUM_THREADS: usize = 50;
    const OPS_PER_THREAD: usize = 100;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let market = market.clone();

        let handle = thread::spawn(move || {
            let bidder = ExternalId::from(format!("bidder{thread_id}"));
            for i in 0..OPS_PER_THREAD {
                if i % 3 == 0 {
                    market
                        .place_bid(photo_id, &bidder, "Bidder", dec!(10.00))
                        .expect("bid should succeed");
                } else if i % 3 == 1 {
                    let _ = market.photo(photo_id);
                } else {
                    // Read operations
                    let _ = market.bids_for_photo(photo_id);
                    let _ = market.balance_of(&bidder);
                }
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Every third op per thread was a bid; all of them must be in the ledger.
    let expected_bids = NUM_THREADS * OPS_PER_THREAD.div_ceil(3);
    assert_eq!(market.bids_for_photo(photo_id).len(), expected_bids);
    assert!(market.photo(photo_id).unwrap().best_offer.is_some());
    println!(
        "High contention test passed: {} threads x {} ops",
        NUM_THREADS, OPS_PER_THREAD
    );
}

/// Test operations spread across multiple photos.
#[test]
fn no_deadlock_cross_photo_operations() {
    let detector = start_deadlock_detector();
    let market = seeded_market();

    const NUM_THREADS: usize = 20;
    const NUM_PHOTOS: usize = 10;
    const OPS_PER_THREAD: usize = 50;

    let photo_ids: Vec<PhotoId> = (0..NUM_PHOTOS)
        .map(|i| approved_photo(&market, &format!("seller{i}"), "Listing"))
        .collect();
    let photo_ids = Arc::new(photo_ids);

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let market = market.clone();
        let photo_ids = photo_ids.clone();

        let handle = thread::spawn(move || {
            let bidder = ExternalId::from(format!("bidder{thread_id}"));
            for i in 0..OPS_PER_THREAD {
                // Each thread cycles through photos
                let photo_id = photo_ids[(thread_id + i) % NUM_PHOTOS];
                market
                    .place_bid(photo_id, &bidder, "Bidder", dec!(5.00))
                    .expect("bid should succeed");

                // Also read from a different photo
                let other = photo_ids[(thread_id + i + 1) % NUM_PHOTOS];
                let _ = market.photo(other);
                let _ = market.payments_for_photo(other);
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    println!(
        "Cross-photo test passed: {} photos, {} threads",
        NUM_PHOTOS, NUM_THREADS
    );
}

/// Test the accept-then-pay lifecycle under contention.
#[test]
fn no_deadlock_sale_lifecycle() {
    let detector = start_deadlock_detector();
    let market = seeded_market();

    const NUM_SALES: usize = 20;

    // One approved listing per seller, each carrying one bid.
    let photo_ids: Vec<PhotoId> = (0..NUM_SALES)
        .map(|i| {
            let id = approved_photo(&market, &format!("seller{i}"), "For sale");
            market
                .place_bid(
                    id,
                    &ExternalId::from(format!("buyer{i}")),
                    "Buyer",
                    dec!(40.00),
                )
                .expect("bid should succeed");
            id
        })
        .collect();

    let mut handles = Vec::with_capacity(NUM_SALES);

    for (i, photo_id) in photo_ids.iter().copied().enumerate() {
        let market = market.clone();

        let handle = thread::spawn(move || {
            let seller = ExternalId::from(format!("seller{i}"));
            let buyer = ExternalId::from(format!("buyer{i}"));

            market
                .accept_offer(photo_id, &seller)
                .expect("acceptance should succeed");

            // Small delay to simulate the buyer reacting
            thread::sleep(Duration::from_micros(100));

            if i % 2 == 0 {
                // Pay twice with the same key; the retry must replay.
                let key = IdempotencyKey::from(format!("sale{i}"));
                let first = market
                    .record_payment(
                        photo_id,
                        &buyer,
                        dec!(40.00),
                        Some("card"),
                        Some(key.clone()),
                    )
                    .expect("payment should succeed");
                let second = market
                    .record_payment(photo_id, &buyer, dec!(40.00), Some("card"), Some(key))
                    .expect("replay should succeed");
                assert_eq!(first.payment_id, second.payment_id);
            } else {
                market
                    .record_payment(photo_id, &buyer, dec!(40.00), Some("card"), None)
                    .expect("payment should succeed");
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Every sale settled exactly once.
    for (i, photo_id) in photo_ids.iter().copied().enumerate() {
        assert_eq!(market.photo(photo_id).unwrap().status, PhotoStatus::Sold);
        assert_eq!(
            market.balance_of(&ExternalId::from(format!("seller{i}"))),
            dec!(40.00)
        );
    }

    println!("Sale lifecycle test passed: {} sales", NUM_SALES);
}

/// Test iterating directory and catalog while mutating.
#[test]
fn no_deadlock_iteration_during_mutation() {
    let detector = start_deadlock_detector();
    let market = seeded_market();
    let running = Arc::new(AtomicBool::new(true));

    let mut handles = Vec::new();

    // Writer threads submit new listings
    for writer_id in 0..5 {
        let market = market.clone();
        let running = running.clone();

        let handle = thread::spawn(move || {
            let owner = ExternalId::from(format!("writer{writer_id}"));
            let mut count = 0;
            while running.load(Ordering::SeqCst) && count < 100 {
                market.submit_photo(&owner, "Burst");
                count += 1;
                thread::yield_now();
            }
        });

        handles.push(handle);
    }

    // Reader threads iterate every row
    for _ in 0..5 {
        let market = market.clone();
        let running = running.clone();

        let handle = thread::spawn(move || {
            let mut iterations = 0;
            while running.load(Ordering::SeqCst) && iterations < 50 {
                let mut total = Decimal::ZERO;
                for user in market.users() {
                    total += user.balance();
                }
                let _ = market.photos().len();
                iterations += 1;
                let _ = total; // Use the value
                thread::yield_now();
            }
        });

        handles.push(handle);
    }

    // Let them run for a bit
    thread::sleep(Duration::from_millis(500));
    running.store(false, Ordering::SeqCst);

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    println!(
        "Iteration during mutation test passed: {} listings created",
        market.photos().len()
    );
}

/// Test mixed operations with many threads.
#[test]
fn no_deadlock_mixed_operations() {
    let detector = start_deadlock_detector();
    let market = seeded_market();

    const NUM_THREADS: usize = 100;
    const OPS_PER_THREAD: usize = 50;
    const NUM_PHOTOS: usize = 20;

    let photo_ids: Vec<PhotoId> = (0..NUM_PHOTOS)
        .map(|i| approved_photo(&market, &format!("seller{i}"), "Listing"))
        .collect();
    let photo_ids = Arc::new(photo_ids);

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let market = market.clone();
        let photo_ids = photo_ids.clone();

        let handle = thread::spawn(move || {
            let caller = ExternalId::from(format!("caller{thread_id}"));
            for i in 0..OPS_PER_THREAD {
                let photo_id = photo_ids[(thread_id + i) % NUM_PHOTOS];

                match i % 5 {
                    0 => {
                        market
                            .place_bid(photo_id, &caller, "Caller", dec!(1.00))
                            .expect("bid should succeed");
                    }
                    1 => {
                        let _ = market.photo(photo_id);
                    }
                    2 => {
                        let _ = market.payments_for_photo(photo_id);
                    }
                    3 => {
                        let _ = market.notifications_for(&caller);
                    }
                    _ => {
                        let _ = market.balance_of(&caller);
                    }
                }
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Every listing is still readable and still approved.
    for photo_id in photo_ids.iter().copied() {
        assert_eq!(
            market.photo(photo_id).unwrap().status,
            PhotoStatus::Approved
        );
    }

    println!(
        "Mixed operations test passed: {} threads x {} ops on {} photos",
        NUM_THREADS, OPS_PER_THREAD, NUM_PHOTOS
    );
}

/// Test concurrent payments racing for the same accepted photo.
#[test]
fn no_deadlock_concurrent_payment_same_photo() {
    let detector = start_deadlock_detector();
    let market = seeded_market();

    let photo_id = approved_photo(&market, "seller", "One of a kind");
    market
        .place_bid(photo_id, &ExternalId::from("buyer0"), "Buyer", dec!(25.00))
        .expect("bid should succeed");
    market
        .accept_offer(photo_id, &ExternalId::from("seller"))
        .expect("acceptance should succeed");

    const NUM_THREADS: usize = 20;
    let mut handles = Vec::with_capacity(NUM_THREADS);

    // All threads try to pay for the same photo
    for thread_id in 0..NUM_THREADS {
        let market = market.clone();

        let handle = thread::spawn(move || {
            let buyer = ExternalId::from(format!("buyer{thread_id}"));
            market
                .record_payment(photo_id, &buyer, dec!(25.00), Some("card"), None)
                .is_ok()
        });

        handles.push(handle);
    }

    let results: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();

    stop_deadlock_detector(detector);

    let successful = results.iter().filter(|&&r| r).count();
    assert_eq!(
        successful, 1,
        "Expected exactly 1 successful payment, got {}",
        successful
    );
    assert_eq!(
        market.balance_of(&ExternalId::from("seller")),
        dec!(25.00),
        "Seller must be credited exactly once"
    );
    println!(
        "Concurrent payment test passed: 1/{} payments succeeded",
        NUM_THREADS
    );
}

/// Test deleting a listing while bidders hammer it.
#[test]
fn no_deadlock_delete_during_bidding() {
    let detector = start_deadlock_detector();
    let market = seeded_market();
    let photo_id = approved_photo(&market, "seller", "Short lived");

    const NUM_BIDDERS: usize = 10;
    let mut handles = Vec::with_capacity(NUM_BIDDERS + 1);

    for thread_id in 0..NUM_BIDDERS {
        let market = market.clone();

        let handle = thread::spawn(move || {
            let bidder = ExternalId::from(format!("bidder{thread_id}"));
            for _ in 0..100 {
                // Fails with PhotoNotFound once the listing is gone.
                let _ = market.place_bid(photo_id, &bidder, "Bidder", dec!(2.00));
            }
        });

        handles.push(handle);
    }

    {
        let market = market.clone();
        handles.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            market
                .delete_photo(photo_id, &ExternalId::from("seller"))
                .expect("delete should succeed");
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert!(market.photo(photo_id).is_none());
    // The cascade fences the row before sweeping, so no racing bidder can
    // slip an orphan in behind it.
    assert!(
        market.bids_for_photo(photo_id).is_empty(),
        "cascade left orphan bids behind"
    );
    assert_eq!(
        market.place_bid(photo_id, &ExternalId::from("late"), "Late", dec!(2.00)),
        Err(MarketError::PhotoNotFound)
    );
    println!("Delete during bidding test passed");
}

/// Test deleting an accepted sale while buyers race to pay for it.
#[test]
fn no_deadlock_delete_during_payment() {
    let detector = start_deadlock_detector();
    let market = seeded_market();

    let photo_id = approved_photo(&market, "seller", "Going going gone");
    market
        .place_bid(photo_id, &ExternalId::from("buyer0"), "Buyer", dec!(25.00))
        .expect("bid should succeed");
    market
        .accept_offer(photo_id, &ExternalId::from("seller"))
        .expect("acceptance should succeed");

    const NUM_BUYERS: usize = 10;
    let mut handles = Vec::with_capacity(NUM_BUYERS + 1);

    for thread_id in 0..NUM_BUYERS {
        let market = market.clone();

        handles.push(thread::spawn(move || {
            let buyer = ExternalId::from(format!("buyer{thread_id}"));
            // Loses either to the one-payment gate or to the delete.
            let _ = market.record_payment(photo_id, &buyer, dec!(25.00), Some("card"), None);
        }));
    }

    {
        let market = market.clone();
        handles.push(thread::spawn(move || {
            market
                .delete_photo(photo_id, &ExternalId::from("seller"))
                .expect("delete should succeed");
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Whatever the interleaving, the cascade leaves no payment referencing
    // the deleted listing.
    assert!(market.photo(photo_id).is_none());
    assert!(
        market.payments_for_photo(photo_id).is_empty(),
        "cascade left orphan payments behind"
    );

    // A payment that won the gate before the delete still credited the
    // seller; reconciliation settles the balance back to the ledger.
    market
        .recompute_balances(&ExternalId::from(MODERATOR))
        .expect("recompute should succeed");
    assert_eq!(market.balance_of(&ExternalId::from("seller")), Decimal::ZERO);
    println!("Delete during payment test passed");
}

/// Stress test with rapid lock acquire/release cycles.
#[test]
fn no_deadlock_rapid_lock_cycling() {
    let detector = start_deadlock_detector();
    let market = seeded_market();

    const NUM_THREADS: usize = 20;
    const CYCLES_PER_THREAD: usize = 1000;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let market = market.clone();

        let handle = thread::spawn(move || {
            let owner = ExternalId::from(format!("owner{}", thread_id % 5));

            for _ in 0..CYCLES_PER_THREAD {
                // Rapid submit
                let id = market.submit_photo(&owner, "Cycle");

                // Immediate read
                let _ = market.photo(id);
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    println!(
        "Rapid lock cycling test passed: {} threads x {} cycles",
        NUM_THREADS, CYCLES_PER_THREAD
    );
}
