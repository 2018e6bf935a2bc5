//! Rollcall Demo
//!
//! Runs the attendance services end to end over the in-memory stores.
//!
//! This binary:
//! - Registers an organizer and a handful of attendees
//! - Creates an event with a cover image and a small capacity
//! - Watches the live roster while attendees race for the seats
//! - Prints the resolved attendee list, then deletes the event
//!
//! # Usage
//!
//! ```bash
//! ROLLCALL_LOG=info cargo run --bin rollcall-demo
//! ```

use chrono::Duration;
use rollcall_core::environment::Clock;
use rollcall_core::types::{Capacity, EventDetails, UserId, parse_local_schedule};
use rollcall_runtime::{CheckInOutcome, Rollcall, RollcallConfig};
use rollcall_testing::{InMemoryBlobStore, InMemoryDocumentStore, ManualClock, test_clock};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();
    let config = RollcallConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| "info,rollcall_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        retries = config.retry.max_retries,
        utc_offset_minutes = config.schedule_utc_offset_minutes,
        "Configuration loaded"
    );

    // The in-memory store treats this clock as server time.
    let clock = ManualClock::new(test_clock().now());
    let documents = InMemoryDocumentStore::with_clock(Arc::new(clock.clone()));
    let blobs = InMemoryBlobStore::new();
    let rollcall = Rollcall::new(
        Arc::new(documents.clone()),
        Arc::new(blobs.clone()),
        Arc::new(clock.clone()),
        &config,
    );

    let organizer = UserId::new("organizer");
    rollcall
        .profiles
        .register(&organizer, "Olga", "olga@example.com")
        .await?;
    let attendees: Vec<UserId> = ["ada", "brian", "chen", "dana"]
        .into_iter()
        .map(UserId::new)
        .collect();
    for user in &attendees {
        rollcall
            .profiles
            .register(user, &user.as_str().to_uppercase(), &format!("{user}@example.com"))
            .await?;
    }

    let scheduled_at = parse_local_schedule("2025-01-01T09:00:00", config.schedule_offset())?;
    let event = rollcall
        .catalog
        .create(
            EventDetails {
                title: "New Year Hack Night".to_string(),
                description: "Bring a laptop".to_string(),
                location: "Workshop B".to_string(),
                scheduled_at,
                capacity: Capacity::new(2),
            },
            vec![0xFF, 0xD8, 0xFF, 0xE0],
        )
        .await?;
    tracing::info!(event_id = %event.id, image = ?event.image_url, "Event published");

    let roster = rollcall
        .ledger
        .watch(&event.id, |snapshot| {
            tracing::info!(
                version = %snapshot.version,
                checked_in = snapshot.len(),
                "Roster update"
            );
        })
        .await?;

    // Too early first.
    clock.set(scheduled_at - Duration::minutes(10));
    let early = rollcall
        .gate
        .try_check_in(&event.id, &attendees[0], clock.now())
        .await?;
    report(&attendees[0], &early);

    // Doors open: everyone at once.
    clock.set(scheduled_at + Duration::seconds(5));
    let now = clock.now();
    let handles: Vec<_> = attendees
        .iter()
        .cloned()
        .map(|user| {
            let gate = rollcall.gate.clone();
            let event_id = event.id.clone();
            tokio::spawn(async move {
                let outcome = gate.try_check_in(&event_id, &user, now).await;
                (user, outcome)
            })
        })
        .collect();
    for handle in handles {
        let (user, outcome) = handle.await?;
        report(&user, &outcome?);
    }

    let again = rollcall.gate.try_check_in(&event.id, &attendees[0], now).await?;
    report(&attendees[0], &again);

    roster.unsubscribe().await;

    for attendee in rollcall.ledger.attendees(&event.id).await? {
        tracing::info!(
            user_id = %attendee.record.user_id,
            username = attendee.username.as_deref().unwrap_or("(unknown)"),
            checkin_time = %attendee.record.checkin_time,
            "Attendee"
        );
    }

    rollcall.catalog.delete(&event.id).await?;
    tracing::info!(blobs = blobs.len(), "Event deleted; demo finished");
    Ok(())
}

fn report(user: &UserId, outcome: &CheckInOutcome) {
    match outcome {
        CheckInOutcome::Accepted(record) => {
            tracing::info!(user_id = %user, at = %record.checkin_time, "Checked in");
        }
        CheckInOutcome::Rejected(reason) => {
            tracing::info!(user_id = %user, "{reason}");
        }
    }
}
