//! Enrollment simulation binary
//!
//! Registers one event, lets a pool of workers fire random transitions at it
//! concurrently and prints the final state as JSON.

use enrollment::{
    Capacity, Category, EnrollmentService, Event, ServiceError, SimulationConfig, User, UserId,
    metrics::register_enrollment_metrics,
};
use enrollment_core::environment::SystemClock;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Outcome counts of one worker
#[derive(Debug, Default)]
struct Tally {
    accepted: usize,
    rejected: usize,
    promotions: usize,
}

impl Tally {
    fn merge(&mut self, other: &Self) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.promotions += other.promotions;
    }
}

fn run_worker(service: &EnrollmentService, event: enrollment::EventId, users: &[UserId], rounds: usize) -> Tally {
    let mut rng = StdRng::from_entropy();
    let mut tally = Tally::default();

    for _ in 0..rounds {
        let user = users[rng.gen_range(0..users.len())];
        let result = match rng.gen_range(0..4) {
            0 => service.enroll(user, event),
            1 => service.cancel_enrollment(user, event),
            2 => service.join_wait(user, event),
            _ => service.cancel_wait(user, event),
        };

        match result {
            Ok(transition) => {
                tally.accepted += 1;
                tally.promotions += transition
                    .iter()
                    .filter(|event| matches!(event, enrollment::EnrollmentEvent::Promoted { .. }))
                    .count();
            },
            Err(ServiceError::Enrollment(_)) => tally.rejected += 1,
            Err(error) => tracing::warn!(%error, "Unexpected service error"),
        }
    }

    tally
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SimulationConfig::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;
    register_enrollment_metrics();
    info!(
        capacity = config.capacity,
        users = config.users,
        workers = config.workers,
        rounds = config.rounds,
        "Configuration loaded"
    );

    let service = Arc::new(EnrollmentService::new(Arc::new(SystemClock)));

    let organizer = User::new("organizer");
    service.register_user(&organizer);
    let users: Arc<Vec<UserId>> = Arc::new(
        (0..config.users)
            .map(|i| {
                let user = User::new(format!("user-{i}"));
                service.register_user(&user);
                user.id
            })
            .collect(),
    );

    let event = Event::builder(
        organizer.id,
        "Simulated Concert",
        chrono::Utc::now().date_naive(),
        Capacity::new(config.capacity),
    )
    .category(Category::Concert)
    .build();
    let event_id = event.id;
    service.register_event(event)?;

    let handles: Vec<_> = (0..config.workers)
        .map(|_| {
            let service = Arc::clone(&service);
            let users = Arc::clone(&users);
            let rounds = config.rounds;
            tokio::task::spawn_blocking(move || run_worker(&service, event_id, &users, rounds))
        })
        .collect();

    let mut total = Tally::default();
    for handle in handles {
        total.merge(&handle.await?);
    }

    let snapshot = service.snapshot(&event_id)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    let rate = |rate: Option<f64>| rate.map_or_else(|| "no data".to_string(), |r| format!("{r:.1}%"));
    println!(
        "accepted: {}, rejected: {}, promotions: {}",
        total.accepted, total.rejected, total.promotions
    );
    println!(
        "success rate: {}, cancel rate: {}",
        rate(snapshot.stats.success_rate()),
        rate(snapshot.stats.cancel_rate())
    );

    Ok(())
}
