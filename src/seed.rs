use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use sqlx::SqlitePool;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::ids::{generator_for_node, IdScheme, SEEDER_NODE_ID};
use crate::repository::{NewUser, RepoError, UserRepository, MAX_BATCH_ROWS};

// ─── Name pools ──────────────────────────────────────────────────

static FIRST: &[&str] = &[
    "Emma", "Liam", "Olivia", "Noah", "Ava", "Ethan", "Sophia", "Mason", "Isabella", "William",
    "Mia", "James", "Charlotte", "Benjamin", "Amelia", "Lucas", "Harper", "Henry", "Evelyn",
    "Alexander", "Abigail", "Daniel", "Emily", "Michael", "Elizabeth", "Owen", "Sofia",
    "Sebastian", "Avery", "Jack",
];

static LAST: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin", "Lee", "Perez", "Thompson", "White", "Harris", "Sanchez",
    "Clark", "Ramirez", "Lewis", "Robinson",
];

static DEPARTMENTS: &[&str] = &[
    "Engineering",
    "Sales",
    "Marketing",
    "Finance",
    "Support",
    "Operations",
];

/// A plausible user; `n` keeps user names and emails distinct within a run.
pub fn random_user<R: Rng>(rng: &mut R, n: u64) -> NewUser {
    let first = FIRST[rng.gen_range(0..FIRST.len())];
    let last = LAST[rng.gen_range(0..LAST.len())];
    // one in five users has no department
    let department = rng
        .gen_bool(0.8)
        .then(|| DEPARTMENTS[rng.gen_range(0..DEPARTMENTS.len())].to_string());

    NewUser {
        user_name: format!("{}.{}{}", first.to_lowercase(), last.to_lowercase(), n),
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: format!("{}.{}{}@example.com", first.to_lowercase(), last.to_lowercase(), n),
        department,
    }
}

#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub id_type: IdScheme,
    pub table: &'static str,
    pub rows: u64,
    pub elapsed_ms: f64,
}

// ─── Public entry point ──────────────────────────────────────────

/// Fills every scheme table with `records` users, `batch` rows per
/// statement, all tables at once.
pub async fn generate(
    pool: &SqlitePool,
    records: u64,
    batch: u64,
) -> anyhow::Result<Vec<SeedSummary>> {
    let start = Instant::now();
    let batch = if batch > MAX_BATCH_ROWS as u64 {
        warn!(requested = batch, max = MAX_BATCH_ROWS, "batch too large for one statement, clamping");
        MAX_BATCH_ROWS as u64
    } else {
        batch.max(1)
    };
    info!(records, batch, "seeding users tables");

    let mut tasks = JoinSet::new();
    for (i, scheme) in IdScheme::ALL.into_iter().enumerate() {
        let Some(generator) = generator_for_node(scheme, SEEDER_NODE_ID) else {
            continue;
        };
        let repo = UserRepository::new(pool.clone(), generator)?;
        // Deterministic RNG per table so re-runs produce the same names.
        let rng = StdRng::seed_from_u64(42 + i as u64);
        tasks.spawn(seed_table(repo, rng, records, batch));
    }

    let mut summaries = Vec::with_capacity(IdScheme::ALL.len());
    while let Some(joined) = tasks.join_next().await {
        let summary = joined??;
        info!(
            table = summary.table,
            rows = summary.rows,
            elapsed_ms = summary.elapsed_ms,
            "table seeded"
        );
        summaries.push(summary);
    }
    summaries.sort_by_key(|s| s.id_type);

    info!(elapsed_s = start.elapsed().as_secs_f64(), "seed complete");
    Ok(summaries)
}

async fn seed_table(
    repo: UserRepository,
    mut rng: StdRng,
    records: u64,
    batch: u64,
) -> Result<SeedSummary, RepoError> {
    let start = Instant::now();
    let mut rows = 0;

    for batch_start in (0..records).step_by(batch as usize) {
        let batch_end = (batch_start + batch).min(records);
        let users = (batch_start..batch_end)
            .map(|n| random_user(&mut rng, n + 1))
            .collect();
        rows += repo.insert_batch(users).await?;
    }

    Ok(SeedSummary {
        id_type: repo.scheme(),
        table: repo.table(),
        rows,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}
