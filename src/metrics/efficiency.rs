use std::sync::Arc;

use super::store::{StoreError, TableIntrospector};
use super::views::{round2, IdColumnStats, IdEfficiency, TableSize};

/// Information-theoretic lower bound on the id width for `row_count` distinct
/// rows: `log2(n) / 8` bytes. Zero for fewer than two rows.
pub fn theoretical_min_bytes(row_count: i64) -> f64 {
    if row_count <= 1 {
        return 0.0;
    }
    (row_count as f64).log2() / 8.0
}

/// Scores one table's ids against the lower bound.
///
/// With fewer than two rows (or an empty id column) no meaningful ratio
/// exists: efficiency is reported as 0 and the waste factor is absent.
pub fn score(stats: &IdColumnStats) -> IdEfficiency {
    let min = theoretical_min_bytes(stats.row_count);

    let (efficiency_percent, waste_factor) = if min > 0.0 && stats.avg_id_bytes > 0.0 {
        (
            round2(min / stats.avg_id_bytes * 100.0),
            Some(round2(stats.avg_id_bytes / min)),
        )
    } else {
        (0.0, None)
    };

    IdEfficiency {
        table_name: stats.table_name.clone(),
        row_count: stats.row_count,
        avg_id_bytes: round2(stats.avg_id_bytes),
        theoretical_min_bytes: round2(min),
        efficiency_percent,
        waste_factor,
    }
}

/// Human-readable byte count in the style of `pg_size_pretty`: plain bytes
/// below 10 kB, then the largest unit that keeps the number under 10240.
pub fn pretty_size(bytes: i64) -> String {
    const LIMIT: i64 = 10 * 1024;
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];

    if bytes.abs() < LIMIT {
        return format!("{bytes} bytes");
    }

    let mut value = bytes;
    for (i, unit) in UNITS.iter().enumerate() {
        // half-up on the division
        value = (value + value.signum() * 512) / 1024;
        if value.abs() < LIMIT || i == UNITS.len() - 1 {
            return format!("{value} {unit}");
        }
    }
    unreachable!("loop returns on the last unit")
}

/// Storage-efficiency reports over the per-scheme users tables.
#[derive(Clone)]
pub struct EfficiencyScorer {
    tables: Arc<dyn TableIntrospector>,
}

impl EfficiencyScorer {
    pub fn new(tables: Arc<dyn TableIntrospector>) -> Self {
        Self { tables }
    }

    /// One entry per scheme table, most efficient first.
    pub async fn efficiency_report(&self) -> Result<Vec<IdEfficiency>, StoreError> {
        let stats = self.tables.id_column_stats().await?;
        let mut report: Vec<IdEfficiency> = stats.iter().map(score).collect();
        report.sort_by(|a, b| b.efficiency_percent.total_cmp(&a.efficiency_percent));
        Ok(report)
    }

    /// Row count and payload size per scheme table, largest first.
    pub async fn table_report(&self) -> Result<Vec<TableSize>, StoreError> {
        let mut sizes = self.tables.table_sizes().await?;
        sizes.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
        Ok(sizes
            .into_iter()
            .map(|t| TableSize {
                size_pretty: pretty_size(t.size_bytes),
                table_name: t.table_name,
                row_count: t.row_count,
                size_bytes: t.size_bytes,
            })
            .collect())
    }
}
