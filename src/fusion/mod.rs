//! Data fusion: deduplicate and merge match records across sources.
//!
//! Records are grouped by `MatchKey` (date, league, home, away). Within a
//! group every field is merged independently: the non-null value with the
//! newest provenance wins, and equal timestamps fall back to source
//! priority (live fixtures > live odds > historical). Values with identical
//! provenance, such as duplicate rows from one file, fall back to the larger
//! value, so input order never changes the result. The winning field's
//! provenance is kept on the merged record, which makes merging an already
//! merged set a no-op.
//!
//! Output is ordered by date ascending (then league and teams) so that
//! downstream trailing windows are reproducible.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::types::{MatchKey, MatchRecord, MatchStatus, Provenance};

/// Fused records plus counters for logging.
#[derive(Debug, Clone, Default)]
pub struct FusionResult {
    pub records: Vec<MatchRecord>,
    pub input_records: usize,
    pub duplicates_merged: usize,
}

/// Merge several adapter outputs into one deduplicated, date-ordered list.
pub fn merge(batches: &[Vec<MatchRecord>]) -> Vec<MatchRecord> {
    fuse(batches).records
}

/// Like [`merge`], but also reports how many records were folded together.
pub fn fuse(batches: &[Vec<MatchRecord>]) -> FusionResult {
    let mut groups: BTreeMap<MatchKey, Vec<&MatchRecord>> = BTreeMap::new();
    let mut input_records = 0;
    for record in batches.iter().flatten() {
        input_records += 1;
        groups.entry(record.key()).or_default().push(record);
    }

    let records: Vec<MatchRecord> = groups
        .into_iter()
        .map(|(key, group)| {
            if group.len() > 1 {
                debug!(key = %key, count = group.len(), "Merging duplicate records");
            }
            merge_group(&group)
        })
        .collect();

    let duplicates_merged = input_records - records.len();
    info!(
        input = input_records,
        output = records.len(),
        merged = duplicates_merged,
        "Fusion complete"
    );

    FusionResult { records, input_records, duplicates_merged }
}

// ---------------------------------------------------------------------------
// Precedence
// ---------------------------------------------------------------------------

fn compare_provenance(a: &Provenance, b: &Provenance) -> Ordering {
    a.fetched_at
        .cmp(&b.fetched_at)
        .then_with(|| a.source.priority().cmp(&b.source.priority()))
}

/// Provenance of one field: recorded by an earlier merge, or the record's own.
fn field_provenance(record: &MatchRecord, field: &str) -> Provenance {
    record.provenance.get(field).copied().unwrap_or(Provenance {
        source: record.source,
        fetched_at: record.fetched_at,
    })
}

/// Order between two values whose provenance is identical. The larger wins.
trait TieBreak {
    fn tie_cmp(&self, other: &Self) -> Ordering;
}

macro_rules! tie_break_by_ord {
    ($($t:ty),*) => {
        $(impl TieBreak for $t {
            fn tie_cmp(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        })*
    };
}

tie_break_by_ord!(u32, u64, String);

impl TieBreak for f64 {
    fn tie_cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

/// The further-along status wins.
impl TieBreak for MatchStatus {
    fn tie_cmp(&self, other: &Self) -> Ordering {
        let stage = |s: &MatchStatus| match s {
            MatchStatus::Scheduled => 0,
            MatchStatus::Live => 1,
            MatchStatus::Finished => 2,
        };
        stage(self).cmp(&stage(other))
    }
}

fn merge_field<T: Clone + TieBreak>(
    slot: &mut Option<T>,
    provenance: &mut BTreeMap<String, Provenance>,
    group: &[&MatchRecord],
    field: &'static str,
    get: impl Fn(&MatchRecord) -> &Option<T>,
) {
    let winner = group
        .iter()
        .filter(|r| get(r).is_some())
        .max_by(|a, b| {
            compare_provenance(&field_provenance(a, field), &field_provenance(b, field)).then_with(|| {
                match (get(a), get(b)) {
                    (Some(x), Some(y)) => x.tie_cmp(y),
                    _ => Ordering::Equal,
                }
            })
        });

    match winner {
        Some(record) => {
            *slot = get(record).clone();
            provenance.insert(field.to_string(), field_provenance(record, field));
        }
        None => *slot = None,
    }
}

fn merge_group(group: &[&MatchRecord]) -> MatchRecord {
    let record_precedence = |a: &&&MatchRecord, b: &&&MatchRecord| {
        a.fetched_at
            .cmp(&b.fetched_at)
            .then_with(|| a.source.priority().cmp(&b.source.priority()))
            .then_with(|| a.league.cmp(&b.league))
    };
    // Groups are never empty: they are built from at least one record.
    let base = group.iter().max_by(record_precedence).copied().unwrap_or(group[0]);

    let mut merged = base.clone();
    merged.provenance = BTreeMap::new();
    let p = &mut merged.provenance;

    merge_field(&mut merged.status, p, group, "status", |r| &r.status);
    merge_field(&mut merged.fixture_id, p, group, "fixture_id", |r| &r.fixture_id);
    merge_field(&mut merged.odds_event_id, p, group, "odds_event_id", |r| &r.odds_event_id);
    merge_field(&mut merged.home_goals, p, group, "home_goals", |r| &r.home_goals);
    merge_field(&mut merged.away_goals, p, group, "away_goals", |r| &r.away_goals);
    merge_field(&mut merged.home_shots, p, group, "home_shots", |r| &r.home_shots);
    merge_field(&mut merged.away_shots, p, group, "away_shots", |r| &r.away_shots);
    merge_field(&mut merged.home_shots_on_target, p, group, "home_shots_on_target", |r| &r.home_shots_on_target);
    merge_field(&mut merged.away_shots_on_target, p, group, "away_shots_on_target", |r| &r.away_shots_on_target);
    merge_field(&mut merged.home_possession, p, group, "home_possession", |r| &r.home_possession);
    merge_field(&mut merged.away_possession, p, group, "away_possession", |r| &r.away_possession);
    merge_field(&mut merged.home_form, p, group, "home_form", |r| &r.home_form);
    merge_field(&mut merged.away_form, p, group, "away_form", |r| &r.away_form);

    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
