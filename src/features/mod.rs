//! Feature extraction from fused match records.
//!
//! For a target fixture, builds trailing-window `TeamStatistics` for both
//! sides and flattens them into a fixed-order `FeatureVector`. Only
//! completed matches dated strictly before the target count; the target's
//! own result is never read.
//!
//! Feature order (version `v1`, 14 values):
//!
//! | idx | name                  |
//! |-----|-----------------------|
//! | 0   | home_form             |
//! | 1   | home_goals_for        |
//! | 2   | home_goals_against    |
//! | 3   | home_win_streak       |
//! | 4   | home_conversion       |
//! | 5   | home_possession       |
//! | 6   | away_form             |
//! | 7   | away_goals_for        |
//! | 8   | away_goals_against    |
//! | 9   | away_win_streak       |
//! | 10  | away_conversion       |
//! | 11  | away_possession       |
//! | 12  | strength_diff         |
//! | 13  | h2h_balance           |

use tracing::debug;

use crate::types::{EngineError, FeatureVector, HeadToHead, MatchKey, MatchRecord, Outcome, TeamStatistics};

pub const FEATURE_VERSION: &str = "v1";

pub const FEATURE_NAMES: [&str; 14] = [
    "home_form",
    "home_goals_for",
    "home_goals_against",
    "home_win_streak",
    "home_conversion",
    "home_possession",
    "away_form",
    "away_goals_for",
    "away_goals_against",
    "away_win_streak",
    "away_conversion",
    "away_possession",
    "strength_diff",
    "h2h_balance",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Possession assumed when no match in the window reported it.
const NEUTRAL_POSSESSION: f64 = 50.0;

/// Features plus the statistics they came from.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub vector: FeatureVector,
    pub home: TeamStatistics,
    pub away: TeamStatistics,
    /// At least one side had fewer prior matches than the window.
    pub reduced_history: bool,
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    window: usize,
}

impl FeatureExtractor {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1) }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn extract(&self, records: &[MatchRecord], target: &MatchKey) -> Result<Extraction, EngineError> {
        let prior: Vec<&MatchRecord> = records
            .iter()
            .filter(|r| r.date < target.date && r.is_completed())
            .collect();
        let target_record = records.iter().find(|r| &r.key() == target);

        let mut home = self.team_statistics(&prior, &target.home, &target.away);
        let mut away = self.team_statistics(&prior, &target.away, &target.home);

        if let Some(tr) = target_record {
            if home.matches_played == 0 {
                if let Some(form) = tr.home_form.as_deref() {
                    apply_form_string(&mut home, form, self.window);
                }
            }
            if away.matches_played == 0 {
                if let Some(form) = tr.away_form.as_deref() {
                    apply_form_string(&mut away, form, self.window);
                }
            }
        }

        let reduced_history = home.matches_played < self.window || away.matches_played < self.window;
        if reduced_history {
            debug!(
                target = %target,
                home_matches = home.matches_played,
                away_matches = away.matches_played,
                window = self.window,
                "Reduced history for feature window"
            );
        }

        let vector = FeatureVector::new(build_values(&home, &away), FEATURE_COUNT)?;
        Ok(Extraction { vector, home, away, reduced_history })
    }

    /// Trailing-window statistics for `team`, plus its head-to-head record
    /// against `opponent`. `prior` must already exclude the target match.
    pub fn team_statistics(&self, prior: &[&MatchRecord], team: &str, opponent: &str) -> TeamStatistics {
        let mut played: Vec<&MatchRecord> = prior.iter().copied().filter(|r| r.involves(team)).collect();
        played.sort_by_key(|r| r.date);
        let start = played.len().saturating_sub(self.window);
        let window = &played[start..];

        let mut stats = TeamStatistics {
            team: team.to_string(),
            matches_played: window.len(),
            ..Default::default()
        };

        let mut possession_sum = 0.0;
        let mut possession_n = 0u32;
        for r in window {
            let side = TeamSide::of(r, team);
            let (gf, ga) = side.goals(r);
            stats.goals_for += gf;
            stats.goals_against += ga;
            stats.shots_on_target += side.shots_on_target(r).unwrap_or(0);
            if let Some(p) = side.possession(r) {
                possession_sum += p;
                possession_n += 1;
            }
            match side.result(r) {
                Some(TeamResult::Win) => stats.wins += 1,
                Some(TeamResult::Draw) => stats.draws += 1,
                Some(TeamResult::Loss) => stats.losses += 1,
                None => {}
            }
        }
        if possession_n > 0 {
            stats.avg_possession = Some(possession_sum / f64::from(possession_n));
        }

        stats.win_streak = window
            .iter()
            .rev()
            .take_while(|r| TeamSide::of(r, team).result(r) == Some(TeamResult::Win))
            .count() as u32;

        let meetings: Vec<&&MatchRecord> = played.iter().filter(|r| r.involves(opponent)).collect();
        let start = meetings.len().saturating_sub(self.window);
        let mut h2h = HeadToHead::default();
        for r in &meetings[start..] {
            match TeamSide::of(r, team).result(r) {
                Some(TeamResult::Win) => h2h.wins += 1,
                Some(TeamResult::Draw) => h2h.draws += 1,
                Some(TeamResult::Loss) => h2h.losses += 1,
                None => {}
            }
        }
        stats.head_to_head = h2h;

        stats
    }
}

fn build_values(home: &TeamStatistics, away: &TeamStatistics) -> Vec<f64> {
    let strength = |s: &TeamStatistics| s.form() + s.goals_for_per_game() - s.goals_against_per_game();
    let h2h = home.head_to_head;
    let h2h_balance = if h2h.meetings() == 0 {
        0.0
    } else {
        (f64::from(h2h.wins) - f64::from(h2h.losses)) / f64::from(h2h.meetings())
    };

    let mut values = Vec::with_capacity(FEATURE_COUNT);
    for s in [home, away] {
        values.push(s.form());
        values.push(s.goals_for_per_game());
        values.push(s.goals_against_per_game());
        values.push(f64::from(s.win_streak));
        values.push(s.conversion());
        values.push(s.avg_possession.unwrap_or(NEUTRAL_POSSESSION));
    }
    values.push(strength(home) - strength(away));
    values.push(h2h_balance);
    values
}

/// Fill W/D/L counts from a source-reported form string (newest last).
fn apply_form_string(stats: &mut TeamStatistics, form: &str, window: usize) {
    let results: Vec<char> = form
        .chars()
        .filter(|c| matches!(c.to_ascii_uppercase(), 'W' | 'D' | 'L'))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let start = results.len().saturating_sub(window);
    let recent = &results[start..];

    stats.matches_played = recent.len();
    for c in recent {
        match c {
            'W' => stats.wins += 1,
            'D' => stats.draws += 1,
            _ => stats.losses += 1,
        }
    }
    stats.win_streak = recent.iter().rev().take_while(|c| **c == 'W').count() as u32;
}

// ---------------------------------------------------------------------------
// Side helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TeamResult {
    Win,
    Draw,
    Loss,
}

#[derive(Debug, Clone, Copy)]
enum TeamSide {
    Home,
    Away,
}

impl TeamSide {
    fn of(record: &MatchRecord, team: &str) -> Self {
        if record.home_team == team {
            TeamSide::Home
        } else {
            TeamSide::Away
        }
    }

    fn goals(&self, r: &MatchRecord) -> (u32, u32) {
        let (h, a) = (r.home_goals.unwrap_or(0), r.away_goals.unwrap_or(0));
        match self {
            TeamSide::Home => (h, a),
            TeamSide::Away => (a, h),
        }
    }

    fn shots_on_target(&self, r: &MatchRecord) -> Option<u32> {
        match self {
            TeamSide::Home => r.home_shots_on_target,
            TeamSide::Away => r.away_shots_on_target,
        }
    }

    fn possession(&self, r: &MatchRecord) -> Option<f64> {
        match self {
            TeamSide::Home => r.home_possession,
            TeamSide::Away => r.away_possession,
        }
    }

    fn result(&self, r: &MatchRecord) -> Option<TeamResult> {
        let outcome = r.result()?;
        Some(match (self, outcome) {
            (_, Outcome::Draw) => TeamResult::Draw,
            (TeamSide::Home, Outcome::Home) | (TeamSide::Away, Outcome::Away) => TeamResult::Win,
            _ => TeamResult::Loss,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
