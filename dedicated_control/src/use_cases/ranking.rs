// In-memory kill/death standings used for rank queries and round results.

use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankStats {
    pub kills: u32,
    pub deaths: u32,
    pub suicides: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankEntry {
    pub key: String,
    pub position: usize,
    pub stats: RankStats,
}

#[derive(Debug, Default)]
pub struct Ranking {
    totals: HashMap<String, RankStats>,
    // Kills in the current round only.
    round_kills: HashMap<String, u32>,
}

impl Ranking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &str) {
        self.totals.entry(key.to_string()).or_default();
    }

    pub fn start_round(&mut self) {
        self.round_kills.clear();
    }

    /// Records a death; no killer or killer == victim is a suicide.
    pub fn record_death(&mut self, victim: &str, killer: Option<&str>) {
        let killer = killer.filter(|killer| *killer != victim);

        let victim_stats = self.totals.entry(victim.to_string()).or_default();
        victim_stats.deaths += 1;
        if killer.is_none() {
            victim_stats.suicides += 1;
        }

        if let Some(killer) = killer {
            self.totals.entry(killer.to_string()).or_default().kills += 1;
            *self.round_kills.entry(killer.to_string()).or_default() += 1;
        }
    }

    pub fn lookup(&self, key: &str) -> Option<RankEntry> {
        self.standings()
            .into_iter()
            .find(|entry| entry.key.eq_ignore_ascii_case(key))
    }

    pub fn top(&self, count: usize) -> Vec<RankEntry> {
        let mut standings = self.standings();
        standings.truncate(count);
        standings
    }

    /// Highest killer of the current round, ties broken by key.
    pub fn round_leader(&self) -> Option<(String, u32)> {
        self.round_kills
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(key, kills)| (key.clone(), *kills))
    }

    fn standings(&self) -> Vec<RankEntry> {
        let mut rows: Vec<(&String, &RankStats)> = self.totals.iter().collect();
        rows.sort_by(|a, b| compare_stats(a.1, b.1).then_with(|| a.0.cmp(b.0)));
        rows.into_iter()
            .enumerate()
            .map(|(index, (key, stats))| RankEntry {
                key: key.clone(),
                position: index + 1,
                stats: *stats,
            })
            .collect()
    }
}

// More kills first, then fewer deaths.
fn compare_stats(a: &RankStats, b: &RankStats) -> Ordering {
    b.kills.cmp(&a.kills).then_with(|| a.deaths.cmp(&b.deaths))
}
