//! Match scoring.
//!
//! Pure PnL arithmetic: per-slot return times the round multiplier,
//! summed over starter slots, then compared with a relative tie tolerance.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::matchup::{
    MarketSnapshot, MatchId, MatchResult, MatchType, Outcome, ParticipantId, ParticipantPnl,
    PickSlot, Resolution, TokenSymbol,
};

/// Relative tolerance under which two totals are a tie.
pub const TIE_EPSILON: f64 = 1e-9;

/// Round → multiplier table. Index 0 holds round 1.
///
/// Rounds past the end of the table score with multiplier 1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundMultipliers(Vec<f64>);

impl RoundMultipliers {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Multiplier for a 1-based round.
    pub fn for_round(&self, round: u32) -> f64 {
        round
            .checked_sub(1)
            .and_then(|i| self.0.get(i as usize))
            .copied()
            .unwrap_or(1.0)
    }
}

/// Return of one slot. Zero whenever either price is unusable.
pub fn slot_pnl(entry: Option<f64>, exit: Option<f64>, multiplier: f64) -> f64 {
    match (entry, exit) {
        (Some(entry), Some(exit)) if entry > 0.0 && entry.is_finite() && exit.is_finite() => {
            (exit - entry) / entry * multiplier
        }
        _ => 0.0,
    }
}

/// Aggregate PnL of a roster; bench slots never contribute.
pub fn roster_pnl(
    match_type: MatchType,
    roster: &[PickSlot],
    snapshots: &BTreeMap<TokenSymbol, MarketSnapshot>,
    multipliers: &RoundMultipliers,
) -> f64 {
    roster
        .iter()
        .filter(|slot| !match_type.is_bench(slot.slot_index))
        .map(|slot| {
            let snapshot = snapshots.get(&slot.token_symbol);
            slot_pnl(
                snapshot.and_then(|s| s.price_at_entry),
                snapshot.and_then(|s| s.price_at_exit),
                multipliers.for_round(slot.pick_round),
            )
        })
        .sum()
}

/// Whether two totals are equal within `TIE_EPSILON` relative.
pub fn is_tie(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs());
    (a - b).abs() <= TIE_EPSILON * scale
}

/// Score both rosters and build the settled result.
pub fn score(
    match_id: &MatchId,
    match_type: MatchType,
    participants: &[ParticipantId; 2],
    rosters: &[Vec<PickSlot>; 2],
    snapshots: Vec<MarketSnapshot>,
    multipliers: &RoundMultipliers,
    settled_at: DateTime<Utc>,
) -> MatchResult {
    let by_symbol: BTreeMap<TokenSymbol, MarketSnapshot> = snapshots
        .into_iter()
        .map(|s| (s.token_symbol.clone(), s))
        .collect();

    let totals = [
        roster_pnl(match_type, &rosters[0], &by_symbol, multipliers),
        roster_pnl(match_type, &rosters[1], &by_symbol, multipliers),
    ];

    let outcome = if is_tie(totals[0], totals[1]) {
        Outcome::Tie
    } else {
        let winner = usize::from(totals[1] > totals[0]);
        Outcome::Winner {
            identity: participants[winner].clone(),
        }
    };

    MatchResult {
        match_id: match_id.clone(),
        outcome,
        resolution: Resolution::Settled,
        per_participant_pnl: participants
            .iter()
            .zip(totals)
            .map(|(identity, pnl)| ParticipantPnl {
                identity: identity.clone(),
                pnl,
            })
            .collect(),
        snapshots: by_symbol.into_values().collect(),
        settled_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: u32, symbol: &str, round: u32) -> PickSlot {
        PickSlot {
            slot_index: index,
            token_symbol: symbol.to_string(),
            pick_round: round,
            filled_at: Utc::now(),
            auto_picked: false,
        }
    }

    fn snap(symbol: &str, entry: f64, exit: f64) -> MarketSnapshot {
        MarketSnapshot {
            token_symbol: symbol.to_string(),
            price_at_entry: Some(entry),
            price_at_exit: Some(exit),
        }
    }

    #[test]
    fn test_multiplier_lookup_defaults_to_one() {
        let m = RoundMultipliers::new(vec![1.5, 1.25]);
        assert_eq!(m.for_round(1), 1.5);
        assert_eq!(m.for_round(2), 1.25);
        assert_eq!(m.for_round(3), 1.0);
        assert_eq!(m.for_round(0), 1.0);
    }

    #[test]
    fn test_slot_pnl_missing_prices_are_zero() {
        assert_eq!(slot_pnl(None, Some(10.0), 1.0), 0.0);
        assert_eq!(slot_pnl(Some(10.0), None, 1.0), 0.0);
        assert_eq!(slot_pnl(Some(0.0), Some(10.0), 1.0), 0.0);
        assert!((slot_pnl(Some(100.0), Some(110.0), 2.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_fast_match_scenario() {
        let ids = ["0xaa".to_string(), "0xbb".to_string()];
        let rosters = [vec![slot(0, "ETH", 1)], vec![slot(0, "BTC", 1)]];
        let snapshots = vec![snap("ETH", 2000.0, 2100.0), snap("BTC", 60000.0, 58800.0)];
        let multipliers = RoundMultipliers::new(vec![2.0]);

        let result = score(
            &"m1".to_string(),
            MatchType::Fast,
            &ids,
            &rosters,
            snapshots,
            &multipliers,
            Utc::now(),
        );

        assert_eq!(result.winner(), Some("0xaa"));
        assert!((result.pnl_of("0xaa").unwrap() - 0.05 * 2.0).abs() < 1e-12);
        assert!((result.pnl_of("0xbb").unwrap() + 0.02 * 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_bench_slots_never_score() {
        let ids = ["0xaa".to_string(), "0xbb".to_string()];
        let rosters = [
            vec![slot(0, "AAA", 1), slot(6, "MOON", 7)],
            vec![slot(0, "BBB", 1), slot(7, "DUMP", 8)],
        ];
        let snapshots = vec![
            snap("AAA", 10.0, 11.0),
            snap("BBB", 10.0, 11.0),
            snap("MOON", 1.0, 1000.0),
            snap("DUMP", 1000.0, 1.0),
        ];

        let result = score(
            &"m1".to_string(),
            MatchType::Full,
            &ids,
            &rosters,
            snapshots,
            &RoundMultipliers::default(),
            Utc::now(),
        );

        assert_eq!(result.outcome, Outcome::Tie);
        assert!((result.pnl_of("0xaa").unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_tie_tolerance_is_relative() {
        assert!(is_tie(0.0, 0.0));
        assert!(is_tie(1.0, 1.0 + 1e-12));
        assert!(!is_tie(1.0, 1.0001));
    }
}
