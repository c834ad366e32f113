//! Instant-runoff tally.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoWinnerReason {
    /// The event has no options.
    NoOptions,
    /// No eligible ballots were cast.
    InsufficientQuorum,
    /// Every eligible ballot abstained.
    AllAbstain,
}

impl fmt::Display for NoWinnerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOptions => "no_options",
            Self::InsufficientQuorum => "insufficient_quorum",
            Self::AllAbstain => "all_abstain",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TallyOutcome {
    Winner {
        option_id: String,
        tiebroken: bool,
        /// Counting rounds run; 0 when the event had a single option.
        rounds: u32,
        /// First-preference votes for the winner in the deciding round.
        votes: usize,
        /// Non-exhausted ballots in the deciding round.
        total: usize,
    },
    NoWinner {
        reason: NoWinnerReason,
    },
}

impl TallyOutcome {
    pub fn winner(&self) -> Option<(&str, bool)> {
        match self {
            Self::Winner {
                option_id,
                tiebroken,
                ..
            } => Some((option_id.as_str(), *tiebroken)),
            Self::NoWinner { .. } => None,
        }
    }

    /// One-line explanation stored on the event.
    pub fn explanation(&self) -> String {
        match self {
            Self::Winner {
                option_id,
                tiebroken: true,
                rounds,
                ..
            } => format!("option {option_id} chosen by tie-break after {rounds} round(s)"),
            Self::Winner {
                option_id,
                rounds: 0,
                ..
            } => format!("option {option_id} chosen as the only option"),
            Self::Winner {
                option_id,
                rounds,
                votes,
                total,
                ..
            } => format!(
                "option {option_id} won with {votes} of {total} votes after {rounds} round(s)"
            ),
            Self::NoWinner { reason } => format!("no winner: {reason}"),
        }
    }
}

/// Tally ranked ballots for one event.
///
/// `rankings` holds one preference list per eligible voter (most preferred
/// first); an empty list is an abstention. Options a voter did not rank are
/// treated as eliminated for that voter. The result does not depend on the
/// order of `rankings`.
pub fn tally(option_ids: &[String], rankings: &[Vec<String>]) -> TallyOutcome {
    let mut active: BTreeSet<&str> = option_ids.iter().map(String::as_str).collect();

    if active.is_empty() {
        return TallyOutcome::NoWinner {
            reason: NoWinnerReason::NoOptions,
        };
    }
    if active.len() == 1 {
        let only = active.first().copied().unwrap_or_default();
        return TallyOutcome::Winner {
            option_id: only.to_owned(),
            tiebroken: false,
            rounds: 0,
            votes: 0,
            total: 0,
        };
    }
    if rankings.is_empty() {
        return TallyOutcome::NoWinner {
            reason: NoWinnerReason::InsufficientQuorum,
        };
    }
    if rankings.iter().all(Vec::is_empty) {
        return TallyOutcome::NoWinner {
            reason: NoWinnerReason::AllAbstain,
        };
    }

    let mut rounds = 0;
    loop {
        rounds += 1;

        let mut counts: BTreeMap<&str, usize> = active.iter().map(|o| (*o, 0)).collect();
        for ranking in rankings {
            if let Some(top) = ranking.iter().find(|o| active.contains(o.as_str())) {
                if let Some(c) = counts.get_mut(top.as_str()) {
                    *c += 1;
                }
            }
        }
        let total: usize = counts.values().sum();

        if total > 0 {
            if let Some((&option, &votes)) = counts.iter().find(|(_, c)| **c * 2 > total) {
                return TallyOutcome::Winner {
                    option_id: option.to_owned(),
                    tiebroken: false,
                    rounds,
                    votes,
                    total,
                };
            }
        }

        let min = counts.values().copied().min().unwrap_or(0);
        let losers: Vec<&str> = counts
            .iter()
            .filter(|(_, c)| **c == min)
            .map(|(o, _)| *o)
            .collect();

        if losers.len() == active.len() {
            // Every remaining option is tied; the smallest id wins.
            let first = active.first().copied().unwrap_or_default();
            return TallyOutcome::Winner {
                option_id: first.to_owned(),
                tiebroken: true,
                rounds,
                votes: min,
                total,
            };
        }
        for l in losers {
            active.remove(l);
        }
    }
}
