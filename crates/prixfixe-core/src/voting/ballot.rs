//! Ballot shape and validation.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use prixfixe_db::models::MealPlanOptionVote;

use crate::error::{EngineError, EngineResult};

/// One line of a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotEntry {
    #[serde(rename = "optionID")]
    pub option_id: String,
    #[serde(default)]
    pub rank: u8,
    #[serde(default)]
    pub abstain: bool,
}

impl BallotEntry {
    pub fn ranked(option_id: &str, rank: u8) -> Self {
        Self {
            option_id: option_id.to_owned(),
            rank,
            abstain: false,
        }
    }

    pub fn abstain(option_id: &str) -> Self {
        Self {
            option_id: option_id.to_owned(),
            rank: 0,
            abstain: true,
        }
    }
}

/// Check a ballot against the event's option ids.
///
/// Every option must belong to the event and appear at most once. The
/// non-abstain ranks must be exactly `{1..n}` for some `n` no larger than the
/// number of options. A ballot with only abstain entries is valid.
pub fn validate_ballot(entries: &[BallotEntry], option_ids: &[String]) -> EngineResult<()> {
    if entries.is_empty() {
        return Err(EngineError::InvalidInput(
            "ballot must contain at least one entry".into(),
        ));
    }

    let known: HashSet<&str> = option_ids.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut ranks: Vec<u8> = Vec::new();

    for e in entries {
        if !known.contains(e.option_id.as_str()) {
            return Err(EngineError::InvalidInput(format!(
                "option {} does not belong to this event",
                e.option_id
            )));
        }
        if !seen.insert(e.option_id.as_str()) {
            return Err(EngineError::InvalidInput(format!(
                "option {} appears more than once",
                e.option_id
            )));
        }
        if !e.abstain {
            ranks.push(e.rank);
        }
    }

    ranks.sort_unstable();
    for (i, rank) in ranks.iter().enumerate() {
        let expected = i + 1;
        if usize::from(*rank) != expected {
            return Err(EngineError::InvalidInput(format!(
                "ranks must be distinct and contiguous from 1, got {ranks:?}"
            )));
        }
    }
    if ranks.len() > option_ids.len() {
        return Err(EngineError::InvalidInput(format!(
            "{} ranks for {} options",
            ranks.len(),
            option_ids.len()
        )));
    }
    Ok(())
}

/// Turn stored votes into ranked preference lists, one per eligible voter.
///
/// Voters not in `eligible` are dropped. A voter who abstained on every
/// option yields an empty list. Output is ordered by voter id.
pub fn rankings_from_votes(
    votes: &[MealPlanOptionVote],
    eligible: &HashSet<String>,
) -> Vec<Vec<String>> {
    let mut by_voter: BTreeMap<&str, Vec<&MealPlanOptionVote>> = BTreeMap::new();
    for v in votes {
        if eligible.contains(&v.voter_id) {
            by_voter.entry(v.voter_id.as_str()).or_default().push(v);
        }
    }
    by_voter
        .into_values()
        .map(|mut vs| {
            vs.retain(|v| !v.abstain);
            vs.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.option_id.cmp(&b.option_id)));
            vs.into_iter().map(|v| v.option_id.clone()).collect()
        })
        .collect()
}
