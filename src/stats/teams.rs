//! Team-name normalization for joining odds feeds to stat tables.
//!
//! Odds providers and stat sources rarely agree on team names ("UConn" vs
//! "Connecticut Huskies", "Miami (FL)" vs "Miami FL"). Names are reduced to a
//! canonical key of lowercase alphanumeric tokens; lookups try the exact key
//! first and fall back to the best token-overlap match.
//!
//! When more than one stat entry ties for the best match (a query of "State"
//! against "Ohio State" and "Michigan State"), the match is reported as
//! [`TeamMatch::Ambiguous`] so callers can log it and inflate uncertainty
//! instead of silently trusting an arbitrary join.

use serde::Serialize;
use std::collections::HashSet;

/// Tokens that appear in many team names and carry no identity.
const STOP_WORDS: &[&str] = &["the", "university", "univ", "college"];

/// Minimum token length considered during fuzzy matching.
const MIN_TOKEN_LEN: usize = 3;

/// How a team name was joined to a stat-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TeamMatch {
    /// Canonical keys are identical
    Exact { key: String },
    /// Exactly one entry shares the best token overlap
    Substring { key: String },
    /// Several entries tie; `key` is the deterministic pick among them
    Ambiguous { key: String, candidates: Vec<String> },
    /// Nothing overlaps
    Unknown,
}

impl TeamMatch {
    pub fn key(&self) -> Option<&str> {
        match self {
            TeamMatch::Exact { key }
            | TeamMatch::Substring { key }
            | TeamMatch::Ambiguous { key, .. } => Some(key),
            TeamMatch::Unknown => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, TeamMatch::Ambiguous { .. })
    }
}

/// Canonical team key: lowercase ASCII alphanumeric tokens joined by a
/// single space. "Miami (FL)" → "miami fl", "St. John's" → "st john s".
pub fn team_key(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn match_tokens(key: &str) -> Vec<&str> {
    key.split(' ')
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .filter(|t| !STOP_WORDS.contains(t))
        .collect()
}

/// Index of canonical keys for one league's stat table.
#[derive(Debug, Clone, Default)]
pub struct TeamIndex {
    keys: Vec<String>,
    exact: HashSet<String>,
}

impl TeamIndex {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        let exact = keys.iter().cloned().collect();
        TeamIndex { keys, exact }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve a free-text team name against the index.
    pub fn resolve(&self, name: &str) -> TeamMatch {
        let query = team_key(name);
        if query.is_empty() {
            return TeamMatch::Unknown;
        }
        if self.exact.contains(&query) {
            return TeamMatch::Exact { key: query };
        }

        let query_tokens = match_tokens(&query);
        let mut scored: Vec<(u32, usize, &String)> = self
            .keys
            .iter()
            .filter_map(|key| {
                let score = overlap_score(&query, &query_tokens, key);
                (score > 0).then(|| (score, key.len().abs_diff(query.len()), key))
            })
            .collect();
        if scored.is_empty() {
            return TeamMatch::Unknown;
        }

        // Best overlap first, then closest length, then key order
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(b.2)));
        let best_score = scored[0].0;
        let tied: Vec<String> = scored
            .iter()
            .take_while(|(score, _, _)| *score == best_score)
            .map(|(_, _, key)| (*key).clone())
            .collect();

        let key = scored[0].2.clone();
        if tied.len() > 1 {
            TeamMatch::Ambiguous {
                key,
                candidates: tied,
            }
        } else {
            TeamMatch::Substring { key }
        }
    }
}

/// Token overlap between a query and an indexed key. Whole-token equality
/// counts double; containment in either direction counts once. Whole-name
/// containment adds a bonus so "duke" prefers "duke blue devils" over an
/// entry that merely shares a token fragment.
fn overlap_score(query: &str, query_tokens: &[&str], key: &str) -> u32 {
    let key_tokens = match_tokens(key);
    let mut score = 0;
    for qt in query_tokens {
        if key_tokens.iter().any(|kt| kt == qt) {
            score += 2;
        } else if key_tokens
            .iter()
            .any(|kt| kt.contains(qt) || qt.contains(kt))
        {
            score += 1;
        }
    }
    if score > 0 && (key.contains(query) || query.contains(key)) {
        score += 3;
    }
    score
}
