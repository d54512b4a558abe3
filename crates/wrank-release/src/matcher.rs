use wrank_adapters::display_name_to_first_last;
use wrank_core::{Candidate, RosterEntry};

pub const MAX_CANDIDATES: usize = 5;

const NAME_WEIGHT: f64 = 0.85;
const SCHOOL_WEIGHT: f64 = 0.15;

/// Lower-case, drop `.` `,` and `'`, hyphens to spaces, collapse whitespace.
pub fn normalize_loose(value: &str) -> String {
    value
        .to_lowercase()
        .replace(['.', ',', '\''], "")
        .replace('-', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 1.0 exact, 0.85 surname plus first initial, 0.70 surname only, else 0.
/// Inputs must already be normalized.
pub fn name_score(target: &str, candidate: &str) -> f64 {
    if target == candidate {
        return 1.0;
    }
    let target_parts = target.split_whitespace().collect::<Vec<_>>();
    let candidate_parts = candidate.split_whitespace().collect::<Vec<_>>();
    let (
        [target_first, .., target_last],
        [candidate_first, .., candidate_last],
    ) = (target_parts.as_slice(), candidate_parts.as_slice())
    else {
        return 0.0;
    };
    if target_last != candidate_last {
        return 0.0;
    }
    if target_first.chars().next() == candidate_first.chars().next() {
        0.85
    } else {
        0.70
    }
}

/// 1.0 exact, 0.75 containment either way, 0 otherwise or when either side is empty.
/// Inputs must already be normalized.
pub fn school_score(target: &str, candidate: &str) -> f64 {
    if target.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    if target == candidate {
        1.0
    } else if candidate.contains(target) || target.contains(candidate) {
        0.75
    } else {
        0.0
    }
}

/// Combined score in [0, 1]. A non-matching name is never rescued by the school.
pub fn score_candidate(target_name: &str, target_school: &str, entry: &RosterEntry) -> f64 {
    let name = name_score(
        &normalize_loose(target_name),
        &normalize_loose(&display_name_to_first_last(&entry.name)),
    );
    if name <= 0.0 {
        return 0.0;
    }
    let school = school_score(&normalize_loose(target_school), &normalize_loose(&entry.school));
    name * NAME_WEIGHT + school * SCHOOL_WEIGHT
}

/// Positive-scoring entries, best first, ties in roster order, at most five.
pub fn rank_candidates(
    target_name: &str,
    target_school: &str,
    entries: &[RosterEntry],
) -> Vec<Candidate> {
    let mut scored = entries
        .iter()
        .filter_map(|entry| {
            let score = score_candidate(target_name, target_school, entry);
            (score > 0.0).then(|| Candidate::from_entry(entry, score))
        })
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(MAX_CANDIDATES);
    scored
}
