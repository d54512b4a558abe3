use std::collections::HashSet;

use thiserror::Error;
use wrank_core::PastedRow;

/// One rejected line. `line` is 1-based in the raw paste.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasteError {
    #[error("line {line}: invalid rank in line: \"{text}\"")]
    InvalidRank { line: usize, text: String },
    #[error("line {line}: duplicate rank in pasted block: {rank} (\"{text}\")")]
    DuplicateRank { line: usize, rank: i32, text: String },
    #[error("line {line}: missing name/school in line: \"{text}\"")]
    MissingNameOrSchool { line: usize, text: String },
    #[error("line {line}: could not parse line (need at least 4 tokens): \"{text}\"")]
    TooFewTokens { line: usize, text: String },
    #[error("line {line}: could not parse name/school in line: \"{text}\"")]
    NameOrSchoolUnparsable { line: usize, text: String },
    #[error("line {line}: invalid previous rank (use integer or NR) in line: \"{text}\"")]
    InvalidPreviousRank { line: usize, text: String },
}

impl PasteError {
    pub fn line(&self) -> usize {
        match self {
            PasteError::InvalidRank { line, .. }
            | PasteError::DuplicateRank { line, .. }
            | PasteError::MissingNameOrSchool { line, .. }
            | PasteError::TooFewTokens { line, .. }
            | PasteError::NameOrSchoolUnparsable { line, .. }
            | PasteError::InvalidPreviousRank { line, .. } => *line,
        }
    }
}

/// Accepted rows and rejected lines, both in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasteOutcome {
    pub rows: Vec<PastedRow>,
    pub errors: Vec<PasteError>,
}

impl PasteOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// FR/SO/JR/SR and redshirt spellings such as `RS-SO`, `RS-Jr.` or `So.`.
pub fn looks_like_class_year(token: &str) -> bool {
    let normalized = token
        .trim()
        .to_ascii_uppercase()
        .replace(['-', '.'], "");
    matches!(
        normalized.as_str(),
        "FR" | "SO" | "JR" | "SR" | "RS" | "RFR" | "RSFR" | "RSSO" | "RSJR" | "RSSR"
    )
}

fn looks_like_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("rank") && lower.contains("school")
}

fn non_empty_tokens<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    parts.map(str::trim).filter(|p| !p.is_empty()).collect()
}

/// Line-scoped parsing state: rank uniqueness spans the whole paste.
struct LineParser<'a> {
    line: usize,
    text: &'a str,
}

impl<'a> LineParser<'a> {
    fn rank(&self, token: &str, seen: &mut HashSet<i32>) -> Result<i32, PasteError> {
        let rank = token
            .parse::<i32>()
            .ok()
            .filter(|r| *r > 0)
            .ok_or_else(|| PasteError::InvalidRank {
                line: self.line,
                text: self.text.to_string(),
            })?;
        if !seen.insert(rank) {
            return Err(PasteError::DuplicateRank {
                line: self.line,
                rank,
                text: self.text.to_string(),
            });
        }
        Ok(rank)
    }

    /// `NR` means unranked last time; no positivity check on integers.
    fn previous_rank(&self, token: &str) -> Result<Option<i32>, PasteError> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("NR") {
            return Ok(None);
        }
        token
            .parse::<i32>()
            .map(Some)
            .map_err(|_| PasteError::InvalidPreviousRank {
                line: self.line,
                text: self.text.to_string(),
            })
    }

    fn row(
        &self,
        rank: i32,
        name: &str,
        school: &str,
        previous_rank: Option<i32>,
    ) -> Result<PastedRow, PasteError> {
        let (name, school) = (name.trim(), school.trim());
        if name.is_empty() || school.is_empty() {
            return Err(PasteError::MissingNameOrSchool {
                line: self.line,
                text: self.text.to_string(),
            });
        }
        Ok(PastedRow {
            rank,
            name: name.to_string(),
            school: school.to_string(),
            previous_rank,
        })
    }

    /// `rank, name, school, prev` or `rank, grade, name, school, prev`.
    /// Returns `None` for any other column count.
    fn tabbed(&self, seen: &mut HashSet<i32>) -> Option<Result<PastedRow, PasteError>> {
        let parts = non_empty_tokens(self.text.split('\t'));
        let (rank, name, school, previous) = match parts.as_slice() {
            [rank, name, school, prev] | [rank, _, name, school, prev] => {
                (*rank, *name, *school, *prev)
            }
            _ => return None,
        };
        Some(self.tabbed_row(rank, name, school, previous, seen))
    }

    fn tabbed_row(
        &self,
        rank: &str,
        name: &str,
        school: &str,
        previous: &str,
        seen: &mut HashSet<i32>,
    ) -> Result<PastedRow, PasteError> {
        let rank = self.rank(rank, seen)?;
        let previous_rank = self.previous_rank(previous)?;
        self.row(rank, name, school, previous_rank)
    }

    fn whitespace(&self, seen: &mut HashSet<i32>) -> Result<PastedRow, PasteError> {
        let tokens = non_empty_tokens(self.text.split_whitespace());
        let [first, middle @ .., last] = tokens.as_slice() else {
            return Err(self.too_few_tokens());
        };
        if tokens.len() < 4 {
            return Err(self.too_few_tokens());
        }

        let rank = self.rank(first, seen)?;
        let previous_rank = self.previous_rank(last)?;

        let core = match middle {
            [grade, rest @ ..] if looks_like_class_year(grade) => rest,
            _ => middle,
        };
        if core.len() < 2 {
            return Err(PasteError::NameOrSchoolUnparsable {
                line: self.line,
                text: self.text.to_string(),
            });
        }

        // Two trailing tokens for the school unless that would leave a one-token name.
        let school_tokens = if core.len() - 2 < 2 { 1 } else { 2 };
        let split = core.len() - school_tokens;
        self.row(
            rank,
            &core[..split].join(" "),
            &core[split..].join(" "),
            previous_rank,
        )
    }

    fn too_few_tokens(&self) -> PasteError {
        PasteError::TooFewTokens {
            line: self.line,
            text: self.text.to_string(),
        }
    }
}

/// Parses a pasted rankings table. Blank and header-looking lines are skipped;
/// every other line yields exactly one row or one error.
pub fn parse_rankings_paste(raw: &str) -> PasteOutcome {
    let mut outcome = PasteOutcome::default();
    let mut seen_ranks = HashSet::new();

    for (index, raw_line) in raw.split('\n').enumerate() {
        let text = raw_line.trim();
        if text.is_empty() || looks_like_header(text) {
            continue;
        }
        let parser = LineParser {
            line: index + 1,
            text,
        };

        let parsed = if text.contains('\t') {
            parser
                .tabbed(&mut seen_ranks)
                .unwrap_or_else(|| parser.whitespace(&mut seen_ranks))
        } else {
            parser.whitespace(&mut seen_ranks)
        };

        match parsed {
            Ok(row) => outcome.rows.push(row),
            Err(err) => outcome.errors.push(err),
        }
    }

    outcome
}
