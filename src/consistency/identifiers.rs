//! Letter identifiers for candidates in a pool.
//!
//! The adjudicator refers to candidates as `A`, `B`, `C`, ... The mapping is a
//! bijection between pool positions and a prefix of [`LABELS`], built once per
//! pool, so there are never stale or duplicate letters.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Largest pool that can be labelled with single letters.
pub const MAX_CANDIDATES: usize = 26;

/// Labels in assignment order: position `i` gets `LABELS[i]`.
pub const LABELS: [Label; MAX_CANDIDATES] = [
    Label('A'),
    Label('B'),
    Label('C'),
    Label('D'),
    Label('E'),
    Label('F'),
    Label('G'),
    Label('H'),
    Label('I'),
    Label('J'),
    Label('K'),
    Label('L'),
    Label('M'),
    Label('N'),
    Label('O'),
    Label('P'),
    Label('Q'),
    Label('R'),
    Label('S'),
    Label('T'),
    Label('U'),
    Label('V'),
    Label('W'),
    Label('X'),
    Label('Y'),
    Label('Z'),
];

/// A single uppercase letter naming one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Label(char);

impl Label {
    pub fn as_char(self) -> char {
        self.0
    }

    /// Parse an already-normalized letter. Anything but one of [`LABELS`] is `None`.
    pub fn parse(s: &str) -> Option<Label> {
        let mut chars = s.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        LABELS.iter().copied().find(|l| l.0 == c)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trim surrounding whitespace and uppercase.
pub fn normalize_letter(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolSizeError {
    #[error("candidate pool is empty")]
    Empty,
    #[error("candidate pool has {0} entries; at most {max} can be labelled", max = MAX_CANDIDATES)]
    TooMany(usize),
}

/// Bijection between labels and pool positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierMap {
    positions: BTreeMap<Label, usize>,
}

impl IdentifierMap {
    /// Label a pool of `len` candidates in order.
    pub fn for_pool(len: usize) -> Result<Self, PoolSizeError> {
        match len {
            0 => Err(PoolSizeError::Empty),
            n if n > MAX_CANDIDATES => Err(PoolSizeError::TooMany(n)),
            n => Ok(Self {
                positions: LABELS[..n]
                    .iter()
                    .copied()
                    .enumerate()
                    .map(|(position, label)| (label, position))
                    .collect(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn label_of(&self, position: usize) -> Option<Label> {
        (position < self.len()).then(|| LABELS[position])
    }

    pub fn position_of(&self, label: Label) -> Option<usize> {
        self.positions.get(&label).copied()
    }

    /// Normalize a raw letter and look it up.
    pub fn resolve(&self, raw: &str) -> Option<(Label, usize)> {
        let label = Label::parse(&normalize_letter(raw))?;
        self.position_of(label).map(|p| (label, p))
    }

    /// `(label, position)` pairs in pool order.
    pub fn iter(&self) -> impl Iterator<Item = (Label, usize)> + '_ {
        self.positions.iter().map(|(l, p)| (*l, *p))
    }
}
