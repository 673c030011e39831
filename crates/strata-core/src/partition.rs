//! Row striping.
//!
//! Participant `r` of `p` owns rows `[r * base, (r + 1) * base)` with
//! `base = n / p`; the last participant additionally absorbs the whole
//! remainder `n % p`. Stripes partition `[0, n)` exactly. When `p > n` the
//! first `p - 1` stripes are empty, which every downstream step accepts.
//!
//! The [`PartitionPlan`] is computed once per run from `(n, p, mode)` and is
//! the only source of the element counts and offsets used by the transport.

use serde::{Deserialize, Serialize};
use strata_compute::{BlockLayout, CommError};
use thiserror::Error;

/// Errors from partition planning.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("At least one participant is required")]
    ZeroParticipants,

    #[error("Matrix size {n} is not divisible by {p} participants (strict mode)")]
    Uneven { n: usize, p: usize },

    #[error("Matrix size {n} overflows the element count")]
    TooLarge { n: usize },

    #[error("Invalid block layout: {0}")]
    Layout(#[from] CommError),
}

/// Half-open row range `[from, to)` owned by one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stripe {
    pub from: usize,
    pub to: usize,
}

impl Stripe {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }
}

/// How uneven sizes are handled.
///
/// The mode also selects the collective flavour: `Remainder` uses
/// variable-size transfers, `Strict` fixed-size ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionMode {
    /// The last participant absorbs `n % p` extra rows.
    #[default]
    Remainder,
    /// `n % p != 0` is a configuration error.
    Strict,
}

impl std::str::FromStr for PartitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remainder" => Ok(Self::Remainder),
            "strict" => Ok(Self::Strict),
            other => Err(format!(
                "unknown partition mode '{other}' (expected 'remainder' or 'strict')"
            )),
        }
    }
}

/// Stripes for `p` participants over `n` rows, remainder on the last one.
///
/// `p` must be at least 1.
pub fn plan(n: usize, p: usize) -> Vec<Stripe> {
    let base = n / p;
    (0..p)
        .map(|r| {
            let from = r * base;
            let to = if r == p - 1 { n } else { from + base };
            Stripe { from, to }
        })
        .collect()
}

/// Immutable per-run mapping from participant to stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    n: usize,
    mode: PartitionMode,
    stripes: Vec<Stripe>,
    layout: BlockLayout,
}

impl PartitionPlan {
    pub fn new(n: usize, p: usize, mode: PartitionMode) -> Result<Self, PartitionError> {
        if p == 0 {
            return Err(PartitionError::ZeroParticipants);
        }
        if mode == PartitionMode::Strict && n % p != 0 {
            return Err(PartitionError::Uneven { n, p });
        }
        n.checked_mul(n).ok_or(PartitionError::TooLarge { n })?;

        let stripes = plan(n, p);
        let counts = stripes.iter().map(|s| s.len() * n).collect();
        let displs = stripes.iter().map(|s| s.from * n).collect();
        let layout = BlockLayout::new(counts, displs, mode == PartitionMode::Strict)?;

        log::debug!(
            "Partitioned {} rows over {} participants ({:?}): base {}, last {}",
            n,
            p,
            mode,
            n / p,
            stripes[p - 1].len()
        );
        Ok(Self {
            n,
            mode,
            stripes,
            layout,
        })
    }

    /// Matrix dimension.
    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn participants(&self) -> usize {
        self.stripes.len()
    }

    pub fn mode(&self) -> PartitionMode {
        self.mode
    }

    pub fn stripes(&self) -> &[Stripe] {
        &self.stripes
    }

    pub fn stripe(&self, rank: usize) -> Stripe {
        self.stripes[rank]
    }

    /// Element counts and displacements derived from the stripes.
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }
}
