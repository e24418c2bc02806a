//! In-process runner: distribute, shuffle by cell key, then reduce every key in parallel

use std::collections::HashMap;

use rayon::prelude::*;

use crate::mr::{
    error::{MatrixError, Result},
    function::matmul::{distribute, reduce_cell, CellKey, KeyValue, Side, TaggedElement},
    matrix::{JobShape, Matrix},
};

pub type Buckets = HashMap<CellKey, Vec<TaggedElement>>;

/// What a run produced. A failed cell never has a value in `cells`.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Reduced cells, sorted by key
    pub cells: Vec<(CellKey, f64)>,
    /// Cells whose bucket could not be reduced
    pub failures: Vec<MatrixError>,
}

impl Outcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Group distributed pairs into one bucket per output cell
pub fn shuffle(pairs: impl Iterator<Item = KeyValue>) -> Buckets {
    let mut buckets = Buckets::new();
    for kv in pairs {
        buckets.entry(kv.key).or_default().push(kv.value);
    }
    buckets
}

/// Reduce every bucket on the rayon pool.
///
/// A bad bucket is recorded in [`Outcome::failures`] and the other keys keep
/// going, unless `fail_fast` is set, in which case the first failure is returned.
pub fn reduce_buckets(buckets: Buckets, inner: usize, fail_fast: bool) -> Result<Outcome> {
    let reduce = |(key, bucket): (CellKey, Vec<TaggedElement>)| {
        reduce_cell(key, &bucket, inner).map(|value| (key, value))
    };

    let mut outcome = if fail_fast {
        Outcome {
            cells: buckets.into_par_iter().map(reduce).collect::<Result<Vec<_>>>()?,
            failures: Vec::new(),
        }
    } else {
        let (cells, failures): (Vec<_>, Vec<_>) = buckets.into_par_iter().map(reduce).partition_map(|r| match r {
            Ok(cell) => rayon::iter::Either::Left(cell),
            Err(e) => rayon::iter::Either::Right(e),
        });
        Outcome { cells, failures }
    };

    outcome.cells.par_sort_unstable_by_key(|&(key, _)| key);
    for failure in &outcome.failures {
        log::error!("[Reduce] {}", failure);
    }
    Ok(outcome)
}

/// Multiply `a` by `b` in-process
pub fn multiply(a: &Matrix, b: &Matrix, shape: &JobShape, fail_fast: bool) -> Result<Outcome> {
    // both distributors are checked before either emits anything
    let from_a = distribute(a, Side::A, shape)?;
    let from_b = distribute(b, Side::B, shape)?;
    log::info!(
        "[Map] Distributing {} ({}) and {} ({}) to {} output cells",
        a.name(),
        a.shape(),
        b.name(),
        b.shape(),
        shape.a_rows * shape.b_cols
    );
    let buckets = shuffle(from_a.chain(from_b));
    log::info!("[Reduce] Reducing {} buckets", buckets.len());
    reduce_buckets(buckets, shape.inner, fail_fast)
}
