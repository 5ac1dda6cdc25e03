//! Balanced spatial partitions from recursive median splits.
//!
//! Each row is represented by a point (usually its geometry's centroid).
//! All points start in a single group. In every iteration, each group is
//! split independently at the median of its points along one axis
//! (X in even iterations, Y in odd ones). Points strictly below the median
//! get a `0` bit, all others a `1` bit. After `n` iterations every point has
//! collected `n` bits that address one of at most `2^n` partitions. Keys are
//! prefixed with a constant `0`, so a key always has `n + 1` characters.
//!
//! The points are kept in a flat arena. Every group is a contiguous range of
//! that arena, and splitting a group partitions its range in place, so no
//! recursion is necessary and the memory overhead is one record per row.

use std::ops::Range;

use anyhow::Result;
use geo::Point;
use tracing::{debug, warn};

use crate::{config::KdTreeLimits, error::GeoKeyError};

use super::BitString;

/// Maximum number of split iterations
pub const MAX_ITERATIONS: u8 = 20;

/// A point and the partition bits collected for it so far
#[derive(Debug, Clone, Copy)]
struct Record {
    x: f64,
    y: f64,
    row: usize,
    bits: u32,
}

impl Record {
    fn coord(&self, axis: usize) -> f64 {
        if axis == 0 {
            self.x
        } else {
            self.y
        }
    }
}

/// Computes KD-tree partition keys for a set of points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdTreeBuilder {
    iterations: u8,
}

impl KdTreeBuilder {
    /// Creates a builder performing the given number of split iterations
    pub fn new(iterations: u8) -> Result<Self> {
        if iterations == 0 || iterations > MAX_ITERATIONS {
            return Err(GeoKeyError::invalid(
                "iterations",
                format!("KD-tree iterations must be between 1 and {MAX_ITERATIONS}, got {iterations}"),
            )
            .into());
        }
        Ok(Self { iterations })
    }

    /// The number of split iterations
    pub fn iterations(&self) -> u8 {
        self.iterations
    }

    /// Refuses to run on more rows than the configured limit unless the
    /// limit has been overridden explicitly. The cost of the derivation
    /// grows with both the number of rows and the number of iterations.
    pub fn check_scale(&self, rows: u64, limits: &KdTreeLimits) -> Result<()> {
        if rows <= limits.max_rows {
            return Ok(());
        }
        if !limits.allow_large {
            return Err(GeoKeyError::UnsupportedScale {
                operation: format!("KD-tree partitioning with {} iterations", self.iterations),
                size: rows,
                unit: "rows",
                limit: limits.max_rows,
                hint: "Partition the data by a coarser hierarchical key (H3 or quadkey) \
                    first and build KD-tree keys per partition, or pass the override flag \
                    to run anyway."
                    .to_string(),
            }
            .into());
        }
        warn!(
            rows,
            limit = limits.max_rows,
            iterations = self.iterations,
            "KD-tree partitioning of a large input was explicitly allowed. This \
             requires {} passes over all rows.",
            self.iterations
        );
        Ok(())
    }

    /// Computes a key for every point. Rows without a point (e.g. empty or
    /// null geometries) get no key.
    pub fn build(&self, points: &[Option<Point>]) -> Vec<Option<BitString>> {
        let mut arena: Vec<Record> = points
            .iter()
            .enumerate()
            .filter_map(|(row, p)| {
                p.map(|p| Record {
                    x: p.x(),
                    y: p.y(),
                    row,
                    bits: 0,
                })
            })
            .collect();

        let mut groups: Vec<Range<usize>> = if arena.is_empty() {
            Vec::new()
        } else {
            vec![0..arena.len()]
        };

        for i in 0..self.iterations {
            let axis = (i % 2) as usize;
            let mut next_groups = Vec::with_capacity(groups.len() * 2);
            for g in groups {
                let split = split_group(&mut arena[g.clone()], axis);
                if split > 0 {
                    next_groups.push(g.start..g.start + split);
                }
                if g.start + split < g.end {
                    next_groups.push(g.start + split..g.end);
                }
            }
            debug!(iteration = i, groups = next_groups.len(), "KD-tree split done");
            groups = next_groups;
        }

        let mut result = vec![None; points.len()];
        for r in arena {
            result[r.row] = Some(BitString::from_bits(r.bits, self.iterations));
        }
        result
    }
}

/// Splits a group at the median along `axis`, appends one bit to every
/// record and returns the number of records that got a `0` bit. Those are
/// moved to the front of the slice.
fn split_group(group: &mut [Record], axis: usize) -> usize {
    let median = median(group, axis);

    // move records strictly below the median to the front
    let mut split = 0;
    for i in 0..group.len() {
        if group[i].coord(axis) < median {
            group.swap(i, split);
            split += 1;
        }
    }

    for (i, r) in group.iter_mut().enumerate() {
        r.bits = (r.bits << 1) | u32::from(i >= split);
    }

    split
}

/// Selects the (upper) median of the records' coordinates along `axis`. The
/// upper median makes sure that two distinct values are always separated.
fn median(group: &mut [Record], axis: usize) -> f64 {
    let mid = group.len() / 2;
    let (_, m, _) =
        group.select_nth_unstable_by(mid, |a, b| a.coord(axis).total_cmp(&b.coord(axis)));
    m.coord(axis)
}
