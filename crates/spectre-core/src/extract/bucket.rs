// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chrono::{DateTime, Utc};

use crate::protocol::AggregateSample;

/// One pixel of the waterfall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    /// Peak `DBHigh` of every sample in the cell.
    pub db: f64,
    pub freq_low: u64,
    pub freq_high: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Cell {
    fn new(sample: &AggregateSample) -> Self {
        Self {
            db: sample.db_high,
            freq_low: sample.freq_low,
            freq_high: sample.freq_high,
            start: sample.start,
            end: sample.end,
        }
    }

    fn absorb(&mut self, sample: &AggregateSample) {
        self.db = self.db.max(sample.db_high);
        self.freq_low = self.freq_low.min(sample.freq_low);
        self.freq_high = self.freq_high.max(sample.freq_high);
        self.start = self.start.min(sample.start);
        self.end = self.end.max(sample.end);
    }
}

/// Group index of the `rank`-th of `total` ordered rows split into `groups`
/// consecutive groups whose sizes differ by at most one, larger groups first.
///
/// # Examples
///
/// ```
/// use spectre_core::extract::ntile;
///
/// // 7 rows into 3 groups: sizes 3, 2, 2.
/// let groups: Vec<usize> = (0..7).map(|k| ntile(k, 7, 3)).collect();
/// assert_eq!(groups, vec![0, 0, 0, 1, 1, 2, 2]);
/// ```
#[must_use]
pub fn ntile(rank: usize, total: usize, groups: usize) -> usize {
    if groups == 0 || total == 0 {
        return 0;
    }
    let base = total / groups;
    let larger = total % groups;
    let split = larger * (base + 1);
    if rank < split {
        rank / (base + 1)
    } else if base == 0 {
        // More groups than rows: trailing groups stay empty.
        larger
    } else {
        larger + (rank - split) / base
    }
}

/// Rank rows along one axis: the returned vector holds each row's group.
fn rank_groups<K, F>(rows: &[AggregateSample], groups: usize, key: F) -> Vec<usize>
where
    K: Ord,
    F: Fn(&AggregateSample) -> K,
{
    let mut order: Vec<usize> = (0..rows.len()).collect();
    // Stable, so ties keep store order.
    order.sort_by_key(|&i| key(&rows[i]));

    let mut assigned = vec![0; rows.len()];
    for (rank, &row) in order.iter().enumerate() {
        assigned[row] = ntile(rank, rows.len(), groups);
    }
    assigned
}

/// Fold rows into a row-major `width` x `height` grid of peak-hold cells.
pub(super) fn fold(rows: &[AggregateSample], width: usize, height: usize) -> Vec<Option<Cell>> {
    let mut cells: Vec<Option<Cell>> = vec![None; width * height];
    if width == 0 || height == 0 {
        return cells;
    }

    let ys = rank_groups(rows, height, |s| s.start);
    let xs = rank_groups(rows, width, |s| s.freq_center);

    for (i, sample) in rows.iter().enumerate() {
        let slot = &mut cells[ys[i] * width + xs[i]];
        match slot {
            Some(cell) => cell.absorb(sample),
            None => *slot = Some(Cell::new(sample)),
        }
    }
    cells
}
