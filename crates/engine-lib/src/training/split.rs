//! Train/test splitting and cross-validation folds

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Row indices of one train/test partition
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub stratified: bool,
}

/// Rows grouped by encoded class, in ascending row order
pub(crate) fn rows_by_class(labels: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(row);
    }
    groups
}

/// Smallest number of rows any present class has
pub(crate) fn smallest_class(labels: &[usize]) -> usize {
    rows_by_class(labels).values().map(Vec::len).min().unwrap_or(0)
}

/// Hold out `test_fraction` of the rows.
///
/// The split is stratified by class when every class has at least two rows;
/// otherwise the rows are shuffled and cut without regard to class, and the
/// offending class is returned with its row count.
pub fn train_test_split(labels: &[usize], test_fraction: f64, seed: u64) -> (Split, Option<(usize, usize)>) {
    let n = labels.len();
    if n < 2 {
        let split = Split {
            train: (0..n).collect(),
            test: Vec::new(),
            stratified: false,
        };
        return (split, None);
    }
    let target = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n.saturating_sub(1).max(1));
    let mut rng = StdRng::seed_from_u64(seed);
    let groups = rows_by_class(labels);

    let degenerate = groups
        .iter()
        .find(|(_, rows)| rows.len() < 2)
        .map(|(class, rows)| (*class, rows.len()));

    let (mut train, mut test) = match degenerate {
        None => {
            let mut train = Vec::new();
            let mut test = Vec::new();
            for rows in groups.values() {
                let mut rows = rows.clone();
                rows.shuffle(&mut rng);
                let share = (rows.len() as f64 * target as f64 / n as f64).round() as usize;
                let held = share.clamp(1, rows.len() - 1);
                test.extend_from_slice(&rows[..held]);
                train.extend_from_slice(&rows[held..]);
            }
            (train, test)
        }
        Some(_) => {
            let mut rows: Vec<usize> = (0..n).collect();
            rows.shuffle(&mut rng);
            let test = rows[..target].to_vec();
            let train = rows[target..].to_vec();
            (train, test)
        }
    };
    train.sort_unstable();
    test.sort_unstable();

    (
        Split {
            train,
            test,
            stratified: degenerate.is_none(),
        },
        degenerate,
    )
}

/// Held-out rows of each of `k` stratified folds.
///
/// Rows of each class are shuffled and dealt round-robin, so every fold
/// sees every class whose size is at least `k`.
pub fn stratified_folds(labels: &[usize], k: usize, seed: u64) -> Vec<Vec<usize>> {
    let k = k.max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds = vec![Vec::new(); k];
    let mut offset = 0;
    for rows in rows_by_class(labels).values() {
        let mut rows = rows.clone();
        rows.shuffle(&mut rng);
        for (i, row) in rows.into_iter().enumerate() {
            folds[(offset + i) % k].push(row);
        }
        offset += 1;
    }
    for fold in folds.iter_mut() {
        fold.sort_unstable();
    }
    folds
}
