//! Host-side helpers for discrete designs and top-k selection.

use ordered_float::OrderedFloat;

/// One-hot encode integer category indices into a flattened row of
/// `indices.len() * categories` features.
pub fn one_hot(indices: &[usize], categories: usize) -> Vec<f32> {
    let mut row = vec![0.0; indices.len() * categories];
    for (pos, &c) in indices.iter().enumerate() {
        debug_assert!(c < categories, "category {c} out of range {categories}");
        row[pos * categories + c] = 1.0;
    }
    row
}

/// Convert a flattened simplex (or one-hot) row into integer categories by
/// taking the argmax of each position. Ties resolve to the lowest index.
pub fn map_to_integers(row: &[f32], categories: usize) -> Vec<usize> {
    row.chunks(categories)
        .map(|probs| {
            let mut best = 0;
            for (c, &p) in probs.iter().enumerate() {
                if p > probs[best] {
                    best = c;
                }
            }
            best
        })
        .collect()
}

/// Snap a simplex row onto the one-hot vertex of each position's argmax.
pub fn to_one_hot_argmax(row: &[f32], categories: usize) -> Vec<f32> {
    one_hot(&map_to_integers(row, categories), categories)
}

/// Indices of the `k` largest values, highest first.
///
/// Equal values keep their original order.
pub fn top_k_indices(values: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by_key(|&i| std::cmp::Reverse(OrderedFloat(values[i])));
    indices.truncate(k);
    indices
}
