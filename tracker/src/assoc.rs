//! Greedy cost-matrix association (§4.4 "ByteTrack-style
//! two-stage" matching), simplified to 2D IoU/ReID cost since there is no
//! multi-camera triangulation here.

/// Greedily match rows to columns by ascending cost, accepting only pairs
/// with `cost <= max_cost`. Returns `(row_idx, col_idx)` pairs; each row
/// and column is used at most once. Ties are broken by the first
/// encountered minimum, matching the earlier row/column index, giving
/// deterministic output independent of hash-map iteration order.
pub fn greedy_match(cost: &[Vec<f32>], max_cost: f32) -> Vec<(usize, usize)> {
    let nrows = cost.len();
    if nrows == 0 {
        return Vec::new();
    }
    let ncols = cost[0].len();
    if ncols == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<(f32, usize, usize)> = Vec::with_capacity(nrows * ncols);
    for (r, row) in cost.iter().enumerate() {
        for (c, &val) in row.iter().enumerate() {
            if val <= max_cost {
                candidates.push((val, r, c));
            }
        }
    }
    candidates.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut used_rows = vec![false; nrows];
    let mut used_cols = vec![false; ncols];
    let mut matches = Vec::new();
    for (_, r, c) in candidates {
        if !used_rows[r] && !used_cols[c] {
            used_rows[r] = true;
            used_cols[c] = true;
            matches.push((r, c));
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_prefers_lowest_cost_first() {
        let cost = vec![vec![0.1, 0.9], vec![0.2, 0.05]];
        let m = greedy_match(&cost, 0.5);
        assert_eq!(m.len(), 2);
        assert!(m.contains(&(1, 1)));
        assert!(m.contains(&(0, 0)));
    }

    #[test]
    fn greedy_respects_max_cost() {
        let cost = vec![vec![0.9]];
        let m = greedy_match(&cost, 0.5);
        assert!(m.is_empty());
    }
}
