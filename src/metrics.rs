//! Statistics behind the evaluator. All functions return `f64::NAN` when a
//! value is undefined for the input rather than panicking.

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation.
pub fn stddev(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

/// Linear correlation. NaN on length mismatch, fewer than two points or
/// zero variance in either sequence.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    if n != y.len() || n < 2 {
        return f64::NAN;
    }

    let mean_x = mean(x);
    let mean_y = mean(y);

    let mut num = 0.0;
    let mut den_x = 0.0;
    let mut den_y = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        num += dx * dy;
        den_x += dx * dx;
        den_y += dy * dy;
    }

    if den_x == 0.0 || den_y == 0.0 {
        f64::NAN
    } else {
        (num / (den_x.sqrt() * den_y.sqrt())).clamp(-1.0, 1.0)
    }
}

/// 1-based ranks with ties sharing their average rank.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && values[indices[j]] == values[indices[i]] {
            j += 1;
        }
        let avg = (i + j + 1) as f64 / 2.0;
        for &idx in &indices[i..j] {
            ranks[idx] = avg;
        }
        i = j;
    }
    ranks
}

/// Rank correlation: Pearson over average ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return f64::NAN;
    }
    if x.iter().chain(y).any(|v| v.is_nan()) {
        return f64::NAN;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

fn dcg(relevances: &[f64]) -> f64 {
    relevances
        .iter()
        .enumerate()
        .map(|(i, rel)| {
            if i == 0 {
                *rel
            } else {
                rel / (i as f64 + 2.0).log2()
            }
        })
        .sum()
}

/// NDCG@k over relevances listed in ranked order. 0 when the ideal DCG is 0.
pub fn ndcg_at_k(relevances: &[f64], k: usize) -> f64 {
    let k = k.min(relevances.len());
    if k == 0 {
        return 0.0;
    }

    let actual = dcg(&relevances[..k]);

    let mut ideal = relevances.to_vec();
    ideal.sort_by(|a, b| b.total_cmp(a));
    let ideal = dcg(&ideal[..k]);

    if ideal > 0.0 { actual / ideal } else { 0.0 }
}
