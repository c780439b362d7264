// src/utils.rs
//! Small numeric helpers shared across modules.

use ndarray::ArrayView2;

/// Median of a slice, sorting it in place. Empty input yields 0.
pub fn median(data: &mut [f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = data.len() / 2;
    if data.len() % 2 == 0 {
        (data[mid - 1] + data[mid]) / 2.0
    } else {
        data[mid]
    }
}

/// Median of a 2-d view. Copies the pixels; fine for per-frame use.
pub fn frame_median(img: ArrayView2<f64>) -> f64 {
    let mut buf: Vec<f64> = img.iter().copied().collect();
    median(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn frame_median_matches_slice_median() {
        let img = arr2(&[[1.0, 5.0], [3.0, 9.0]]);
        assert_eq!(frame_median(img.view()), 4.0);
    }
}
