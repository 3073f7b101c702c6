//! Out-of-bounds coordinate mapping for the tiled and patch filters.

/// Mirror a coordinate into `[0, len)` without repeating the edge pixel
/// (`dcb|abcd|cba`).
///
/// `len` must be non-zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn reflect_101(i: i64, len: u32) -> u32 {
    let n = i64::from(len);
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i.rem_euclid(period);
    (if m < n { m } else { period - m }) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflect_101_mirrors_without_edge() {
        let mapped: Vec<u32> = (-3..8).map(|i| reflect_101(i, 5)).collect();
        assert_eq!(mapped, vec![3, 2, 1, 0, 1, 2, 3, 4, 3, 2, 1]);
    }

    #[test]
    fn reflect_101_handles_far_and_tiny() {
        assert_eq!(reflect_101(7, 1), 0);
        assert_eq!(reflect_101(-5, 2), 1);
        assert_eq!(reflect_101(20, 3), 0);
    }
}
