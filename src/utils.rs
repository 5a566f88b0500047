//! Shared utility functions and traits

/// Extension trait for tracking a running minimum in `Option<T>`.
///
/// Used for the shortest chatter gap of a key.
///
/// # Example
///
/// ```
/// use keyboard_dechatter::utils::MinMaxExt;
///
/// let mut shortest_gap_us: Option<u64> = None;
/// shortest_gap_us.update_min(9_000);
/// shortest_gap_us.update_min(4_000);
/// shortest_gap_us.update_min(6_000);
/// assert_eq!(shortest_gap_us, Some(4_000));
/// ```
pub trait MinMaxExt<T: Ord + Copy> {
    /// Store `value` if it is below the current minimum or none is set.
    fn update_min(&mut self, value: T);
}

impl<T: Ord + Copy> MinMaxExt<T> for Option<T> {
    fn update_min(&mut self, value: T) {
        *self = Some(self.map_or(value, |m| m.min(value)));
    }
}
