//! Filtering of raw range readings

/// A generic filter interface
pub trait Filter<T> {
    /// Filter the input data
    fn filter(&self, input: T) -> T;
}

/// Replaces readings below the sensor minimum with the sensor maximum.
///
/// Short readings are how most lasers report "no return"; the mapper would
/// otherwise register them as obstacles right at the sensor.
#[derive(Debug, Clone, Copy)]
pub struct MissingRangeFilter {
    range_min: f64,
    range_max: f64,
}

impl MissingRangeFilter {
    /// Create a new filter for a sensor's range bounds
    pub fn new(range_min: f64, range_max: f64) -> Self {
        MissingRangeFilter {
            range_min,
            range_max,
        }
    }
}

impl Filter<f64> for MissingRangeFilter {
    fn filter(&self, input: f64) -> f64 {
        if input < self.range_min {
            self.range_max
        } else {
            input
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_readings_become_max_range() {
        let filter = MissingRangeFilter::new(0.1, 10.0);

        assert_eq!(filter.filter(0.05), 10.0);
        assert_eq!(filter.filter(0.0), 10.0);
        assert_eq!(filter.filter(-1.0), 10.0);
    }

    #[test]
    fn test_other_readings_pass_through() {
        let filter = MissingRangeFilter::new(0.1, 10.0);

        // range_min itself is a valid reading
        assert_eq!(filter.filter(0.1), 0.1);
        assert_eq!(filter.filter(5.0), 5.0);
        // Not clamped on the far side either
        assert_eq!(filter.filter(12.0), 12.0);
        assert!(filter.filter(f64::NAN).is_nan());
    }
}
