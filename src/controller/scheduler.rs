//! Retrain trigger on reading row counts.

/// Fires when the readings table reaches an exact multiple of the configured interval.
///
/// Row counts are observed once per tick, so a multiple the logger races past between two ticks
/// is not seen; the next multiple triggers instead.
#[derive(Debug, Clone)]
pub struct RetrainScheduler {
    interval_rows: u64,
    last_triggered: Option<u64>,
}

impl RetrainScheduler {
    pub fn new(interval_rows: u64) -> Self {
        Self {
            interval_rows: interval_rows.max(1),
            last_triggered: None,
        }
    }

    pub fn interval_rows(&self) -> u64 {
        self.interval_rows
    }

    pub fn is_due(&self, row_count: u64) -> bool {
        row_count > 0
            && row_count % self.interval_rows == 0
            && self.last_triggered != Some(row_count)
    }

    /// Check and consume a trigger. The same count never fires twice, whether or not the
    /// retrain it started succeeded.
    pub fn should_retrain(&mut self, row_count: u64) -> bool {
        if self.is_due(row_count) {
            self.last_triggered = Some(row_count);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, false)]
    #[case(499, false)]
    #[case(500, true)]
    #[case(501, false)]
    #[case(1000, true)]
    #[case(1499, false)]
    fn triggers_on_exact_multiples(#[case] count: u64, #[case] expected: bool) {
        let mut scheduler = RetrainScheduler::new(500);
        assert_eq!(scheduler.should_retrain(count), expected);
    }

    #[test]
    fn same_count_fires_once() {
        let mut scheduler = RetrainScheduler::new(500);
        assert!(scheduler.should_retrain(500));
        assert!(!scheduler.should_retrain(500));
        assert!(!scheduler.is_due(500));
        assert!(scheduler.should_retrain(1000));
    }

    #[test]
    fn zero_interval_is_treated_as_one() {
        let mut scheduler = RetrainScheduler::new(0);
        assert_eq!(scheduler.interval_rows(), 1);
        assert!(scheduler.should_retrain(3));
    }
}
