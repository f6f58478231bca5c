use std::time::Instant;

use prometheus::HistogramVec;
use pvs_errors::StatusCode;

/// Scoped timer that records an operation's duration into a histogram
/// labelled by its outcome, on drop. Fixes the label set to a single
/// status string rather than a generic label set, since every caller in
/// this crate times an RPC-shaped operation.
pub struct StatusTimer {
    start: Instant,
    histogram: &'static HistogramVec,
    status: &'static str,
}

impl StatusTimer {
    pub fn new(histogram: &'static HistogramVec) -> Self {
        Self {
            start: Instant::now(),
            histogram,
            status: "success",
        }
    }

    /// Overrides the status label recorded when this timer is dropped.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = match status {
            StatusCode::Success => "success",
            StatusCode::Failed => "failed",
            StatusCode::Disconnected => "disconnected",
            StatusCode::BadHandle => "bad_handle",
            StatusCode::PointUnknown => "point_unknown",
            StatusCode::IllegalState => "illegal_state",
            StatusCode::Unrecoverable => "unrecoverable",
            StatusCode::Ignored => "ignored",
        };
    }
}

impl Drop for StatusTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        self.histogram.with_label_values(&[self.status]).observe(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use prometheus::{HistogramOpts, HistogramVec};

    use super::*;

    static TEST_RPC_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
        HistogramVec::new(
            HistogramOpts::new("test_rpc_seconds", "test only"),
            &["status"],
        )
        .unwrap()
    });

    #[test]
    fn records_on_drop() {
        {
            let mut timer = StatusTimer::new(&TEST_RPC_SECONDS);
            timer.set_status(StatusCode::PointUnknown);
        }
        let metric = TEST_RPC_SECONDS.with_label_values(&["point_unknown"]);
        assert_eq!(metric.get_sample_count(), 1);
    }
}
