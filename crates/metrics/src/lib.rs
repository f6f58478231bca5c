//! Thin wrapper around the `prometheus` crate: a single process-wide
//! registry plus `register_*!` macros and a scoped [`StatusTimer`], built
//! on the published `prometheus` crate rather than an internal fork.

use std::sync::LazyLock;

pub use prometheus;
use prometheus::Registry;

mod timer;

pub use timer::StatusTimer;

pub static PVS_METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Register a counter with the process-wide registry and store it in a
/// static. The metric name is the lower_snake_case variable name.
#[macro_export]
macro_rules! register_pvs_counter {
    ($VIS:vis $NAME:ident, $HELP:literal) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                let counter = $crate::prometheus::IntCounter::new(
                    stringify!($NAME),
                    $HELP,
                )
                .expect("metric construction failed");
                $crate::PVS_METRICS_REGISTRY
                    .register(Box::new(counter.clone()))
                    .expect("metric registration failed");
                counter
            });
    };
}

/// Register a histogram with the process-wide registry and store it in a
/// static.
#[macro_export]
macro_rules! register_pvs_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                let opts = $crate::prometheus::HistogramOpts::new(stringify!($NAME), $HELP);
                let histogram = $crate::prometheus::Histogram::with_opts(opts)
                    .expect("metric construction failed");
                $crate::PVS_METRICS_REGISTRY
                    .register(Box::new(histogram.clone()))
                    .expect("metric registration failed");
                histogram
            });
    };
}

/// Register a status-labelled histogram (the shape [`StatusTimer`] expects)
/// with the process-wide registry.
#[macro_export]
macro_rules! register_pvs_status_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::HistogramVec> =
            std::sync::LazyLock::new(|| {
                let opts = $crate::prometheus::HistogramOpts::new(stringify!($NAME), $HELP);
                let histogram = $crate::prometheus::HistogramVec::new(opts, &["status"])
                    .expect("metric construction failed");
                $crate::PVS_METRICS_REGISTRY
                    .register(Box::new(histogram.clone()))
                    .expect("metric registration failed");
                histogram
            });
    };
}

/// Register a gauge with the process-wide registry and store it in a static.
#[macro_export]
macro_rules! register_pvs_gauge {
    ($VIS:vis $NAME:ident, $HELP:literal) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntGauge> =
            std::sync::LazyLock::new(|| {
                let gauge = $crate::prometheus::IntGauge::new(stringify!($NAME), $HELP)
                    .expect("metric construction failed");
                $crate::PVS_METRICS_REGISTRY
                    .register(Box::new(gauge.clone()))
                    .expect("metric registration failed");
                gauge
            });
    };
}

#[cfg(test)]
mod tests {
    register_pvs_counter!(TEST_COUNTER_TOTAL, "a counter used only by tests");

    #[test]
    fn counter_increments() {
        TEST_COUNTER_TOTAL.inc();
        assert!(TEST_COUNTER_TOTAL.get() >= 1);
    }
}
