//! Per-stage latency breakdown of completed tasks.

use crate::types::TaskTimings;

/// Stage durations of one task, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageSample {
    pub pre_ms: f64,
    /// Request to compute start: time spent queued behind other tasks.
    pub queue_wait_ms: f64,
    pub compute_ms: f64,
    /// Compute end to the owner waking up.
    pub delivery_ms: f64,
    pub post_ms: f64,
    pub round_trip_ms: f64,
}

impl StageSample {
    /// Split one task's timestamps into stage durations.
    pub fn from_timings(t: &TaskTimings) -> Self {
        Self {
            pre_ms: t.worker_request_ms - t.worker_start_ms,
            queue_wait_ms: t.compute_start_ms - t.request_ms,
            compute_ms: t.compute_end_ms - t.compute_start_ms,
            delivery_ms: t.worker_receive_ms - t.compute_end_ms,
            post_ms: t.worker_end_ms - t.worker_receive_ms,
            round_trip_ms: t.worker_receive_ms - t.worker_request_ms,
        }
    }
}

/// Mean of each stage over a set of samples.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageSummary {
    pub samples: usize,
    pub mean: StageSample,
}

impl StageSummary {
    /// Average `samples`; an empty set gives all-zero means.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a StageSample>) -> Self {
        let mut count = 0usize;
        let mut sum = StageSample::default();
        for s in samples {
            count += 1;
            sum.pre_ms += s.pre_ms;
            sum.queue_wait_ms += s.queue_wait_ms;
            sum.compute_ms += s.compute_ms;
            sum.delivery_ms += s.delivery_ms;
            sum.post_ms += s.post_ms;
            sum.round_trip_ms += s.round_trip_ms;
        }
        if count == 0 {
            return Self::default();
        }
        let n = count as f64;
        Self {
            samples: count,
            mean: StageSample {
                pre_ms: sum.pre_ms / n,
                queue_wait_ms: sum.queue_wait_ms / n,
                compute_ms: sum.compute_ms / n,
                delivery_ms: sum.delivery_ms / n,
                post_ms: sum.post_ms / n,
                round_trip_ms: sum.round_trip_ms / n,
            },
        }
    }
}
