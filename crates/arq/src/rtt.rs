//! Round-trip time estimation.
//!
//! Smoothed RTT and RTT variation follow the usual EWMA weights
//! (1/8 and 1/4). The retransmission timeout adds the larger of the flush
//! interval and four variations to the smoothed RTT, since the peer may hold
//! an acknowledgment for up to one interval before flushing it.

/// RTT / RTO estimator working in integer milliseconds.
#[derive(Debug, Clone)]
pub(crate) struct RttEstimator {
    srtt: u32,
    rttvar: u32,
    rto: u32,
    min_rto: u32,
    max_rto: u32,
    interval: u32,
    samples: u64,
}

impl RttEstimator {
    pub(crate) fn new(initial_rto: u32, min_rto: u32, max_rto: u32, interval: u32) -> Self {
        Self {
            srtt: 0,
            rttvar: 0,
            rto: initial_rto.clamp(min_rto, max_rto),
            min_rto,
            max_rto,
            interval,
            samples: 0,
        }
    }

    /// Feeds one RTT sample taken from the first acknowledgment of a segment.
    pub(crate) fn on_sample(&mut self, rtt: u32) {
        if self.samples == 0 {
            self.srtt = rtt;
            self.rttvar = rtt / 2;
        } else {
            let delta = rtt.abs_diff(self.srtt);
            self.rttvar = ((3 * self.rttvar as u64 + delta as u64) / 4) as u32;
            self.srtt = (((7 * self.srtt as u64 + rtt as u64) / 8) as u32).max(1);
        }
        self.samples += 1;

        let rto = self
            .srtt
            .saturating_add(self.interval.max(self.rttvar.saturating_mul(4)));
        self.rto = rto.clamp(self.min_rto, self.max_rto);
    }

    pub(crate) fn rto(&self) -> u32 {
        self.rto
    }

    pub(crate) fn srtt(&self) -> u32 {
        self.srtt
    }

    pub(crate) fn rttvar(&self) -> u32 {
        self.rttvar
    }

    pub(crate) fn max_rto(&self) -> u32 {
        self.max_rto
    }

    pub(crate) fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn estimator() -> RttEstimator {
        RttEstimator::new(100, 100, 60_000, 100)
    }

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut rtt = estimator();
        rtt.on_sample(200);
        assert_eq!(rtt.srtt(), 200);
        assert_eq!(rtt.rttvar(), 100);
        // 200 + max(100, 4 * 100)
        assert_eq!(rtt.rto(), 600);
    }

    #[test]
    fn test_stable_samples_converge() {
        let mut rtt = estimator();
        for _ in 0..50 {
            rtt.on_sample(80);
        }
        assert_eq!(rtt.srtt(), 80);
        assert!(rtt.rttvar() <= 1);
        // Variance collapses, so the interval term dominates.
        assert_eq!(rtt.rto(), 180);
    }

    #[test]
    fn test_rto_floor() {
        let mut rtt = RttEstimator::new(100, 100, 60_000, 10);
        for _ in 0..50 {
            rtt.on_sample(5);
        }
        assert_eq!(rtt.rto(), 100);
    }

    #[test]
    fn test_rto_ceiling() {
        let mut rtt = RttEstimator::new(100, 100, 1_000, 100);
        rtt.on_sample(5_000);
        assert_eq!(rtt.rto(), 1_000);
    }

    #[test]
    fn test_initial_rto_is_clamped() {
        let rtt = RttEstimator::new(10, 30, 60_000, 100);
        assert_eq!(rtt.rto(), 30);
    }

    proptest! {
        #[test]
        fn rto_always_within_bounds(samples in proptest::collection::vec(0u32..200_000, 1..64)) {
            let mut rtt = RttEstimator::new(100, 30, 60_000, 100);
            for sample in samples {
                rtt.on_sample(sample);
                prop_assert!(rtt.rto() >= 30 && rtt.rto() <= 60_000);
            }
        }
    }
}
