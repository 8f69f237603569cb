// Libriforge - DRM-free audiobook conversion pipeline
// Copyright (C) 2025 Libriforge contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Throughput estimation and progress events for the transcode step.
//!
//! The decrypt/transcode reports how far into the source audio it has
//! processed. [`RateEstimator`] turns those position reports into a
//! smoothed rate in book-seconds per wall-second: it keeps the most
//! recent 15 samples and takes the harmonic mean of the instantaneous
//! rate between each consecutive pair. The harmonic mean is weighted
//! toward the slowest intervals, so one fast burst cannot collapse the
//! ETA; the estimate stays conservative and stable.
//!
//! [`ProgressReporter`] layers the always-available percent-complete
//! figure on top and pushes both onto a bounded channel with
//! drop-on-full delivery, so a slow consumer can never backpressure
//! the progress-reading loop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// Number of retained progress samples.
const MAX_SAMPLES: usize = 15;

/// Capacity of the progress event channel.
const EVENT_QUEUE_DEPTH: usize = 32;

/// Progress event delivered to the pipeline's consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Integer percent of the source processed, 0..=100. Emitted on
    /// every sample.
    PercentComplete(u8),

    /// Estimated wall-clock time remaining. Emitted only when the
    /// smoothed rate is well defined.
    TimeRemaining(Duration),
}

#[derive(Debug, Clone, Copy)]
struct ProgressSample {
    /// Duration into the source audio processed so far.
    position: Duration,

    /// Wall-clock time the sample arrived.
    at: Instant,
}

/// Harmonic-mean throughput estimator over a bounded sample window.
#[derive(Debug)]
pub struct RateEstimator {
    samples: VecDeque<ProgressSample>,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_SAMPLES + 1),
        }
    }

    /// Record a sample stamped with the current wall clock and return
    /// the smoothed rate, if one is defined.
    pub fn add_sample(&mut self, position: Duration) -> Option<f64> {
        self.add_sample_at(position, Instant::now())
    }

    /// Record a sample with an explicit timestamp.
    ///
    /// Returns the harmonic mean of per-pair rates across the retained
    /// window, in book-seconds per wall-second. `None` while fewer
    /// than two samples are held, or when the mean comes out
    /// non-finite or non-positive (stalled or clock-skewed input).
    pub fn add_sample_at(&mut self, position: Duration, at: Instant) -> Option<f64> {
        self.samples.push_back(ProgressSample { position, at });
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }

        if self.samples.len() < 2 {
            return None;
        }

        // Harmonic mean: pairs / sum(dt/dp). A stalled pair (dp = 0)
        // drives the sum to infinity and the mean to zero, which the
        // finite/positive check below rejects.
        let mut denominator = 0.0f64;
        let mut pairs = 0u32;
        let mut iter = self.samples.iter();
        let mut prev = iter.next().copied();
        for next in iter {
            if let Some(p) = prev {
                let dp = next.position.saturating_sub(p.position).as_secs_f64();
                let dt = next.at.duration_since(p.at).as_secs_f64();
                denominator += dt / dp;
                pairs += 1;
            }
            prev = Some(*next);
        }

        let mean = f64::from(pairs) / denominator;
        (mean.is_finite() && mean > 0.0).then_some(mean)
    }

    /// Number of samples currently retained.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts processed-position reports into [`ProgressEvent`]s.
#[derive(Debug)]
pub struct ProgressReporter {
    estimator: RateEstimator,
    total_duration: Duration,
    sender: mpsc::Sender<ProgressEvent>,
}

impl ProgressReporter {
    /// Create a reporter for a book of `total_duration`, returning the
    /// receiving end of the bounded event channel.
    pub fn new(total_duration: Duration) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(EVENT_QUEUE_DEPTH);
        (
            Self {
                estimator: RateEstimator::new(),
                total_duration,
                sender,
            },
            receiver,
        )
    }

    /// Feed one processed-position report.
    pub fn report(&mut self, position: Duration) {
        self.report_at(position, Instant::now());
    }

    pub(crate) fn report_at(&mut self, position: Duration, at: Instant) {
        let rate = self.estimator.add_sample_at(position, at);

        if let Some(rate) = rate {
            let remaining = self.total_duration.saturating_sub(position).as_secs_f64() / rate;
            // A crawling rate against a huge total can push the ETA
            // past what Duration can hold; suppress it like an
            // undefined rate rather than emit nonsense.
            if let Ok(remaining) = Duration::try_from_secs_f64(remaining) {
                self.send(ProgressEvent::TimeRemaining(remaining));
            }
        }

        self.send(ProgressEvent::PercentComplete(self.percent(position)));
    }

    /// Emit a bare percent event outside the sample stream (e.g. the
    /// reset to zero after the transcode finishes).
    pub fn report_percent(&mut self, percent: u8) {
        self.send(ProgressEvent::PercentComplete(percent.min(100)));
    }

    fn percent(&self, position: Duration) -> u8 {
        if self.total_duration.is_zero() {
            return 0;
        }
        let pct = 100.0 * position.as_secs_f64() / self.total_duration.as_secs_f64();
        pct.clamp(0.0, 100.0) as u8
    }

    fn send(&self, event: ProgressEvent) {
        // Never block the delivering path; a full queue drops the
        // event, the next sample supersedes it anyway.
        if self.sender.try_send(event).is_err() {
            debug!(?event, "progress queue full, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Instant {
        Instant::now()
    }

    #[test]
    fn test_single_sample_has_no_rate() {
        let mut est = RateEstimator::new();
        assert_eq!(est.add_sample_at(Duration::from_secs(10), base()), None);
    }

    #[test]
    fn test_constant_realtime_pace_is_exactly_one() {
        let mut est = RateEstimator::new();
        let t0 = base();
        let mut rate = None;
        for s in [0u64, 10, 20, 30] {
            rate = est.add_sample_at(Duration::from_secs(s), t0 + Duration::from_secs(s));
        }
        assert_eq!(rate, Some(1.0));
    }

    #[test]
    fn test_harmonic_mean_dominated_by_slow_interval() {
        let mut est = RateEstimator::new();
        let t0 = base();
        // 10 book-seconds in 1 wall-second, then 10 in 10: rates 10 and 1.
        est.add_sample_at(Duration::from_secs(0), t0);
        est.add_sample_at(Duration::from_secs(10), t0 + Duration::from_secs(1));
        let rate = est
            .add_sample_at(Duration::from_secs(20), t0 + Duration::from_secs(11))
            .unwrap();
        // Harmonic mean 2/(1/10 + 1/1) ≈ 1.818, well below the
        // arithmetic mean of 5.5.
        assert!((rate - 2.0 / 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_stalled_stream_suppresses_rate() {
        let mut est = RateEstimator::new();
        let t0 = base();
        est.add_sample_at(Duration::from_secs(10), t0);
        // Same position again: dp = 0, the pair rate is infinite on
        // the denominator side and the mean collapses to zero.
        assert_eq!(
            est.add_sample_at(Duration::from_secs(10), t0 + Duration::from_secs(1)),
            None
        );
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut est = RateEstimator::new();
        let t0 = base();
        for s in 0..40u64 {
            est.add_sample_at(Duration::from_secs(s), t0 + Duration::from_secs(s));
        }
        assert_eq!(est.sample_count(), 15);
    }

    #[tokio::test]
    async fn test_reporter_percent_without_rate() {
        let (mut reporter, mut rx) = ProgressReporter::new(Duration::from_secs(3600));
        reporter.report_at(Duration::from_secs(900), base());

        // One sample: a percent event and nothing else.
        assert_eq!(rx.try_recv(), Ok(ProgressEvent::PercentComplete(25)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reporter_emits_eta_once_rate_defined() {
        let (mut reporter, mut rx) = ProgressReporter::new(Duration::from_secs(100));
        let t0 = base();
        reporter.report_at(Duration::from_secs(0), t0);
        reporter.report_at(Duration::from_secs(50), t0 + Duration::from_secs(25));

        assert_eq!(rx.try_recv(), Ok(ProgressEvent::PercentComplete(0)));
        // 50 book-seconds left at 2.0 book-seconds/second = 25s.
        assert_eq!(
            rx.try_recv(),
            Ok(ProgressEvent::TimeRemaining(Duration::from_secs(25)))
        );
        assert_eq!(rx.try_recv(), Ok(ProgressEvent::PercentComplete(50)));
    }

    #[tokio::test]
    async fn test_astronomical_eta_suppressed() {
        // 1 ns of audio in 100 wall-seconds against a Duration::MAX
        // book: the rate is defined but the ETA overflows Duration.
        // Only the percent events may come through.
        let (mut reporter, mut rx) = ProgressReporter::new(Duration::MAX);
        let t0 = base();
        reporter.report_at(Duration::ZERO, t0);
        reporter.report_at(Duration::from_nanos(1), t0 + Duration::from_secs(100));

        assert_eq!(rx.try_recv(), Ok(ProgressEvent::PercentComplete(0)));
        assert_eq!(rx.try_recv(), Ok(ProgressEvent::PercentComplete(0)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (mut reporter, _rx) = ProgressReporter::new(Duration::from_secs(100));
        for _ in 0..200 {
            reporter.report_percent(50);
        }
        // Reaching here without deadlock is the assertion.
    }

    #[tokio::test]
    async fn test_zero_total_duration_reports_zero_percent() {
        let (mut reporter, mut rx) = ProgressReporter::new(Duration::ZERO);
        reporter.report_at(Duration::from_secs(5), base());
        assert_eq!(rx.try_recv(), Ok(ProgressEvent::PercentComplete(0)));
    }
}
