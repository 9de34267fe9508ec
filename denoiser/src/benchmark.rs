//! Frame timing collection.
//!
//! Stages record named GPU or CPU timings for a frame with
//! [`DeviceBenchmark::record`]. The samples are only folded into the
//! statistics once the orchestrator reports that the frame finished
//! executing on the device, so a sample never describes work that might
//! still be running.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Receives frame numbers once the device has confirmed their completion.
pub trait FrameObserver {
    fn frame_finished(&mut self, frame_number: u64);

    /// `frame_number` failed before its primary submission and will never finish.
    fn frame_abandoned(&mut self, _frame_number: u64) {}
}

/// Aggregated statistics of one timing label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TimingStats {
    fn new(sample: Duration) -> Self {
        Self {
            count: 1,
            total: sample,
            min: sample,
            max: sample,
        }
    }

    fn add(&mut self, sample: Duration) {
        self.count += 1;
        self.total += sample;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Timings of a single completed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTimings {
    pub frame_number: u64,
    pub samples: Vec<(String, Duration)>,
}

/// Summary over every completed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkLog {
    pub frames: u64,
    pub labels: BTreeMap<String, TimingStats>,
}

impl fmt::Display for BenchmarkLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} frames", self.frames)?;
        for (label, stats) in &self.labels {
            writeln!(
                f,
                "  {:<24} avg {:>10.3?}  min {:>10.3?}  max {:>10.3?}  ({} samples)",
                label,
                stats.average(),
                stats.min,
                stats.max,
                stats.count
            )?;
        }
        Ok(())
    }
}

/// Collects per-frame timings from stages.
#[derive(Debug, Default)]
pub struct DeviceBenchmark {
    pending: BTreeMap<u64, Vec<(String, Duration)>>,
    stats: BTreeMap<String, TimingStats>,
    latest: Option<FrameTimings>,
    finished_frames: u64,
}

/// Benchmark shared between the orchestrator and processing stages.
pub type SharedBenchmark = Arc<Mutex<DeviceBenchmark>>;

impl DeviceBenchmark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBenchmark {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Record a timing sample for a frame that may still be in flight.
    pub fn record(&mut self, frame_number: u64, label: impl Into<String>, duration: Duration) {
        self.pending
            .entry(frame_number)
            .or_default()
            .push((label.into(), duration));
    }

    /// Fold the samples of `frame_number` into the statistics.
    pub fn frame_finished(&mut self, frame_number: u64) {
        let samples = self.pending.remove(&frame_number).unwrap_or_default();
        for (label, duration) in &samples {
            self.stats
                .entry(label.clone())
                .and_modify(|stats| stats.add(*duration))
                .or_insert_with(|| TimingStats::new(*duration));
        }
        self.finished_frames += 1;
        self.latest = Some(FrameTimings {
            frame_number,
            samples,
        });
    }

    /// Drop the samples of a frame that never reached the device.
    pub fn frame_abandoned(&mut self, frame_number: u64) {
        self.pending.remove(&frame_number);
    }

    /// Timings of the most recently completed frame.
    pub fn latest_log(&self) -> Option<&FrameTimings> {
        self.latest.as_ref()
    }

    /// Number of frames reported finished.
    pub fn finished_frames(&self) -> u64 {
        self.finished_frames
    }

    /// Number of frames with samples waiting for completion.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    pub fn summary(&self) -> BenchmarkLog {
        BenchmarkLog {
            frames: self.finished_frames,
            labels: self.stats.clone(),
        }
    }

    /// Forget everything, e.g. after switching processing stages.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.stats.clear();
        self.latest = None;
        self.finished_frames = 0;
    }
}

/// Forwards frame completion to a [`SharedBenchmark`].
#[derive(Debug, Clone)]
pub struct BenchmarkObserver(pub SharedBenchmark);

impl FrameObserver for BenchmarkObserver {
    fn frame_finished(&mut self, frame_number: u64) {
        self.0.lock().frame_finished(frame_number);
    }

    fn frame_abandoned(&mut self, frame_number: u64) {
        self.0.lock().frame_abandoned(frame_number);
    }
}

/// Result of [`FrameTimer::analysis`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTimeAnalysis {
    pub count: usize,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl FrameTimeAnalysis {
    pub fn fps(&self) -> f64 {
        let secs = self.avg.as_secs_f64();
        if secs > 0.0 { 1.0 / secs } else { 0.0 }
    }
}

/// Rolling window of CPU frame times.
#[derive(Debug)]
pub struct FrameTimer {
    last: Option<Instant>,
    window: VecDeque<Duration>,
    capacity: usize,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            last: None,
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Mark a frame boundary at `now`.
    pub fn tick(&mut self, now: Instant) {
        if let Some(last) = self.last {
            self.push(now.saturating_duration_since(last));
        }
        self.last = Some(now);
    }

    /// Add a frame time directly.
    pub fn push(&mut self, frame_time: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(frame_time);
    }

    pub fn analysis(&self) -> Option<FrameTimeAnalysis> {
        let min = *self.window.iter().min()?;
        let max = *self.window.iter().max()?;
        let total: Duration = self.window.iter().sum();
        let count = self.window.len();
        Some(FrameTimeAnalysis {
            count,
            avg: total / count as u32,
            min,
            max,
        })
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(120)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_wait_for_completion() {
        let mut bench = DeviceBenchmark::new();
        bench.record(0, "denoise", Duration::from_millis(2));
        bench.record(1, "denoise", Duration::from_millis(4));
        assert_eq!(bench.pending_frames(), 2);
        assert!(bench.summary().labels.is_empty());

        bench.frame_finished(0);
        let summary = bench.summary();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.labels["denoise"].count, 1);
        assert_eq!(bench.latest_log().map(|log| log.frame_number), Some(0));

        bench.frame_finished(1);
        let stats = bench.summary().labels["denoise"];
        assert_eq!(stats.min, Duration::from_millis(2));
        assert_eq!(stats.max, Duration::from_millis(4));
        assert_eq!(stats.average(), Duration::from_millis(3));
    }

    #[test]
    fn test_frame_without_samples() {
        let mut bench = DeviceBenchmark::new();
        bench.frame_finished(7);
        assert_eq!(bench.finished_frames(), 1);
        assert!(bench.latest_log().is_some_and(|log| log.samples.is_empty()));
    }

    #[test]
    fn test_abandoned_frame_drops_samples() {
        let mut bench = DeviceBenchmark::new();
        bench.record(3, "denoise", Duration::from_millis(2));
        bench.record(4, "denoise", Duration::from_millis(4));

        bench.frame_abandoned(3);
        assert_eq!(bench.pending_frames(), 1);
        assert_eq!(bench.finished_frames(), 0);

        bench.frame_finished(4);
        assert_eq!(bench.summary().labels["denoise"].count, 1);
    }

    #[test]
    fn test_observer_forwards() {
        let shared = DeviceBenchmark::shared();
        let mut observer = BenchmarkObserver(Arc::clone(&shared));
        shared.lock().record(3, "copy", Duration::from_micros(10));
        observer.frame_finished(3);
        assert_eq!(shared.lock().finished_frames(), 1);

        shared.lock().reset();
        assert_eq!(shared.lock().finished_frames(), 0);
    }

    #[test]
    fn test_frame_timer_window() {
        let mut timer = FrameTimer::new(2);
        assert!(timer.analysis().is_none());

        timer.push(Duration::from_millis(10));
        timer.push(Duration::from_millis(20));
        timer.push(Duration::from_millis(30));

        let analysis = timer.analysis().unwrap();
        assert_eq!(analysis.count, 2);
        assert_eq!(analysis.min, Duration::from_millis(20));
        assert_eq!(analysis.avg, Duration::from_millis(25));
        assert!((analysis.fps() - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_timer_tick() {
        let mut timer = FrameTimer::default();
        let start = Instant::now();
        timer.tick(start);
        timer.tick(start + Duration::from_millis(16));
        assert_eq!(timer.analysis().unwrap().max, Duration::from_millis(16));
    }
}
