use std::fmt;
use std::time::{Duration, Instant};

/// Moving-average window over the last `interval` frames
#[derive(Debug)]
pub struct PerformanceWindow {
    interval: u64,
    frame_count: u64,
    window_frames: u64,
    window_start: Instant,
    processing: Duration,
}

/// Averages over one completed window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceReport {
    pub frames_captured: u64,
    pub window_frames: u64,
    pub elapsed: Duration,
    pub processing: Duration,
}

impl PerformanceWindow {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            frame_count: 0,
            window_frames: 0,
            window_start: Instant::now(),
            processing: Duration::ZERO,
        }
    }

    pub fn record(&mut self, processing: Duration) -> Option<PerformanceReport> {
        self.record_at(Instant::now(), processing)
    }

    /// Count one frame finished at `now`; returns a report when the window fills.
    pub fn record_at(&mut self, now: Instant, processing: Duration) -> Option<PerformanceReport> {
        self.frame_count += 1;
        self.window_frames += 1;
        self.processing += processing;

        if self.frame_count % self.interval != 0 {
            return None;
        }

        let report = PerformanceReport {
            frames_captured: self.frame_count,
            window_frames: self.window_frames,
            elapsed: now.saturating_duration_since(self.window_start),
            processing: self.processing,
        };
        self.window_start = now;
        self.window_frames = 0;
        self.processing = Duration::ZERO;
        Some(report)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames accumulated in the current, not yet reported window.
    pub fn window_frames(&self) -> u64 {
        self.window_frames
    }
}

impl PerformanceReport {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.window_frames as f64 / secs
        } else {
            0.0
        }
    }

    pub fn avg_frame_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0 / self.window_frames.max(1) as f64
    }

    pub fn avg_processing_ms(&self) -> f64 {
        self.processing.as_secs_f64() * 1000.0 / self.window_frames.max(1) as f64
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frames captured: {:5}    Average FPS: {:9.1}    Average time per frame: {:9.2} ms    Average processing time: {:9.2} ms",
            self.frames_captured,
            self.fps(),
            self.avg_frame_ms(),
            self.avg_processing_ms()
        )
    }
}
