//! Analysis window (C2): a fixed-capacity ring buffer over live
//! [`FeatureFrame`]s that aggregates into an [`AnalysisTarget`] once full.

use csyn_core::{AnalysisTarget, FeatureFrame, PatternFlavor};

const DEFAULT_K: usize = 25;
const DEFAULT_MIN_SLEEP: f64 = 0.0;
const DEFAULT_MAX_SLEEP: f64 = 1.0;

/// Rolling window of the last `capacity` [`FeatureFrame`]s.
pub struct AnalysisWindow {
    capacity: usize,
    frames: Vec<Option<FeatureFrame>>,
    index: usize,
    filled: usize,
    k: usize,
    min_sleep: f64,
    max_sleep: f64,
}

impl AnalysisWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "analysis window capacity must be positive");
        Self {
            capacity,
            frames: vec![None; capacity],
            index: 0,
            filled: 0,
            k: DEFAULT_K,
            min_sleep: DEFAULT_MIN_SLEEP,
            max_sleep: DEFAULT_MAX_SLEEP,
        }
    }

    pub fn with_polling_bounds(mut self, min_sleep: f64, max_sleep: f64) -> Self {
        self.min_sleep = min_sleep;
        self.max_sleep = max_sleep;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write `frame` at `index % capacity` and advance.
    pub fn intake(&mut self, frame: FeatureFrame) {
        let slot = self.index % self.capacity;
        self.frames[slot] = Some(frame);
        self.index += 1;
        self.filled = self.filled.saturating_add(1).min(self.capacity);
    }

    /// `None` until the window has been filled at least once; thereafter
    /// the aggregated target plus the caller's next polling-delay bounds.
    pub fn emit(&self) -> (Option<AnalysisTarget>, f64, f64) {
        if self.filled < self.capacity {
            return (None, self.min_sleep, self.max_sleep);
        }

        let frames: Vec<&FeatureFrame> = self.frames.iter().filter_map(|f| f.as_ref()).collect();
        let n = frames.len() as f64;

        let peak = frames.iter().map(|f| f.peak).sum::<f64>() / n;
        let rms = frames.iter().map(|f| f.rms).sum::<f64>() / n;
        let centroid = frames.iter().map(|f| f.centroid).sum::<f64>() / n;
        let flatness = frames.iter().map(|f| f.flatness).sum::<f64>() / n;
        let rolloff = frames.iter().map(|f| f.rolloff).sum::<f64>() / n;
        let is_onset = frames
            .iter()
            .map(|f| if f.is_onset { 1.0 } else { 0.0 })
            .sum::<f64>()
            / n;

        let is_voiced = majority_voiced(&frames);

        let voiced_f0: Vec<f64> = frames
            .iter()
            .filter(|f| f.is_voiced)
            .map(|f| f.f0)
            .collect();
        let f0 = if voiced_f0.is_empty() {
            -1.0
        } else {
            voiced_f0.iter().sum::<f64>() / voiced_f0.len() as f64
        };

        let mfcc_len = frames.first().map(|f| f.mfcc.len()).unwrap_or(0);
        let mut mfcc = vec![0.0; mfcc_len];
        for frame in &frames {
            for (i, value) in frame.mfcc.iter().enumerate().take(mfcc_len) {
                mfcc[i] += value;
            }
        }
        for value in &mut mfcc {
            *value /= n;
        }

        let target = AnalysisTarget {
            pattern_flavor: PatternFlavor::Basic,
            peak,
            rms,
            f0,
            is_voiced,
            is_onset,
            centroid,
            flatness,
            rolloff,
            mfcc,
            k: self.k,
        };

        (Some(target), self.min_sleep, self.max_sleep)
    }
}

fn majority_voiced(frames: &[&FeatureFrame]) -> bool {
    let mut votes: Vec<f64> = frames
        .iter()
        .map(|f| if f.is_voiced { 1.0 } else { 0.0 })
        .collect();
    votes.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = votes.len();
    let median = if n % 2 == 1 {
        votes[n / 2]
    } else {
        (votes[n / 2 - 1] + votes[n / 2]) / 2.0
    };
    median >= 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(is_voiced: bool, f0: f64) -> FeatureFrame {
        FeatureFrame {
            peak: 0.5,
            rms: -20.0,
            f0,
            is_voiced,
            is_onset: false,
            centroid: 1000.0,
            flatness: 0.1,
            rolloff: 5000.0,
            mfcc: vec![0.1, 0.2],
        }
    }

    #[test]
    fn emits_none_before_n_intakes_and_non_none_at_n() {
        let mut window = AnalysisWindow::new(3);
        assert!(window.emit().0.is_none());
        window.intake(frame(true, 60.0));
        assert!(window.emit().0.is_none());
        window.intake(frame(true, 62.0));
        assert!(window.emit().0.is_none());
        window.intake(frame(true, 64.0));
        assert!(window.emit().0.is_some());
    }

    #[test]
    fn aggregates_means_over_the_window() {
        let mut window = AnalysisWindow::new(2);
        window.intake(frame(true, 60.0));
        window.intake(frame(true, 64.0));
        let (target, min_sleep, max_sleep) = window.emit();
        let target = target.unwrap();
        assert_eq!(target.f0, 62.0);
        assert_eq!(target.k, 25);
        assert_eq!(target.pattern_flavor, PatternFlavor::Basic);
        assert_eq!((min_sleep, max_sleep), (0.0, 1.0));
    }

    #[test]
    fn f0_ignores_unvoiced_frames() {
        let mut window = AnalysisWindow::new(2);
        window.intake(frame(false, 999.0));
        window.intake(frame(true, 60.0));
        let (target, ..) = window.emit();
        assert_eq!(target.unwrap().f0, 60.0);
    }

    #[test]
    fn f0_is_sentinel_when_window_entirely_unvoiced() {
        let mut window = AnalysisWindow::new(2);
        window.intake(frame(false, 999.0));
        window.intake(frame(false, 999.0));
        let (target, ..) = window.emit();
        assert_eq!(target.unwrap().f0, -1.0);
    }

    #[test]
    fn is_voiced_follows_window_median() {
        let mut window = AnalysisWindow::new(3);
        window.intake(frame(true, 60.0));
        window.intake(frame(true, 62.0));
        window.intake(frame(false, 0.0));
        let (target, ..) = window.emit();
        assert!(target.unwrap().is_voiced);
    }

    #[test]
    fn ring_buffer_wraps_and_keeps_only_last_n() {
        let mut window = AnalysisWindow::new(2);
        window.intake(frame(true, 10.0));
        window.intake(frame(true, 20.0));
        window.intake(frame(true, 30.0)); // overwrites the first frame
        let (target, ..) = window.emit();
        assert_eq!(target.unwrap().f0, 25.0);
    }

    #[test]
    fn custom_polling_bounds_are_reported() {
        let mut window = AnalysisWindow::new(1).with_polling_bounds(0.2, 0.8);
        window.intake(frame(true, 60.0));
        let (_, min_sleep, max_sleep) = window.emit();
        assert_eq!((min_sleep, max_sleep), (0.2, 0.8));
    }
}
