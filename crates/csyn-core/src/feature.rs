//! Descriptor data model: Ranges, Partitions, AnalysisTargets, and the
//! feature-vector layout shared by the corpus index and the live analysis
//! window.

use serde::{Deserialize, Serialize};

use crate::error::{CsynError, CsynResult};

/// `{minimum, mean, maximum}` for one scalar feature, loaded once from the
/// corpus statistics and never mutated afterward.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Range {
    pub minimum: f64,
    pub mean: f64,
    pub maximum: f64,
}

impl Range {
    /// Min-max scale `value` into this range. Intentionally unclipped: a
    /// live value outside the corpus range is allowed to exceed [0, 1].
    pub fn scale(&self, value: f64) -> f64 {
        (value - self.minimum) / (self.maximum - self.minimum)
    }
}

/// Per-feature [`Range`]s for the features the index normalises over.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RangeSet {
    pub centroid: Range,
    pub f0: Range,
    pub flatness: Range,
    pub rms: Range,
    pub rolloff: Range,
}

/// Which feature groups contribute to a [`FeatureVector`], and how many
/// MFCC coefficients to take when the mfcc group is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSubset {
    pub use_pitch: bool,
    pub use_spectral: bool,
    pub use_mfcc: bool,
    pub mfcc_count: usize,
}

impl FeatureSubset {
    /// D = (use_pitch?1:0) + (use_spectral?4:0) + (use_mfcc?mfcc_count:0)
    pub fn dimension(&self) -> usize {
        (self.use_pitch as usize)
            + (self.use_spectral as usize) * 4
            + if self.use_mfcc { self.mfcc_count } else { 0 }
    }

    pub fn validate(&self) -> CsynResult<()> {
        if !(self.use_pitch || self.use_spectral || self.use_mfcc) {
            return Err(CsynError::Config(
                "at least one of use_pitch, use_spectral, use_mfcc must be enabled".into(),
            ));
        }
        Ok(())
    }
}

/// A feature-bearing record: anything with the scalar descriptors shared by
/// [`Partition`] and [`AnalysisTarget`]. Used so [`build_feature_vector`]
/// takes a single borrowed view regardless of which side produced it.
pub struct Descriptors<'a> {
    pub centroid: f64,
    pub f0: f64,
    pub flatness: f64,
    pub is_voiced: bool,
    pub rms: f64,
    pub rolloff: f64,
    pub mfcc: &'a [f64],
}

/// Build the feature vector for a descriptor under the active subset
/// switches. The corpus index and live queries call this with the same
/// `subset`/`range_set`, which is what keeps their layouts identical.
pub fn build_feature_vector(
    subset: &FeatureSubset,
    range_set: &RangeSet,
    d: Descriptors,
) -> Vec<f64> {
    let mut point = Vec::with_capacity(subset.dimension());
    if subset.use_pitch {
        point.push(if d.is_voiced {
            range_set.f0.scale(d.f0)
        } else {
            -1.0
        });
    }
    if subset.use_spectral {
        point.push(range_set.centroid.scale(d.centroid));
        point.push(range_set.flatness.scale(d.flatness));
        point.push(d.rms); // left in dB space, deliberately unscaled
        point.push(range_set.rolloff.scale(d.rolloff));
    }
    if subset.use_mfcc {
        point.extend(d.mfcc.iter().take(subset.mfcc_count).copied());
    }
    point
}

/// One instant of live perceptual analysis, as pushed by the DSP server's
/// `/analysis` stream. Transient — consumed by the analysis window and
/// discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub peak: f64,
    pub rms: f64,
    /// MIDI note number; -1.0 sentinel when unvoiced.
    pub f0: f64,
    pub is_voiced: bool,
    pub is_onset: bool,
    pub centroid: f64,
    pub flatness: f64,
    pub rolloff: f64,
    pub mfcc: Vec<f64>,
}

/// A pre-analysed segment of a corpus audio file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Partition {
    pub path: String,
    #[serde(rename = "start_frame")]
    pub starting_frame: u64,
    pub frame_count: u64,
    pub digest: String,
    pub centroid: f64,
    pub f0: f64,
    pub flatness: f64,
    pub is_voiced: bool,
    pub mfcc: Vec<f64>,
    pub rms: f64,
    pub rolloff: f64,
}

impl Partition {
    pub fn descriptors(&self) -> Descriptors<'_> {
        Descriptors {
            centroid: self.centroid,
            f0: self.f0,
            flatness: self.flatness,
            is_voiced: self.is_voiced,
            rms: self.rms,
            rolloff: self.rolloff,
            mfcc: &self.mfcc,
        }
    }
}

/// The aggregated query target produced by the analysis window from the
/// last N live [`FeatureFrame`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTarget {
    pub pattern_flavor: PatternFlavor,
    pub peak: f64,
    pub rms: f64,
    pub f0: f64,
    pub is_voiced: bool,
    pub is_onset: f64,
    pub centroid: f64,
    pub flatness: f64,
    pub rolloff: f64,
    pub mfcc: Vec<f64>,
    pub k: usize,
}

impl AnalysisTarget {
    pub fn descriptors(&self) -> Descriptors<'_> {
        Descriptors {
            centroid: self.centroid,
            f0: self.f0,
            flatness: self.flatness,
            is_voiced: self.is_voiced,
            rms: self.rms,
            rolloff: self.rolloff,
            mfcc: &self.mfcc,
        }
    }
}

/// The kind of synthesis applied to a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternFlavor {
    Basic,
    Granulate,
    Warp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_range_set() -> RangeSet {
        RangeSet {
            centroid: Range { minimum: 0.0, mean: 1000.0, maximum: 2000.0 },
            f0: Range { minimum: 40.0, mean: 60.0, maximum: 80.0 },
            flatness: Range { minimum: 0.0, mean: 0.5, maximum: 1.0 },
            rms: Range { minimum: -60.0, mean: -20.0, maximum: 0.0 },
            rolloff: Range { minimum: 0.0, mean: 5000.0, maximum: 10000.0 },
        }
    }

    #[test]
    fn dimension_matches_active_subsets() {
        let subset = FeatureSubset { use_pitch: true, use_spectral: true, use_mfcc: true, mfcc_count: 13 };
        assert_eq!(subset.dimension(), 1 + 4 + 13);

        let subset = FeatureSubset { use_pitch: false, use_spectral: true, use_mfcc: false, mfcc_count: 13 };
        assert_eq!(subset.dimension(), 4);
    }

    #[test]
    fn rejects_all_flags_off() {
        let subset = FeatureSubset { use_pitch: false, use_spectral: false, use_mfcc: false, mfcc_count: 13 };
        assert!(subset.validate().is_err());
    }

    #[test]
    fn feature_vector_length_matches_dimension() {
        let subset = FeatureSubset { use_pitch: true, use_spectral: true, use_mfcc: true, mfcc_count: 4 };
        let range_set = sample_range_set();
        let mfcc = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        let vector = build_feature_vector(
            &subset,
            &range_set,
            Descriptors { centroid: 1000.0, f0: 60.0, flatness: 0.5, is_voiced: true, rms: -20.0, rolloff: 5000.0, mfcc: &mfcc },
        );
        assert_eq!(vector.len(), subset.dimension());
        // mfcc is truncated to mfcc_count, taken verbatim (not normalised)
        assert_eq!(&vector[5..], &[0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn unvoiced_pitch_collapses_to_sentinel() {
        let subset = FeatureSubset { use_pitch: true, use_spectral: false, use_mfcc: false, mfcc_count: 0 };
        let range_set = sample_range_set();
        let vector = build_feature_vector(
            &subset,
            &range_set,
            Descriptors { centroid: 0.0, f0: 999.0, flatness: 0.0, is_voiced: false, rms: 0.0, rolloff: 0.0, mfcc: &[] },
        );
        assert_relative_eq!(vector[0], -1.0);
    }

    #[test]
    fn rms_is_not_min_max_scaled() {
        let subset = FeatureSubset { use_pitch: false, use_spectral: true, use_mfcc: false, mfcc_count: 0 };
        let range_set = sample_range_set();
        let vector = build_feature_vector(
            &subset,
            &range_set,
            Descriptors { centroid: 1000.0, f0: 0.0, flatness: 0.5, is_voiced: true, rms: -45.5, rolloff: 5000.0, mfcc: &[] },
        );
        // layout: [scale(centroid), scale(flatness), rms_raw, scale(rolloff)]
        assert_relative_eq!(vector[2], -45.5);
    }
}
