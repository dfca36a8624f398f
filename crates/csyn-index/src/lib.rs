//! Descriptor index (C1): loads the corpus JSON, normalises it into a
//! static kd-tree, and answers k-nearest-neighbour queries against live
//! analysis targets.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use kdtree::distance::squared_euclidean;
use kdtree::KdTree;
use serde::Deserialize;

use csyn_core::{
    build_feature_vector, AnalysisTarget, CsynError, CsynResult, Descriptors, EngineConfig,
    FeatureSubset, Partition, Range, RangeSet,
};

#[derive(Debug, Deserialize)]
struct CorpusFile {
    partitions: Vec<Partition>,
    statistics: HashMap<String, Range>,
}

fn range_for(stats: &HashMap<String, Range>, feature: &str) -> CsynResult<Range> {
    stats
        .get(feature)
        .copied()
        .ok_or_else(|| CsynError::Config(format!("missing statistics.{feature}")))
}

/// Static kd-tree over normalised corpus descriptors. Immutable after
/// construction; `query` never mutates it.
pub struct DescriptorIndex {
    entries: Vec<Partition>,
    tree: KdTree<f64, usize, Vec<f64>>,
    range_set: RangeSet,
    subset: FeatureSubset,
    root_path: PathBuf,
}

impl DescriptorIndex {
    /// Load and index the corpus named by `config.analysis_path`.
    ///
    /// Fails with [`CsynError::Parse`] on malformed JSON, [`CsynError::Config`]
    /// on missing statistics or an empty corpus, and [`CsynError::Invariant`]
    /// if a built feature vector's dimension disagrees with the configured
    /// subset.
    pub fn load(config: &EngineConfig) -> CsynResult<Self> {
        let subset = config.feature_subset();
        subset.validate()?;

        let started = Instant::now();
        log::info!("loading corpus from {} ...", config.analysis_path.display());
        let text = std::fs::read_to_string(&config.analysis_path)?;
        let corpus: CorpusFile =
            serde_json::from_str(&text).map_err(|e| CsynError::Parse(e.to_string()))?;

        if corpus.partitions.is_empty() {
            return Err(CsynError::Config("corpus has no partitions".into()));
        }

        let range_set = RangeSet {
            centroid: range_for(&corpus.statistics, "centroid")?,
            f0: range_for(&corpus.statistics, "f0")?,
            flatness: range_for(&corpus.statistics, "flatness")?,
            rms: range_for(&corpus.statistics, "rms")?,
            rolloff: range_for(&corpus.statistics, "rolloff")?,
        };

        let dims = subset.dimension();
        let mut tree = KdTree::new(dims);
        for (index, partition) in corpus.partitions.iter().enumerate() {
            let point = build_feature_vector(&subset, &range_set, partition.descriptors());
            if point.len() != dims {
                return Err(CsynError::Invariant(format!(
                    "partition {} produced a {}-dim vector, expected {dims}",
                    partition.digest,
                    point.len()
                )));
            }
            tree.add(point, index)
                .map_err(|e| CsynError::Invariant(format!("kd-tree insert failed: {e:?}")))?;
        }

        log::info!(
            "... loaded {} partitions in {:.4}s",
            corpus.partitions.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(Self {
            entries: corpus.partitions,
            tree,
            range_set,
            subset,
            root_path: config.root_path(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root_path(&self) -> &PathBuf {
        &self.root_path
    }

    /// k nearest entries by Euclidean distance, ascending, ties broken by
    /// insertion order. `k` is clamped to `[1, entries.len()]`. Distances
    /// are rounded to 6 decimal places.
    pub fn query(&self, descriptors: Descriptors<'_>, k: usize) -> Vec<(Partition, f64)> {
        let point = build_feature_vector(&self.subset, &self.range_set, descriptors);
        let k = k.clamp(1, self.entries.len());

        let mut hits = self
            .tree
            .nearest(&point, k, &squared_euclidean)
            .unwrap_or_default();
        // kdtree doesn't document tie ordering; re-sort stably by
        // (distance, original insertion index) to satisfy I1's ordering
        // guarantee under ties.
        hits.sort_by(|(dist_a, idx_a), (dist_b, idx_b)| {
            dist_a
                .partial_cmp(dist_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| idx_a.cmp(idx_b))
        });

        hits.into_iter()
            .map(|(squared_distance, &index)| {
                let distance = (squared_distance.max(0.0).sqrt() * 1e6).round() / 1e6;
                (self.entries[index].clone(), distance)
            })
            .collect()
    }

    pub fn query_target(&self, target: &AnalysisTarget) -> Vec<(Partition, f64)> {
        self.query(target.descriptors(), target.k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csyn_core::PatternFlavor;

    fn write_corpus(partitions_json: &str) -> tempfile_path::TempJson {
        tempfile_path::TempJson::new(format!(
            r#"{{
                "partitions": [{partitions_json}],
                "statistics": {{
                    "centroid": {{"minimum": 0.0, "mean": 1000.0, "maximum": 2000.0}},
                    "f0": {{"minimum": 40.0, "mean": 60.0, "maximum": 80.0}},
                    "flatness": {{"minimum": 0.0, "mean": 0.5, "maximum": 1.0}},
                    "rms": {{"minimum": -60.0, "mean": -20.0, "maximum": 0.0}},
                    "rolloff": {{"minimum": 0.0, "mean": 5000.0, "maximum": 10000.0}}
                }}
            }}"#
        ))
    }

    // Minimal scratch-file helper: writes to a temp path and cleans up on drop,
    // so tests don't need a tempfile crate dependency for one JSON file.
    mod tempfile_path {
        use std::path::PathBuf;

        pub struct TempJson {
            pub path: PathBuf,
        }

        impl TempJson {
            pub fn new(contents: String) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "csyn-index-test-{}-{}.json",
                    std::process::id(),
                    super::super::tests::next_id()
                ));
                let mut file = std::fs::File::create(&path).unwrap();
                use std::io::Write;
                file.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }

        impl Drop for TempJson {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    fn next_id() -> u64 {
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    fn config_for(path: PathBuf) -> EngineConfig {
        let mut config = EngineConfig::new(path);
        config.use_pitch = true;
        config.use_spectral = true;
        config.use_mfcc = true;
        config.mfcc_count = 2;
        config
    }

    fn mfcc_literal(a: f64, b: f64) -> String {
        format!("[{a}, {b}]")
    }

    #[test]
    fn self_match_returns_zero_distance() {
        let partition = format!(
            r#"{{"path": "audio-a.wav", "digest": "A", "start_frame": 0, "frame_count": 44544,
                "centroid": 1000.0, "f0": 60.0, "flatness": 0.1, "is_voiced": true,
                "mfcc": {}, "rms": -20.0, "rolloff": 5000.0}}"#,
            mfcc_literal(0.1, 0.2)
        );
        let temp = write_corpus(&partition);
        let config = config_for(temp.path.clone());
        let index = DescriptorIndex::load(&config).unwrap();

        let descriptors = Descriptors {
            centroid: 1000.0,
            f0: 60.0,
            flatness: 0.1,
            is_voiced: true,
            rms: -20.0,
            rolloff: 5000.0,
            mfcc: &[0.1, 0.2],
        };
        let hits = index.query(descriptors, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.digest, "A");
        assert!(hits[0].1 <= 1e-6);
    }

    #[test]
    fn k_is_clamped_to_corpus_size() {
        let a = format!(
            r#"{{"path": "a.wav", "digest": "A", "start_frame": 0, "frame_count": 100,
                "centroid": 1000.0, "f0": 60.0, "flatness": 0.1, "is_voiced": true,
                "mfcc": {}, "rms": -20.0, "rolloff": 5000.0}}"#,
            mfcc_literal(0.1, 0.2)
        );
        let temp = write_corpus(&a);
        let config = config_for(temp.path.clone());
        let index = DescriptorIndex::load(&config).unwrap();
        let descriptors = Descriptors {
            centroid: 1000.0,
            f0: 60.0,
            flatness: 0.1,
            is_voiced: true,
            rms: -20.0,
            rolloff: 5000.0,
            mfcc: &[0.1, 0.2],
        };
        assert_eq!(index.query(descriptors, 50).len(), 1);
    }

    #[test]
    fn empty_corpus_is_a_config_error() {
        let temp = write_corpus("");
        // empty partitions array with trailing comma issue avoided by
        // hand-writing the empty-array corpus directly.
        std::fs::write(
            &temp.path,
            r#"{"partitions": [], "statistics": {
                "centroid": {"minimum": 0.0, "mean": 0.0, "maximum": 1.0},
                "f0": {"minimum": 0.0, "mean": 0.0, "maximum": 1.0},
                "flatness": {"minimum": 0.0, "mean": 0.0, "maximum": 1.0},
                "rms": {"minimum": 0.0, "mean": 0.0, "maximum": 1.0},
                "rolloff": {"minimum": 0.0, "mean": 0.0, "maximum": 1.0}
            }}"#,
        )
        .unwrap();
        let config = config_for(temp.path.clone());
        assert!(matches!(
            DescriptorIndex::load(&config),
            Err(CsynError::Config(_))
        ));
    }

    #[test]
    fn at_least_one_subset_flag_required() {
        let a = format!(
            r#"{{"path": "a.wav", "digest": "A", "start_frame": 0, "frame_count": 100,
                "centroid": 1000.0, "f0": 60.0, "flatness": 0.1, "is_voiced": true,
                "mfcc": {}, "rms": -20.0, "rolloff": 5000.0}}"#,
            mfcc_literal(0.1, 0.2)
        );
        let temp = write_corpus(&a);
        let mut config = config_for(temp.path.clone());
        config.use_pitch = false;
        config.use_spectral = false;
        config.use_mfcc = false;
        assert!(matches!(
            DescriptorIndex::load(&config),
            Err(CsynError::Config(_))
        ));
    }

    #[allow(dead_code)]
    fn unused(_: PatternFlavor) {}
}
