use crate::error::{TrainingError, TrainingResult};
use crate::layout::write_json_atomic;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// Landmark coordinates of one sample, either as `[x, y, z]` points or as a flat vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Landmarks {
    Points(Vec<[f32; 3]>),
    Flat(Vec<f32>),
}

impl Landmarks {
    pub fn points(&self) -> TrainingResult<Vec<[f32; 3]>> {
        match self {
            Self::Points(points) => Ok(points.clone()),
            Self::Flat(values) => {
                if values.len() % 3 != 0 {
                    return Err(TrainingError::Dataset(format!(
                        "flat landmark vector length {} is not a multiple of 3",
                        values.len()
                    )));
                }
                Ok(values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
            }
        }
    }
}

/// A single labelled sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub label: String,
    pub landmarks: Landmarks,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatasetFile {
    #[serde(default)]
    dataset: Vec<Sample>,
}

/// Shape of a single model input: `length` positions of `channels` values each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub length: usize,
    pub channels: usize,
}

impl InputShape {
    #[must_use]
    pub fn numel(&self) -> usize {
        self.length * self.channels
    }
}

/// Feature vectors and encoded labels for one side of a train/validation split.
#[derive(Debug, Clone, Default)]
pub struct Split {
    pub features: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

impl Split {
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn push(&mut self, features: Vec<f32>, label: usize) {
        self.features.push(features);
        self.labels.push(label);
    }
}

/// A dataset ready to be fed into a model.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub train: Split,
    pub val: Split,
    /// Class names, sorted; a label `i` refers to `classes[i]`.
    pub classes: Vec<String>,
    pub input: InputShape,
    pub id: DatasetId,
}

impl PreparedDataset {
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.train.len() + self.val.len()
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// A single preprocessed input suitable for latency probing.
    #[must_use]
    pub fn probe_input(&self) -> Option<&[f32]> {
        self.val
            .features
            .first()
            .or_else(|| self.train.features.first())
            .map(Vec::as_slice)
    }
}

/// Normalize landmarks relative to the first point (the wrist) and scale into `[-1, 1]`.
///
/// The output is flattened row-major as `(points, 3)`.
#[must_use]
pub fn preprocess_landmarks(points: &[[f32; 3]]) -> Vec<f32> {
    let Some(origin) = points.first().copied() else {
        return Vec::new();
    };

    let mut out: Vec<f32> = points
        .iter()
        .flat_map(|p| [p[0] - origin[0], p[1] - origin[1], p[2] - origin[2]])
        .collect();

    let max_abs = out.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    if max_abs > 0.0 {
        for v in &mut out {
            *v /= max_abs;
        }
    }
    out
}

pub fn compute_dataset_id(samples: &[Sample]) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for sample in samples {
        hasher.update(sample.label.as_bytes());
        hasher.update(b"\t");
        hasher.update(serde_json::to_vec(&sample.landmarks)?);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

/// Encode labels, preprocess landmarks and split into train/validation sets.
///
/// The split is stratified per class and deterministic for a given `seed`. Every class
/// keeps at least one training sample, so tiny classes may contribute nothing to the
/// validation set.
pub fn prepare_dataset(
    samples: &[Sample],
    validation_split: f64,
    seed: u64,
) -> TrainingResult<PreparedDataset> {
    if samples.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    if !(0.0..1.0).contains(&validation_split) {
        return Err(TrainingError::InvalidSpec(format!(
            "validation_split must be in [0, 1), got {validation_split}"
        )));
    }

    let classes: Vec<String> =
        samples.iter().map(|s| s.label.clone()).collect::<BTreeSet<_>>().into_iter().collect();
    let class_index: BTreeMap<&str, usize> =
        classes.iter().enumerate().map(|(i, c)| (c.as_str(), i)).collect();

    let mut expected_points: Option<usize> = None;
    let mut by_class: Vec<Vec<Vec<f32>>> = vec![Vec::new(); classes.len()];
    for (idx, sample) in samples.iter().enumerate() {
        if sample.label.trim().is_empty() {
            return Err(TrainingError::Dataset(format!("sample[{idx}] label is empty")));
        }
        let points = sample.landmarks.points()?;
        if points.is_empty() {
            return Err(TrainingError::Dataset(format!("sample[{idx}] has no landmarks")));
        }
        match expected_points {
            None => expected_points = Some(points.len()),
            Some(n) if n != points.len() => {
                return Err(TrainingError::Dataset(format!(
                    "sample[{idx}] has {} landmarks, expected {n}",
                    points.len()
                )));
            }
            Some(_) => {}
        }
        by_class[class_index[sample.label.as_str()]].push(preprocess_landmarks(&points));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Split::default();
    let mut val = Split::default();
    for (label, mut rows) in by_class.into_iter().enumerate() {
        rows.shuffle(&mut rng);
        let n = rows.len();
        let n_val = ((n as f64) * validation_split).round() as usize;
        let n_val = n_val.min(n.saturating_sub(1));
        for (i, row) in rows.into_iter().enumerate() {
            if i < n_val {
                val.push(row, label);
            } else {
                train.push(row, label);
            }
        }
    }

    Ok(PreparedDataset {
        train,
        val,
        classes,
        input: InputShape { length: expected_points.unwrap_or(0), channels: 3 },
        id: compute_dataset_id(samples)?,
    })
}

/// Source of raw training samples.
pub trait DatasetProvider: Send + Sync {
    fn load_samples(&self) -> TrainingResult<Vec<Sample>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub num_gestures: usize,
    pub gesture_counts: BTreeMap<String, usize>,
}

/// JSON-file backed sample store (`{"dataset": [...]}`).
#[derive(Debug)]
pub struct DatasetStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DatasetStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, write_lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> TrainingResult<DatasetFile> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                TrainingError::Dataset(format!("failed to parse {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DatasetFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append samples and return the new total sample count.
    pub fn append(&self, samples: Vec<Sample>) -> TrainingResult<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_file()?;
        let now = Utc::now().to_rfc3339();
        for mut sample in samples {
            sample.landmarks.points()?;
            if sample.timestamp.is_none() {
                sample.timestamp = Some(now.clone());
            }
            file.dataset.push(sample);
        }
        write_json_atomic(&self.path, &file)?;
        Ok(file.dataset.len())
    }

    pub fn stats(&self) -> TrainingResult<DatasetStats> {
        let file = self.read_file()?;
        let mut gesture_counts = BTreeMap::new();
        for sample in &file.dataset {
            *gesture_counts.entry(sample.label.clone()).or_insert(0) += 1;
        }
        Ok(DatasetStats {
            total_samples: file.dataset.len(),
            num_gestures: gesture_counts.len(),
            gesture_counts,
        })
    }

    pub fn reset(&self) -> TrainingResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_json_atomic(&self.path, &DatasetFile::default())
    }
}

impl DatasetProvider for DatasetStore {
    fn load_samples(&self) -> TrainingResult<Vec<Sample>> {
        Ok(self.read_file()?.dataset)
    }
}

impl DatasetProvider for Vec<Sample> {
    fn load_samples(&self) -> TrainingResult<Vec<Sample>> {
        Ok(self.clone())
    }
}
