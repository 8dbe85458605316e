//! Landmark classifiers built on `burn`, trained on the CPU `NdArray` backend with Adam.

mod architectures;
mod blocks;

pub use architectures::{
    BaselineConfig, BaselineNet, DenseNet, DenseNetConfig, EfficientNet, EfficientNetConfig, ResNet,
    ResNetConfig, SliveConfig, SliveNet,
};
pub use blocks::Activation;

use crate::dataset::{InputShape, PreparedDataset, Split};
use crate::error::{TrainingError, TrainingResult};
use crate::job::HyperParams;
use crate::progress::{EpochMetrics, RunOutcome, TrainingHooks};
use crate::trainer::{FitHistory, LayerSummary, Model};
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, Record};
use burn::tensor::activation::softmax;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

pub type InferBackend = NdArray<f32>;
pub type TrainBackend = Autodiff<InferBackend>;
pub type Device = <InferBackend as Backend>::Device;

type NetRecord<C> = <<C as ClassifierConfig>::Net as Module<TrainBackend>>::Record;
type NetRecordItem<C> = <NetRecord<C> as Record<TrainBackend>>::Item<FullPrecisionSettings>;

const EVAL_BATCH: usize = 256;

/// Maps `[batch, channels, length]` inputs to `[batch, classes]` logits.
pub trait Classifier<B: Backend>: Module<B> {
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2>;
}

/// Hyperparameters of one classifier family, and how to build it.
pub trait ClassifierConfig: Config + std::fmt::Debug + Send + Sync + 'static {
    type Net: Classifier<TrainBackend> + AutodiffModule<TrainBackend, InnerModule: Classifier<InferBackend>>;

    /// Default hyperparameters for `input` and `num_classes`.
    fn for_task(input: InputShape, num_classes: usize) -> Self;

    fn input(&self) -> InputShape;

    fn num_classes(&self) -> usize;

    fn init_net(&self, device: &Device) -> Self::Net;

    fn layer_summaries(&self) -> Vec<LayerSummary>;
}

#[derive(Deserialize)]
struct Snapshot {
    config: serde_json::Value,
    record: serde_json::Value,
}

/// A trainable classifier of one family together with its config.
#[derive(Debug)]
pub struct Network<C: ClassifierConfig> {
    name: String,
    config: C,
    net: C::Net,
    device: Device,
}

impl<C: ClassifierConfig> Network<C> {
    /// Fresh weights, initialised from `seed`.
    pub fn new(name: impl Into<String>, config: C, seed: u64) -> TrainingResult<Self> {
        if config.num_classes() == 0 {
            return Err(TrainingError::Shape("network needs at least one output class".to_string()));
        }
        if config.input().numel() == 0 {
            return Err(TrainingError::Shape("network input must not be empty".to_string()));
        }
        let device = Device::default();
        <TrainBackend as Backend>::seed(seed);
        let net = config.init_net(&device);
        Ok(Self { name: name.into(), config, net, device })
    }

    /// Rebuild a network from the output of [`Model::to_json`].
    pub fn from_json(name: impl Into<String>, value: serde_json::Value) -> TrainingResult<Self> {
        let snapshot: Snapshot = serde_json::from_value(value)?;
        let config: C = serde_json::from_value(snapshot.config)?;
        let item: NetRecordItem<C> = serde_json::from_value(snapshot.record)?;
        let device = Device::default();
        let record = <NetRecord<C> as Record<TrainBackend>>::from_item(item, &device);
        let net = config.init_net(&device).load_record(record);
        Ok(Self { name: name.into(), config, net, device })
    }

    #[must_use]
    pub fn config(&self) -> &C {
        &self.config
    }

    fn check_input(&self, input: &[f32]) -> TrainingResult<()> {
        let numel = self.config.input().numel();
        if input.len() == numel {
            Ok(())
        } else {
            Err(TrainingError::Shape(format!("expected {numel} input values, got {}", input.len())))
        }
    }

    fn check_dataset(&self, data: &PreparedDataset) -> TrainingResult<()> {
        if data.train.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        let input = self.config.input();
        if data.input != input {
            return Err(TrainingError::Shape(format!(
                "dataset input {:?} does not match network input {input:?}",
                data.input
            )));
        }
        let num_classes = self.config.num_classes();
        if data.num_classes() != num_classes {
            return Err(TrainingError::Shape(format!(
                "dataset has {} classes, network has {num_classes}",
                data.num_classes()
            )));
        }
        let numel = input.numel();
        let mut rows = data.train.features.iter().chain(&data.val.features);
        let mut labels = data.train.labels.iter().chain(&data.val.labels);
        if rows.any(|x| x.len() != numel) {
            return Err(TrainingError::Shape(format!("every sample must have {numel} values")));
        }
        if labels.any(|&l| l >= num_classes) {
            return Err(TrainingError::Dataset("label index out of range".to_string()));
        }
        Ok(())
    }

    fn fit_epochs(
        &mut self,
        data: &PreparedDataset,
        hp: &HyperParams,
        hooks: &mut dyn TrainingHooks,
    ) -> TrainingResult<FitHistory> {
        hp.validate()?;
        self.check_dataset(data)?;

        let input = self.config.input();
        let mut rng = StdRng::seed_from_u64(hp.seed.wrapping_add(1));
        let mut order: Vec<usize> = (0..data.train.len()).collect();
        let batch_size = hp.batch_size as usize;
        let n = data.train.len() as f64;
        // Validation falls back to the training split when no samples were held out.
        let eval_split = if data.val.is_empty() { &data.train } else { &data.val };

        let loss_fn = CrossEntropyLossConfig::new().init::<TrainBackend>(&self.device);
        let mut optimizer = AdamConfig::new().init();
        let mut net = self.net.clone();
        let mut history = FitHistory::default();

        for epoch in 1..=hp.epochs {
            hooks.on_epoch_begin(epoch);
            let started = Instant::now();
            order.shuffle(&mut rng);

            let mut loss_sum = 0.0;
            let mut correct = 0usize;
            for (batch, chunk) in order.chunks(batch_size).enumerate() {
                let batch_started = Instant::now();
                let targets = label_batch::<TrainBackend>(&data.train, chunk, &self.device);
                let logits = net.forward(input_batch(&data.train, chunk, input, &self.device));
                let loss = loss_fn.forward(logits.clone(), targets.clone());

                loss_sum += loss.clone().into_scalar().elem::<f64>() * chunk.len() as f64;
                correct += count_correct(logits, targets);

                let grads = GradientsParams::from_grads(loss.backward(), &net);
                net = optimizer.step(hp.learning_rate, net, grads);
                hooks.on_batch_end(batch, batch_started.elapsed());
            }

            let loss = loss_sum / n;
            if !loss.is_finite() {
                return Err(TrainingError::Trainer(format!("loss diverged at epoch {epoch}")));
            }
            let (val_loss, val_accuracy) = evaluate(&net.valid(), eval_split, input, &self.device);
            let metrics = EpochMetrics {
                epoch,
                total_epochs: hp.epochs,
                loss,
                accuracy: correct as f64 / n,
                val_loss,
                val_accuracy,
                elapsed: started.elapsed(),
            };
            debug!(
                model = %self.name,
                epoch,
                loss = metrics.loss,
                val_accuracy = metrics.val_accuracy,
                "epoch finished"
            );
            hooks.on_epoch_end(&metrics);
            history.epochs.push(metrics);
        }

        self.net = net;
        Ok(history)
    }
}

impl<C: ClassifierConfig> Model for Network<C> {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn input_shape(&self) -> InputShape {
        self.config.input()
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes()
    }

    fn parameter_count(&self) -> u64 {
        self.net.num_params() as u64
    }

    fn layer_summaries(&self) -> Vec<LayerSummary> {
        self.config.layer_summaries()
    }

    fn fit(
        &mut self,
        data: &PreparedDataset,
        hyperparams: &HyperParams,
        hooks: &mut dyn TrainingHooks,
    ) -> TrainingResult<FitHistory> {
        hooks.on_run_start();
        let result = self.fit_epochs(data, hyperparams, hooks);
        match &result {
            Ok(history) => hooks.on_run_end(RunOutcome::Completed(history)),
            Err(e) => {
                let message = e.to_string();
                hooks.on_run_end(RunOutcome::Failed(&message));
            }
        }
        result
    }

    fn predict(&self, input: &[f32]) -> TrainingResult<Vec<f32>> {
        self.check_input(input)?;
        let x = input_tensor::<InferBackend>(input.to_vec(), 1, self.config.input(), &self.device);
        let probs = softmax(self.net.valid().forward(x), 1);
        probs.into_data().to_vec::<f32>().map_err(|e| TrainingError::Trainer(format!("{e:?}")))
    }

    fn to_json(&self) -> TrainingResult<serde_json::Value> {
        let record = self.net.clone().into_record().into_item::<FullPrecisionSettings>();
        Ok(serde_json::json!({
            "config": serde_json::to_value(&self.config)?,
            "record": serde_json::to_value(record)?,
        }))
    }
}

/// `count` rows of `shape.numel()` values laid out as `[count, channels, length]`.
fn input_tensor<B: Backend>(flat: Vec<f32>, count: usize, shape: InputShape, device: &B::Device) -> Tensor<B, 3> {
    Tensor::<B, 3>::from_data(TensorData::new(flat, [count, shape.length, shape.channels]), device).swap_dims(1, 2)
}

fn input_batch<B: Backend>(split: &Split, indices: &[usize], shape: InputShape, device: &B::Device) -> Tensor<B, 3> {
    let mut flat = Vec::with_capacity(indices.len() * shape.numel());
    for &i in indices {
        flat.extend_from_slice(&split.features[i]);
    }
    input_tensor(flat, indices.len(), shape, device)
}

#[allow(clippy::cast_possible_wrap)]
fn label_batch<B: Backend>(split: &Split, indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let labels: Vec<i64> = indices.iter().map(|&i| split.labels[i] as i64).collect();
    Tensor::from_data(TensorData::new(labels, [indices.len()]), device)
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let hits = logits.argmax(1).flatten::<1>(0, 1).equal(targets).int().sum().into_scalar();
    hits.elem::<i64>().max(0) as usize
}

/// Mean cross-entropy loss and accuracy over a split, in inference mode.
fn evaluate<M: Classifier<InferBackend>>(net: &M, split: &Split, shape: InputShape, device: &Device) -> (f64, f64) {
    if split.is_empty() {
        return (0.0, 0.0);
    }
    let loss_fn = CrossEntropyLossConfig::new().init::<InferBackend>(device);
    let indices: Vec<usize> = (0..split.len()).collect();
    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    for chunk in indices.chunks(EVAL_BATCH) {
        let targets = label_batch::<InferBackend>(split, chunk, device);
        let logits = net.forward(input_batch(split, chunk, shape, device));
        loss_sum += loss_fn.forward(logits.clone(), targets.clone()).into_scalar().elem::<f64>() * chunk.len() as f64;
        correct += count_correct(logits, targets);
    }
    let n = split.len() as f64;
    (loss_sum / n, correct as f64 / n)
}
