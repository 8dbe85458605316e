use crate::dataset::InputShape;
use crate::error::{TrainingError, TrainingResult};
use crate::network::{
    BaselineConfig, ClassifierConfig, DenseNetConfig, EfficientNetConfig, Network, ResNetConfig, SliveConfig,
};
use crate::trainer::{Architecture, Model};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// An architecture backed by one classifier family, built with that family's default hyperparameters.
#[derive(Debug)]
pub struct NetworkArchitecture<C> {
    key: &'static str,
    name: &'static str,
    config: PhantomData<fn() -> C>,
}

impl<C: ClassifierConfig> NetworkArchitecture<C> {
    #[must_use]
    pub const fn new(key: &'static str, name: &'static str) -> Self {
        Self { key, name, config: PhantomData }
    }
}

impl<C: ClassifierConfig> Architecture for NetworkArchitecture<C> {
    fn key(&self) -> &'static str {
        self.key
    }

    fn display_name(&self) -> &'static str {
        self.name
    }

    fn build(&self, input: InputShape, num_classes: usize, seed: u64) -> TrainingResult<Box<dyn Model>> {
        Ok(Box::new(Network::new(self.name, C::for_task(input, num_classes), seed)?))
    }

    fn restore(&self, weights: serde_json::Value) -> TrainingResult<Box<dyn Model>> {
        Ok(Box::new(Network::<C>::from_json(self.name, weights)?))
    }
}

/// Architectures selectable by key.
#[derive(Clone, Default)]
pub struct ArchitectureRegistry {
    entries: BTreeMap<&'static str, Arc<dyn Architecture>>,
}

impl std::fmt::Debug for ArchitectureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchitectureRegistry").field("keys", &self.keys()).finish()
    }
}

impl ArchitectureRegistry {
    /// Registry with the built-in `baseline`, `slive`, `resnet`, `densenet` and `efficientnet` keys.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(NetworkArchitecture::<BaselineConfig>::new("baseline", "Baseline CNN")));
        registry.register(Arc::new(NetworkArchitecture::<SliveConfig>::new("slive", "SLIVE")));
        registry.register(Arc::new(NetworkArchitecture::<ResNetConfig>::new("resnet", "ResNet")));
        registry.register(Arc::new(NetworkArchitecture::<DenseNetConfig>::new("densenet", "DenseNet")));
        registry.register(Arc::new(NetworkArchitecture::<EfficientNetConfig>::new("efficientnet", "EfficientNet")));
        registry
    }

    pub fn register(&mut self, architecture: Arc<dyn Architecture>) {
        self.entries.insert(architecture.key(), architecture);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> TrainingResult<Arc<dyn Architecture>> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| TrainingError::UnknownArchitecture(key.to_string()))
    }

    #[must_use]
    pub fn keys(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Architecture>> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAND: InputShape = InputShape { length: 21, channels: 3 };

    #[test]
    fn test_defaults_register_all_keys() {
        let registry = ArchitectureRegistry::with_defaults();
        assert_eq!(registry.keys(), vec!["baseline", "densenet", "efficientnet", "resnet", "slive"]);
        assert!(matches!(registry.get("vgg"), Err(TrainingError::UnknownArchitecture(_))));
    }

    #[test]
    fn test_every_default_builds_for_hand_landmarks() {
        let registry = ArchitectureRegistry::with_defaults();
        for arch in registry.iter() {
            let model = arch.build(HAND, 5, 42).unwrap();
            assert_eq!(model.num_classes(), 5);
            assert!(model.parameter_count() > 0, "{}", arch.key());
            let probs = model.predict(&[0.1; 63]).unwrap();
            assert_eq!(probs.len(), 5);
        }
    }

    #[test]
    fn test_restore_reproduces_predictions() {
        let arch = ArchitectureRegistry::with_defaults().get("resnet").unwrap();
        let model = arch.build(HAND, 3, 1).unwrap();
        let restored = arch.restore(model.to_json().unwrap()).unwrap();
        let input = vec![0.25; 63];
        let (a, b) = (model.predict(&input).unwrap(), restored.predict(&input).unwrap());
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-6), "{a:?} != {b:?}");
        assert_eq!(restored.display_name(), "ResNet");
    }
}
