use super::{Reporter, TrainingState, Updater, UpdaterCore, MAIN};
use crate::array::Device;
use crate::dataset::{ConcatExamples, Converter, DatasetIterator};
use crate::error::Result;
use crate::nn::{LossFn, TargetLoss};
use crate::optim::Optimizer;
use crate::serializers::{Serializable, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Custom update routine. Receives the updater's iterators and optimizers.
pub type UpdateFn = Box<dyn FnMut(&mut UpdaterCore) -> Result<()> + Send>;

enum Step {
    Default {
        converter: Arc<dyn Converter>,
        device: Device,
        loss_fn: Arc<dyn LossFn>,
    },
    Custom(UpdateFn),
}

impl Step {
    fn run(&mut self, core: &mut UpdaterCore) -> Result<()> {
        match self {
            Step::Custom(f) => f(core),
            Step::Default {
                converter,
                device,
                loss_fn,
            } => {
                let batch = core.iterator_mut(MAIN)?.next_batch()?;
                let inputs = converter.convert(&batch, *device)?;
                let loss = core
                    .optimizer_mut(MAIN)?
                    .update_with(loss_fn.as_ref(), &inputs)?;
                tracing::trace!(loss, "standard update");
                core.report(MAIN, "loss", loss)
            }
        }
    }
}

/// Single-device updater.
///
/// The default update routine uses the `"main"` iterator and optimizer: the
/// batch is converted (by [`ConcatExamples`] unless configured otherwise),
/// and the optimizer minimizes the loss of its own target, or of a configured
/// loss function.
///
/// ```rust
/// use dptrain::array::Array;
/// use dptrain::dataset::{Inputs, SerialIterator};
/// use dptrain::nn::{Linear, Regressor};
/// use dptrain::optim::{Optimizer, Sgd};
/// use dptrain::training::{StandardUpdater, Updater};
///
/// let data: Vec<Inputs> = (0..4)
///     .map(|i| {
///         let x = i as f32;
///         Inputs::Positional(vec![Array::new(vec![x], [1]).unwrap(), Array::scalar(2.0 * x)])
///     })
///     .collect();
/// let iterator = SerialIterator::new(data, 2, true, false).unwrap();
///
/// let model = Regressor::new(Linear::from_params(Array::zeros(&[1, 1]), None).unwrap());
/// let mut optimizer = Sgd::new(0.01);
/// optimizer.setup(Box::new(model));
///
/// let mut updater = StandardUpdater::new(Box::new(iterator), Box::new(optimizer));
/// updater.update().unwrap();
/// assert_eq!(updater.iteration(), 1);
/// ```
pub struct StandardUpdater {
    core: UpdaterCore,
    state: TrainingState,
    step: Step,
}

impl std::fmt::Debug for StandardUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardUpdater")
            .field("core", &self.core)
            .field("state", &self.state)
            .field("custom", &matches!(self.step, Step::Custom(_)))
            .finish()
    }
}

impl StandardUpdater {
    /// Creates an updater with one iterator and one optimizer, both registered as `"main"`.
    pub fn new(iterator: Box<dyn DatasetIterator>, optimizer: Box<dyn Optimizer>) -> Self {
        let mut iterators = BTreeMap::new();
        iterators.insert(MAIN.to_string(), iterator);
        let mut optimizers = BTreeMap::new();
        optimizers.insert(MAIN.to_string(), optimizer);
        Self {
            core: UpdaterCore::new(iterators, optimizers),
            state: TrainingState::default(),
            step: Step::Default {
                converter: Arc::new(ConcatExamples::default()),
                device: Device::Cpu,
                loss_fn: Arc::new(TargetLoss),
            },
        }
    }

    pub fn builder() -> StandardUpdaterBuilder {
        StandardUpdaterBuilder::default()
    }

    pub fn core(&self) -> &UpdaterCore {
        &self.core
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }
}

impl Updater for StandardUpdater {
    fn connect_trainer(&mut self, reporter: &Reporter) -> Result<()> {
        self.core.connect(reporter);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        tracing::debug!(iteration = self.state.iteration(), "finalizing updater");
        self.core.finalize();
        self.state.finalize();
        Ok(())
    }

    fn get_optimizer(&self, name: &str) -> Result<&dyn Optimizer> {
        self.core.optimizer(name)
    }

    fn get_optimizer_mut(&mut self, name: &str) -> Result<&mut dyn Optimizer> {
        self.core.optimizer_mut(name)
    }

    fn get_all_optimizers(&self) -> Result<BTreeMap<String, &dyn Optimizer>> {
        Ok(self.core.optimizers())
    }

    fn get_iterator(&self, name: &str) -> Result<&dyn DatasetIterator> {
        self.core.iterator(name)
    }

    fn update(&mut self) -> Result<()> {
        self.state.advance(|| self.step.run(&mut self.core))
    }

    fn iteration(&self) -> u64 {
        self.state.iteration()
    }

    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        self.core.serialize(s)?;
        self.state.serialize(s)
    }
}

impl Serializable for StandardUpdater {
    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        Updater::serialize(self, s)
    }
}

/// Builder for [`StandardUpdater`] with named iterators and optimizers.
#[derive(Default)]
pub struct StandardUpdaterBuilder {
    iterators: BTreeMap<String, Box<dyn DatasetIterator>>,
    optimizers: BTreeMap<String, Box<dyn Optimizer>>,
    converter: Option<Arc<dyn Converter>>,
    device: Device,
    loss_fn: Option<Arc<dyn LossFn>>,
    update_fn: Option<UpdateFn>,
}

impl StandardUpdaterBuilder {
    pub fn iterator(mut self, name: impl Into<String>, iterator: Box<dyn DatasetIterator>) -> Self {
        self.iterators.insert(name.into(), iterator);
        self
    }

    pub fn optimizer(mut self, name: impl Into<String>, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizers.insert(name.into(), optimizer);
        self
    }

    /// Converter for the default routine. Ignored with a custom update function.
    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Device the converted batch is placed on. Ignored with a custom update function.
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Loss for the default routine; the main optimizer's target by default.
    pub fn loss_fn(mut self, loss_fn: impl LossFn + 'static) -> Self {
        self.loss_fn = Some(Arc::new(loss_fn));
        self
    }

    pub fn update_fn(
        mut self,
        update_fn: impl FnMut(&mut UpdaterCore) -> Result<()> + Send + 'static,
    ) -> Self {
        self.update_fn = Some(Box::new(update_fn));
        self
    }

    /// # Errors
    ///
    /// [`Error::MissingKey`](crate::Error::MissingKey) if the default routine is used and `"main"` is
    /// missing from the iterators or the optimizers.
    pub fn build(self) -> Result<StandardUpdater> {
        let core = UpdaterCore::new(self.iterators, self.optimizers);
        let step = match self.update_fn {
            Some(f) => Step::Custom(f),
            None => {
                core.require_main()?;
                Step::Default {
                    converter: self
                        .converter
                        .unwrap_or_else(|| Arc::new(ConcatExamples::default())),
                    device: self.device,
                    loss_fn: self.loss_fn.unwrap_or_else(|| Arc::new(TargetLoss)),
                }
            }
        };
        Ok(StandardUpdater {
            core,
            state: TrainingState::default(),
            step,
        })
    }
}
