use super::{Reporter, TrainingState, Updater, UpdaterCore, MAIN};
use crate::array::Device;
use crate::dataset::{ConcatExamples, Converter, DatasetIterator, Inputs};
use crate::error::{Error, Result};
use crate::nn::{Grads, Link, Loss, LossFn, TargetLoss};
use crate::optim::Optimizer;
use crate::serializers::{Serializable, Serializer};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Splits `batch` into `n` shards by striding: shard `i` holds positions
/// `i, i + n, i + 2n, ...`.
///
/// Shard sizes differ by at most one. Shards are empty when the batch has
/// fewer than `n` items.
///
/// ```rust
/// use dptrain::training::split_batch;
///
/// let shards = split_batch(&[0, 1, 2, 3, 4], 2);
/// assert_eq!(shards, vec![vec![0, 2, 4], vec![1, 3]]);
/// ```
pub fn split_batch<T: Clone>(batch: &[T], n: usize) -> Vec<Vec<T>> {
    (0..n)
        .map(|i| batch.iter().skip(i).step_by(n).cloned().collect())
        .collect()
}

/// Fails unless `replica` has exactly the parameter names and shapes of `main`.
fn check_structure(main: &dyn Link, name: &str, replica: &dyn Link) -> Result<()> {
    let shapes = |link: &dyn Link| -> BTreeMap<String, Vec<usize>> {
        link.params()
            .into_iter()
            .map(|(key, p)| (key, p.data.shape().to_vec()))
            .collect()
    };
    let expected = shapes(main);
    let got = shapes(replica);
    if expected != got {
        return Err(Error::InvalidArgument(format!(
            "replica {:?} does not match the main model: expected parameters {:?}, got {:?}",
            name, expected, got
        )));
    }
    Ok(())
}

/// Synchronous data-parallel updater.
///
/// Holds one model per device. The `"main"` model is the target of the
/// `"main"` optimizer; every other entry is a replica. Each step:
///
/// 1. fetches one batch and splits it across the models with [`split_batch`],
/// 2. converts every shard onto its model's device,
/// 3. runs forward and backward on every model in parallel,
/// 4. sums the replica gradients into the main model,
/// 5. applies a single optimizer step to the main model,
/// 6. copies the updated parameters back to every replica.
///
/// Gradients are summed, not averaged: with a mean loss per shard, the
/// effective learning rate scales with the number of devices.
///
/// Models are assigned shards in name order.
///
/// A step is counted only after the broadcast. Replicas are checked against
/// the main model's parameter names and shapes at construction, so the
/// broadcast cannot fail on structure; should it fail anyway, the main model
/// keeps its updated parameters while `iteration` is unchanged.
pub struct ParallelUpdater {
    core: UpdaterCore,
    state: TrainingState,
    converter: Arc<dyn Converter>,
    loss_fn: Arc<dyn LossFn>,
    replicas: BTreeMap<String, Box<dyn Link>>,
    devices: BTreeMap<String, Device>,
}

impl std::fmt::Debug for ParallelUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelUpdater")
            .field("core", &self.core)
            .field("state", &self.state)
            .field("devices", &self.devices)
            .finish()
    }
}

impl ParallelUpdater {
    /// Starts a builder with `iterator` and `optimizer` registered as `"main"`.
    pub fn builder(
        iterator: Box<dyn DatasetIterator>,
        optimizer: Box<dyn Optimizer>,
    ) -> ParallelUpdaterBuilder {
        ParallelUpdaterBuilder::default()
            .iterator(MAIN, iterator)
            .optimizer(MAIN, optimizer)
    }

    /// Device of every model, including `"main"`.
    pub fn devices(&self) -> &BTreeMap<String, Device> {
        &self.devices
    }

    /// Non-main replicas.
    pub fn replicas(&self) -> &BTreeMap<String, Box<dyn Link>> {
        &self.replicas
    }

    pub fn core(&self) -> &UpdaterCore {
        &self.core
    }

    /// Copies the main model's parameters into every replica.
    fn broadcast(&mut self) -> Result<()> {
        let main = self.core.optimizer(MAIN)?.target()?;
        for replica in self.replicas.values_mut() {
            replica.copy_params(main)?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        let batch = self.core.iterator_mut(MAIN)?.next_batch()?;
        let names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        let shards = split_batch(&batch, names.len());

        let sizes: Vec<usize> = shards.iter().map(Vec::len).collect();
        let span = tracing::debug_span!(
            "parallel_step",
            iteration = self.state.iteration(),
            shards = ?sizes
        );
        let _enter = span.enter();

        let converter = &self.converter;
        let devices = &self.devices;
        let inputs: Vec<Inputs> = names
            .par_iter()
            .zip(shards.par_iter())
            .map(|(name, shard)| converter.convert(shard, devices[*name]))
            .collect::<Result<_>>()?;

        let loss_fn = &self.loss_fn;
        let replicas = &mut self.replicas;
        let optimizer = self.core.optimizer_mut(MAIN)?;

        let main = optimizer.target_mut()?;
        main.zero_grads();
        for replica in replicas.values_mut() {
            replica.zero_grads();
        }

        let main_ref: &dyn Link = &*main;
        let models: Vec<&dyn Link> = names
            .iter()
            .map(|name| replicas.get(*name).map_or(main_ref, |r| r.as_ref()))
            .collect();

        let losses: Vec<Loss> = models
            .par_iter()
            .zip(inputs.par_iter())
            .map(|(model, x)| loss_fn.loss(*model, x))
            .collect::<Result<_>>()?;
        let values: Vec<f32> = losses.iter().map(Loss::value).collect();
        let grads: Vec<Grads> = losses
            .into_par_iter()
            .map(Loss::backward)
            .collect::<Result<_>>()?;

        for (name, g) in names.iter().zip(grads) {
            match replicas.get_mut(*name) {
                Some(replica) => replica.accumulate_grads(g)?,
                None => main.accumulate_grads(g)?,
            }
        }
        for replica in replicas.values() {
            main.add_grads(replica.as_ref())?;
        }

        optimizer.update()?;

        // Main has moved; replica structure was checked at construction.
        let main = optimizer.target()?;
        for replica in replicas.values_mut() {
            replica.copy_params(main)?;
        }

        for (name, value) in names.iter().zip(values) {
            tracing::trace!(model = *name, loss = value, "shard loss");
            self.core.report(name, "loss", value)?;
        }
        Ok(())
    }
}

impl Updater for ParallelUpdater {
    /// Registers every replica as an observer under its name.
    fn connect_trainer(&mut self, reporter: &Reporter) -> Result<()> {
        for (name, replica) in &self.replicas {
            reporter.add_observer(name, replica.as_ref());
        }
        self.core.connect(reporter);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        tracing::debug!(iteration = self.state.iteration(), "finalizing parallel updater");
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
        let mut state = self.state;
        let result = state.advance(|| self.step());
        self.state = state;
        result
    }

    fn iteration(&self) -> u64 {
        self.state.iteration()
    }

    /// Restoring also re-synchronizes the replicas with the restored main model.
    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        self.core.serialize(s)?;
        self.state.serialize(s)?;
        if s.is_loading() {
            self.broadcast()?;
        }
        Ok(())
    }
}

impl Serializable for ParallelUpdater {
    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        Updater::serialize(self, s)
    }
}

/// Builder for [`ParallelUpdater`].
///
/// Exactly one of [`models`](Self::models) and [`devices`](Self::devices)
/// must be given:
///
/// - **models**: one link per name; `"main"` becomes the target of the main
///   optimizer and the i-th name (in sorted order) is placed on `Gpu(i)`.
///   Every other model must have main's parameter names and shapes, and
///   starts from a copy of main's parameters.
/// - **devices**: one device per name; every non-main entry gets a deep copy
///   of the main optimizer's target.
#[derive(Default)]
pub struct ParallelUpdaterBuilder {
    iterators: BTreeMap<String, Box<dyn DatasetIterator>>,
    optimizers: BTreeMap<String, Box<dyn Optimizer>>,
    converter: Option<Arc<dyn Converter>>,
    loss_fn: Option<Arc<dyn LossFn>>,
    models: Option<BTreeMap<String, Box<dyn Link>>>,
    devices: Option<BTreeMap<String, Device>>,
}

impl ParallelUpdaterBuilder {
    pub fn iterator(mut self, name: impl Into<String>, iterator: Box<dyn DatasetIterator>) -> Self {
        self.iterators.insert(name.into(), iterator);
        self
    }

    pub fn optimizer(mut self, name: impl Into<String>, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizers.insert(name.into(), optimizer);
        self
    }

    /// Converter applied to every shard with that shard's device.
    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Loss computed on every replica; each model's own forward by default.
    pub fn loss_fn(mut self, loss_fn: impl LossFn + 'static) -> Self {
        self.loss_fn = Some(Arc::new(loss_fn));
        self
    }

    pub fn models(mut self, models: BTreeMap<String, Box<dyn Link>>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn devices(mut self, devices: BTreeMap<String, Device>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Validates the configuration and moves every model onto its device.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if neither or both of models and devices are
    ///   given, or a model differs structurally from `"main"`.
    /// - [`Error::MissingKey`] if `"main"` is missing from the iterators, the
    ///   optimizers, or the given models/devices.
    pub fn build(self) -> Result<ParallelUpdater> {
        let mut core = UpdaterCore::new(self.iterators, self.optimizers);
        core.require_main()?;

        let (mut replicas, devices) = match (self.models, self.devices) {
            (Some(mut models), None) => {
                let devices: BTreeMap<String, Device> = models
                    .keys()
                    .enumerate()
                    .map(|(i, name)| (name.clone(), Device::Gpu(i as u32)))
                    .collect();
                let main = models
                    .remove(MAIN)
                    .ok_or_else(|| Error::MissingKey(MAIN.into()))?;
                for (name, replica) in models.iter_mut() {
                    check_structure(main.as_ref(), name, &**replica)?;
                    replica.copy_params(main.as_ref())?;
                }
                core.optimizer_mut(MAIN)?.setup(main);
                (models, devices)
            }
            (None, Some(devices)) => {
                if !devices.contains_key(MAIN) {
                    return Err(Error::MissingKey(MAIN.into()));
                }
                let main = core.optimizer(MAIN)?.target()?;
                let replicas: BTreeMap<String, Box<dyn Link>> = devices
                    .keys()
                    .filter(|name| name.as_str() != MAIN)
                    .map(|name| (name.clone(), main.clone_link()))
                    .collect();
                (replicas, devices)
            }
            (None, None) => {
                return Err(Error::InvalidArgument(
                    "either models or devices must be specified".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidArgument(
                    "models and devices are mutually exclusive".into(),
                ))
            }
        };

        for (name, replica) in replicas.iter_mut() {
            let device = devices[name];
            replica.to_device(device);
            tracing::info!(model = %name, %device, "replica placed");
        }
        let main_device = devices[MAIN];
        core.optimizer_mut(MAIN)?.target_mut()?.to_device(main_device);
        tracing::info!(model = MAIN, device = %main_device, "main model placed");

        Ok(ParallelUpdater {
            core,
            state: TrainingState::default(),
            converter: self
                .converter
                .unwrap_or_else(|| Arc::new(ConcatExamples::default())),
            loss_fn: self.loss_fn.unwrap_or_else(|| Arc::new(TargetLoss)),
            replicas,
            devices,
        })
    }
}
