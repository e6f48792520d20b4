//! Training orchestration.
//!
//! An [`Updater`] performs one optimization step per call: it pulls a batch
//! from its `"main"` iterator, converts it into model inputs, runs the loss and
//! its backward pass, and asks the `"main"` optimizer to apply the gradients.
//!
//! - [`StandardUpdater`]: single-device training, with an optional custom
//!   update function.
//! - [`ParallelUpdater`]: synchronous data-parallel training over several
//!   devices. The batch is split across model replicas, the replica gradients
//!   are summed into the main model, and the updated parameters are copied
//!   back to every replica.
//!
//! A [`Trainer`] drives an updater until its [`StopTrigger`] fires.

pub mod parallel;
pub mod reporter;
pub mod standard;
pub mod trainer;

pub use parallel::{split_batch, ParallelUpdater, ParallelUpdaterBuilder};
pub use reporter::{Observer, Reporter};
pub use standard::{StandardUpdater, StandardUpdaterBuilder, UpdateFn};
pub use trainer::{StopTrigger, Trainer};

use crate::dataset::DatasetIterator;
use crate::error::{Error, Result};
use crate::nn::Link;
use crate::optim::Optimizer;
use crate::serializers::{Serializer, SerializerExt};
use std::collections::BTreeMap;

/// Name of the default iterator, optimizer and model.
pub const MAIN: &str = "main";

/// Lifecycle of an updater.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Running,
    /// Terminal: no further updates are accepted.
    Finalized,
}

/// Iteration counter and lifecycle phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrainingState {
    iteration: u64,
    phase: Phase,
}

impl TrainingState {
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs one step and counts it if it succeeds.
    pub fn advance(&mut self, step: impl FnOnce() -> Result<()>) -> Result<()> {
        if self.phase == Phase::Finalized {
            return Err(Error::Finalized);
        }
        self.phase = Phase::Running;
        step()?;
        self.iteration += 1;
        Ok(())
    }

    pub fn finalize(&mut self) {
        self.phase = Phase::Finalized;
    }

    pub fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        s.value("iteration", &mut self.iteration)
    }
}

/// Iterators, optimizers and the reporter shared by every updater.
///
/// Both maps are keyed by name; the default update paths read the
/// [`MAIN`] entries.
#[derive(Default)]
pub struct UpdaterCore {
    iterators: BTreeMap<String, Box<dyn DatasetIterator>>,
    optimizers: BTreeMap<String, Box<dyn Optimizer>>,
    reporter: Option<Reporter>,
}

impl std::fmt::Debug for UpdaterCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterCore")
            .field("iterators", &self.iterators.keys().collect::<Vec<_>>())
            .field("optimizers", &self.optimizers.keys().collect::<Vec<_>>())
            .field("connected", &self.reporter.is_some())
            .finish()
    }
}

impl UpdaterCore {
    pub fn new(
        iterators: BTreeMap<String, Box<dyn DatasetIterator>>,
        optimizers: BTreeMap<String, Box<dyn Optimizer>>,
    ) -> Self {
        Self {
            iterators,
            optimizers,
            reporter: None,
        }
    }

    pub(crate) fn require_main(&self) -> Result<()> {
        if !self.iterators.contains_key(MAIN) || !self.optimizers.contains_key(MAIN) {
            return Err(Error::MissingKey(MAIN.into()));
        }
        Ok(())
    }

    pub fn iterator(&self, name: &str) -> Result<&dyn DatasetIterator> {
        self.iterators
            .get(name)
            .map(|it| it.as_ref())
            .ok_or_else(|| Error::NotFound(format!("iterator {:?}", name)))
    }

    pub fn iterator_mut(&mut self, name: &str) -> Result<&mut dyn DatasetIterator> {
        match self.iterators.get_mut(name) {
            Some(it) => Ok(it.as_mut()),
            None => Err(Error::NotFound(format!("iterator {:?}", name))),
        }
    }

    pub fn optimizer(&self, name: &str) -> Result<&dyn Optimizer> {
        self.optimizers
            .get(name)
            .map(|opt| opt.as_ref())
            .ok_or_else(|| Error::NotFound(format!("optimizer {:?}", name)))
    }

    pub fn optimizer_mut(&mut self, name: &str) -> Result<&mut dyn Optimizer> {
        match self.optimizers.get_mut(name) {
            Some(opt) => Ok(opt.as_mut()),
            None => Err(Error::NotFound(format!("optimizer {:?}", name))),
        }
    }

    pub fn optimizers(&self) -> BTreeMap<String, &dyn Optimizer> {
        self.optimizers
            .iter()
            .map(|(name, opt)| (name.clone(), opt.as_ref()))
            .collect()
    }

    pub fn reporter(&self) -> Option<&Reporter> {
        self.reporter.as_ref()
    }

    pub(crate) fn connect(&mut self, reporter: &Reporter) {
        self.reporter = Some(reporter.clone());
    }

    /// Reports `value` for `observer` if a trainer is connected and knows it.
    pub fn report(&self, observer: &str, key: &str, value: f32) -> Result<()> {
        match &self.reporter {
            Some(r) if r.has_observer(observer) => r.report(observer, key, value),
            _ => Ok(()),
        }
    }

    pub fn finalize(&mut self) {
        for it in self.iterators.values_mut() {
            it.finalize();
        }
    }

    /// Writes or restores every iterator, optimizer and optimizer target.
    pub fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        for (name, it) in self.iterators.iter_mut() {
            it.serialize(&mut *s.child(&format!("iterator:{}", name)))?;
        }
        for (name, opt) in self.optimizers.iter_mut() {
            opt.serialize(&mut *s.child(&format!("optimizer:{}", name)))?;
            Link::serialize(opt.target_mut()?, &mut *s.child(&format!("model:{}", name)))?;
        }
        Ok(())
    }
}

/// Interface the trainer drives.
///
/// Implementors must count every successful [`update`](Self::update) in
/// [`iteration`](Self::iteration); the trainer watches it to decide when to
/// stop.
pub trait Updater: Send {
    /// Called once by the trainer after construction. Registers additional
    /// observers with the reporter.
    fn connect_trainer(&mut self, _reporter: &Reporter) -> Result<()> {
        Ok(())
    }

    /// Releases iterator resources at the end of training.
    fn finalize(&mut self) -> Result<()> {
        Err(Error::NotImplemented("finalize".into()))
    }

    fn get_optimizer(&self, _name: &str) -> Result<&dyn Optimizer> {
        Err(Error::NotImplemented("get_optimizer".into()))
    }

    fn get_optimizer_mut(&mut self, _name: &str) -> Result<&mut dyn Optimizer> {
        Err(Error::NotImplemented("get_optimizer_mut".into()))
    }

    fn get_all_optimizers(&self) -> Result<BTreeMap<String, &dyn Optimizer>> {
        Err(Error::NotImplemented("get_all_optimizers".into()))
    }

    fn get_iterator(&self, _name: &str) -> Result<&dyn DatasetIterator> {
        Err(Error::NotImplemented("get_iterator".into()))
    }

    /// Performs one optimization step.
    fn update(&mut self) -> Result<()> {
        Err(Error::NotImplemented("update".into()))
    }

    /// Number of completed updates.
    fn iteration(&self) -> u64;

    fn epoch(&self) -> Result<usize> {
        Ok(self.get_iterator(MAIN)?.epoch())
    }

    fn epoch_detail(&self) -> Result<f64> {
        Ok(self.get_iterator(MAIN)?.epoch_detail())
    }

    fn is_new_epoch(&self) -> Result<bool> {
        Ok(self.get_iterator(MAIN)?.is_new_epoch())
    }

    fn serialize(&mut self, _serializer: &mut dyn Serializer) -> Result<()> {
        Err(Error::NotImplemented("serialize".into()))
    }
}
