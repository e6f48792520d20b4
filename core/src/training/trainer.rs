use super::{Reporter, Updater};
use crate::error::{Error, Result};

/// When training stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopTrigger {
    /// After this many updates.
    Iteration(u64),
    /// After this many completed epochs of the main iterator.
    Epoch(usize),
}

impl StopTrigger {
    pub fn should_stop(&self, updater: &dyn Updater) -> Result<bool> {
        Ok(match *self {
            StopTrigger::Iteration(n) => updater.iteration() >= n,
            StopTrigger::Epoch(n) => updater.epoch()? >= n,
        })
    }
}

/// Runs an updater until the stop trigger fires.
///
/// On construction every optimizer target is registered with the reporter
/// under its optimizer's name, then the updater is connected. The updater is
/// finalized when [`run`](Self::run) returns, whether training succeeded or
/// not. A non-repeating iterator running out ends training normally.
#[derive(Debug)]
pub struct Trainer<U: Updater> {
    updater: U,
    stop: StopTrigger,
    reporter: Reporter,
}

impl<U: Updater> Trainer<U> {
    pub fn new(mut updater: U, stop: StopTrigger) -> Result<Self> {
        let reporter = Reporter::new();
        for (name, optimizer) in updater.get_all_optimizers()? {
            reporter.add_observer(&name, optimizer.target()?);
        }
        updater.connect_trainer(&reporter)?;
        Ok(Self {
            updater,
            stop,
            reporter,
        })
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }

    pub fn updater_mut(&mut self) -> &mut U {
        &mut self.updater
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn into_updater(self) -> U {
        self.updater
    }

    pub fn run(&mut self) -> Result<()> {
        let result = self.run_loop();
        let finalized = self.updater.finalize();
        result.and(finalized)
    }

    fn run_loop(&mut self) -> Result<()> {
        while !self.stop.should_stop(&self.updater)? {
            self.reporter.clear_observation();
            match self.updater.update() {
                Ok(()) => {}
                Err(Error::StopIteration) => {
                    tracing::info!(iteration = self.updater.iteration(), "iterator exhausted");
                    break;
                }
                Err(e) => return Err(e),
            }
            if self.updater.is_new_epoch()? {
                tracing::info!(
                    epoch = self.updater.epoch()?,
                    iteration = self.updater.iteration(),
                    observation = ?self.reporter.observation(),
                    "epoch completed"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::dataset::{Inputs, SerialIterator};
    use crate::nn::{Linear, Regressor};
    use crate::optim::{Optimizer, Sgd};
    use crate::training::{Phase, StandardUpdater};

    fn updater(repeat: bool) -> StandardUpdater {
        let data: Vec<Inputs> = (0..4)
            .map(|i| Inputs::Positional(vec![Array::new(vec![i as f32], [1]).unwrap(), Array::scalar(1.0)]))
            .collect();
        let it = SerialIterator::new(data, 2, repeat, false).unwrap();
        let mut opt = Sgd::new(0.1);
        opt.setup(Box::new(Regressor::new(
            Linear::from_params(Array::zeros(&[1, 1]), Some(Array::zeros(&[1]))).unwrap(),
        )));
        StandardUpdater::new(Box::new(it), Box::new(opt))
    }

    #[test]
    fn test_iteration_trigger() {
        let mut trainer = Trainer::new(updater(true), StopTrigger::Iteration(5)).unwrap();
        trainer.run().unwrap();
        assert_eq!(trainer.updater().iteration(), 5);
        assert_eq!(trainer.updater().state().phase(), Phase::Finalized);
        assert!(trainer.reporter().has_observer("main"));
        assert!(trainer.reporter().observation().contains_key("main/loss"));
    }

    #[test]
    fn test_epoch_trigger() {
        let mut trainer = Trainer::new(updater(true), StopTrigger::Epoch(3)).unwrap();
        trainer.run().unwrap();
        assert_eq!(trainer.updater().iteration(), 6);
    }

    #[test]
    fn test_exhausted_iterator_ends_training() {
        let mut trainer = Trainer::new(updater(false), StopTrigger::Iteration(100)).unwrap();
        trainer.run().unwrap();
        assert_eq!(trainer.updater().iteration(), 2);
    }
}
