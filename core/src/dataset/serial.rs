//! Sequential dataset iterator.

use super::{Dataset, DatasetIterator, Example};
use crate::error::{Error, Result};
use crate::serializers::{Serializer, SerializerExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Walks a dataset in order (or in a shuffled order) and returns fixed-size
/// batches.
///
/// With `repeat`, the iterator wraps around at the end of an epoch and fills
/// the last batch from the start of the next one. Without it, the final batch
/// of the single epoch may be short and every later call fails with
/// [`Error::StopIteration`].
///
/// When shuffling, the order is redrawn at every epoch boundary.
pub struct SerialIterator<D = Vec<Example>>
where
    D: Dataset,
{
    dataset: D,
    batch_size: usize,
    repeat: bool,
    order: Option<Vec<usize>>,
    rng: StdRng,
    current_position: usize,
    epoch: usize,
    is_new_epoch: bool,
}

impl<D: Dataset> std::fmt::Debug for SerialIterator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialIterator")
            .field("len", &self.dataset.len())
            .field("batch_size", &self.batch_size)
            .field("repeat", &self.repeat)
            .field("shuffle", &self.order.is_some())
            .field("current_position", &self.current_position)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl<D: Dataset> SerialIterator<D> {
    /// Creates an iterator.
    ///
    /// # Arguments
    ///
    /// * `dataset` - Examples to iterate over.
    /// * `batch_size` - Number of examples per batch.
    /// * `repeat` - Whether to loop over the dataset indefinitely.
    /// * `shuffle` - Whether to visit examples in a random order.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `batch_size` is zero or the dataset is empty.
    pub fn new(dataset: D, batch_size: usize, repeat: bool, shuffle: bool) -> Result<Self> {
        Self::build(dataset, batch_size, repeat, shuffle, StdRng::from_rng(&mut rand::rng()))
    }

    /// Like [`new`](Self::new), with a fixed shuffling seed.
    pub fn with_seed(
        dataset: D,
        batch_size: usize,
        repeat: bool,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        Self::build(dataset, batch_size, repeat, shuffle, StdRng::seed_from_u64(seed))
    }

    fn build(dataset: D, batch_size: usize, repeat: bool, shuffle: bool, mut rng: StdRng) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be positive".into()));
        }
        if dataset.is_empty() {
            return Err(Error::InvalidArgument("dataset is empty".into()));
        }
        let order = shuffle.then(|| {
            let mut order: Vec<usize> = (0..dataset.len()).collect();
            order.shuffle(&mut rng);
            order
        });
        Ok(Self {
            dataset,
            batch_size,
            repeat,
            order,
            rng,
            current_position: 0,
            epoch: 0,
            is_new_epoch: false,
        })
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn current_position(&self) -> usize {
        self.current_position
    }

    fn fetch(&self, range: std::ops::Range<usize>, batch: &mut Vec<Example>) {
        match &self.order {
            Some(order) => batch.extend(order[range].iter().map(|&i| self.dataset.example(i))),
            None => batch.extend(range.map(|i| self.dataset.example(i))),
        }
    }
}

impl<D: Dataset> DatasetIterator for SerialIterator<D> {
    fn next_batch(&mut self) -> Result<Vec<Example>> {
        if !self.repeat && self.epoch > 0 {
            return Err(Error::StopIteration);
        }

        let n = self.dataset.len();
        let i = self.current_position;
        let i_end = i + self.batch_size;

        let mut batch = Vec::with_capacity(self.batch_size);
        self.fetch(i.min(n)..i_end.min(n), &mut batch);

        if i_end >= n {
            if self.repeat {
                let rest = i_end - n;
                if let Some(order) = self.order.as_mut() {
                    order.shuffle(&mut self.rng);
                }
                if rest > 0 {
                    self.fetch(0..rest.min(n), &mut batch);
                }
                self.current_position = rest.min(n);
            } else {
                self.current_position = 0;
            }
            self.epoch += 1;
            self.is_new_epoch = true;
        } else {
            self.is_new_epoch = false;
            self.current_position = i_end;
        }

        Ok(batch)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn epoch(&self) -> usize {
        self.epoch
    }

    fn epoch_detail(&self) -> f64 {
        self.epoch as f64 + self.current_position as f64 / self.dataset.len() as f64
    }

    fn is_new_epoch(&self) -> bool {
        self.is_new_epoch
    }

    /// Restored state is validated against the dataset before it replaces
    /// the current state.
    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        let mut current_position = self.current_position;
        let mut epoch = self.epoch;
        let mut is_new_epoch = self.is_new_epoch;
        let mut order = self.order.clone();
        s.value("current_position", &mut current_position)?;
        s.value("epoch", &mut epoch)?;
        s.value("is_new_epoch", &mut is_new_epoch)?;
        if let Some(order) = order.as_mut() {
            s.value("order", order)?;
        }

        let n = self.dataset.len();
        if current_position > n {
            return Err(Error::Serialization(format!(
                "position {} is past the end of a dataset of {}",
                current_position, n
            )));
        }
        if let Some(order) = &order {
            if !is_permutation(order, n) {
                return Err(Error::Serialization(format!(
                    "stored order is not a permutation of {} indices",
                    n
                )));
            }
        }

        self.current_position = current_position;
        self.epoch = epoch;
        self.is_new_epoch = is_new_epoch;
        self.order = order;
        Ok(())
    }
}

fn is_permutation(order: &[usize], n: usize) -> bool {
    if order.len() != n {
        return false;
    }
    let mut seen = vec![false; n];
    order
        .iter()
        .all(|&i| i < n && !std::mem::replace(&mut seen[i], true))
}
