//! Datasets, iterators and batch conversion.
//!
//! # Components
//!
//! - **Dataset**: indexed access to examples.
//! - **DatasetIterator**: produces batches of examples and tracks epochs.
//! - **Converter**: turns a batch of examples into device-resident [`Inputs`].

pub mod convert;
pub mod iterator;
pub mod serial;

pub use convert::{concat_examples, ConcatExamples, Converter, Inputs};
pub use iterator::DatasetIterator;
pub use serial::SerialIterator;

use std::sync::Arc;

/// One training example: the arrays of a single sample, positional or named.
pub type Example = Inputs;

/// Random-access collection of examples.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Example at `index`. Callers only pass indices below [`len`](Self::len).
    fn example(&self, index: usize) -> Example;
}

impl Dataset for Vec<Example> {
    fn len(&self) -> usize {
        self.len()
    }

    fn example(&self, index: usize) -> Example {
        self[index].clone()
    }
}

/// Lets several iterators walk one dataset.
impl<D: Dataset + ?Sized> Dataset for Arc<D> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn example(&self, index: usize) -> Example {
        (**self).example(index)
    }
}
