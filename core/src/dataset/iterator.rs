use super::Example;
use crate::error::Result;
use crate::serializers::Serializer;

/// Produces batches of examples for an updater.
///
/// An iterator owns its position in the dataset. `epoch` counts completed
/// passes; `is_new_epoch` is true right after the batch that completed one.
pub trait DatasetIterator: Send {
    /// Returns the next batch.
    ///
    /// # Errors
    ///
    /// [`Error::StopIteration`](crate::Error::StopIteration) once a
    /// non-repeating iterator has been exhausted.
    fn next_batch(&mut self) -> Result<Vec<Example>>;

    fn batch_size(&self) -> usize;

    fn epoch(&self) -> usize;

    /// Epoch count including the fraction of the current epoch.
    fn epoch_detail(&self) -> f64;

    fn is_new_epoch(&self) -> bool;

    fn serialize(&mut self, serializer: &mut dyn Serializer) -> Result<()>;

    /// Releases resources. Called once when training ends.
    fn finalize(&mut self) {}
}
