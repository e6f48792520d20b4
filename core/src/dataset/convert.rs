//! Batch conversion.

use super::Example;
use crate::array::{Array, Device};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Converted model inputs.
///
/// A loss function receives exactly one of these shapes and must handle it
/// explicitly.
#[derive(Clone, Debug, PartialEq)]
pub enum Inputs<A = Array> {
    /// Arrays passed by position, e.g. `(x, t)`.
    Positional(Vec<A>),
    /// Arrays passed by name, e.g. `{"x": .., "t": ..}`.
    Named(BTreeMap<String, A>),
    /// A single array.
    Single(A),
}

impl<A> Inputs<A> {
    /// Number of arrays.
    pub fn len(&self) -> usize {
        match self {
            Inputs::Positional(v) => v.len(),
            Inputs::Named(m) => m.len(),
            Inputs::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn variant(&self) -> &'static str {
        match self {
            Inputs::Positional(_) => "positional",
            Inputs::Named(_) => "named",
            Inputs::Single(_) => "single",
        }
    }

    /// Applies `f` to every array, keeping the structure.
    pub fn try_map<B>(self, mut f: impl FnMut(A) -> Result<B>) -> Result<Inputs<B>> {
        Ok(match self {
            Inputs::Positional(v) => Inputs::Positional(v.into_iter().map(f).collect::<Result<_>>()?),
            Inputs::Named(m) => Inputs::Named(
                m.into_iter()
                    .map(|(k, a)| Ok((k, f(a)?)))
                    .collect::<Result<_>>()?,
            ),
            Inputs::Single(a) => Inputs::Single(f(a)?),
        })
    }
}

impl Inputs<Array> {
    /// Moves every array onto `device`.
    pub fn into_device(self, device: Device) -> Self {
        match self {
            Inputs::Positional(v) => {
                Inputs::Positional(v.into_iter().map(|a| a.into_device(device)).collect())
            }
            Inputs::Named(m) => Inputs::Named(
                m.into_iter()
                    .map(|(k, a)| (k, a.into_device(device)))
                    .collect(),
            ),
            Inputs::Single(a) => Inputs::Single(a.into_device(device)),
        }
    }
}

/// Maps a batch of examples to model inputs on a device.
pub trait Converter: Send + Sync {
    fn convert(&self, batch: &[Example], device: Device) -> Result<Inputs>;
}

impl<F> Converter for F
where
    F: Fn(&[Example], Device) -> Result<Inputs> + Send + Sync,
{
    fn convert(&self, batch: &[Example], device: Device) -> Result<Inputs> {
        self(batch, device)
    }
}

/// The default converter: stacks each field of the examples along a new
/// leading batch axis.
///
/// With `padding` set, arrays of equal rank but different shapes are padded
/// up to the largest shape instead of being rejected.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConcatExamples {
    pub padding: Option<f32>,
}

impl ConcatExamples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_padding(padding: f32) -> Self {
        Self {
            padding: Some(padding),
        }
    }

    fn stack(&self, arrays: &[&Array]) -> Result<Array> {
        match self.padding {
            Some(p) => Array::stack_padded(arrays, p),
            None => Array::stack(arrays),
        }
    }
}

fn mismatch(first: &Example, other: &Example) -> Error {
    Error::InvalidArgument(format!(
        "examples in a batch must share one structure, found {} and {}",
        first.variant(),
        other.variant()
    ))
}

impl Converter for ConcatExamples {
    fn convert(&self, batch: &[Example], device: Device) -> Result<Inputs> {
        let first = batch
            .first()
            .ok_or_else(|| Error::InvalidArgument("batch is empty".into()))?;

        let inputs = match first {
            Inputs::Positional(fields) => {
                let mut columns: Vec<Vec<&Array>> = vec![Vec::with_capacity(batch.len()); fields.len()];
                for example in batch {
                    match example {
                        Inputs::Positional(v) if v.len() == fields.len() => {
                            for (column, a) in columns.iter_mut().zip(v.iter()) {
                                column.push(a);
                            }
                        }
                        Inputs::Positional(v) => {
                            return Err(Error::InvalidArgument(format!(
                                "examples have {} and {} fields",
                                fields.len(),
                                v.len()
                            )))
                        }
                        other => return Err(mismatch(first, other)),
                    }
                }
                Inputs::Positional(
                    columns
                        .iter()
                        .map(|c| self.stack(c))
                        .collect::<Result<_>>()?,
                )
            }
            Inputs::Named(fields) => {
                let mut columns: BTreeMap<&str, Vec<&Array>> =
                    fields.keys().map(|k| (k.as_str(), Vec::new())).collect();
                for example in batch {
                    match example {
                        Inputs::Named(m) => {
                            if m.len() != columns.len() {
                                return Err(Error::InvalidArgument(
                                    "examples have different keys".into(),
                                ));
                            }
                            for (k, a) in m {
                                columns
                                    .get_mut(k.as_str())
                                    .ok_or_else(|| Error::InvalidArgument(format!("unexpected key {:?}", k)))?
                                    .push(a);
                            }
                        }
                        other => return Err(mismatch(first, other)),
                    }
                }
                Inputs::Named(
                    columns
                        .into_iter()
                        .map(|(k, c)| Ok((k.to_string(), self.stack(&c)?)))
                        .collect::<Result<_>>()?,
                )
            }
            Inputs::Single(_) => {
                let column = batch
                    .iter()
                    .map(|example| match example {
                        Inputs::Single(a) => Ok(a),
                        other => Err(mismatch(first, other)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Inputs::Single(self.stack(&column)?)
            }
        };
        Ok(inputs.into_device(device))
    }
}

/// Stacks a batch with [`ConcatExamples`] and moves it onto `device`.
///
/// ```rust
/// use dptrain::array::{Array, Device};
/// use dptrain::dataset::{concat_examples, Inputs};
///
/// let batch = vec![
///     Inputs::Positional(vec![Array::new(vec![1.0, 2.0], [2]).unwrap(), Array::scalar(0.0)]),
///     Inputs::Positional(vec![Array::new(vec![3.0, 4.0], [2]).unwrap(), Array::scalar(1.0)]),
/// ];
/// let Inputs::Positional(arrays) = concat_examples(&batch, Device::Cpu).unwrap() else {
///     unreachable!()
/// };
/// assert_eq!(arrays[0].shape(), &[2, 2]);
/// assert_eq!(arrays[1].shape(), &[2]);
/// ```
pub fn concat_examples(batch: &[Example], device: Device) -> Result<Inputs> {
    ConcatExamples::new().convert(batch, device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(x: f32, t: f32) -> Example {
        let mut m = BTreeMap::new();
        m.insert("x".to_string(), Array::new(vec![x], [1]).unwrap());
        m.insert("t".to_string(), Array::scalar(t));
        Inputs::Named(m)
    }

    #[test]
    fn test_concat_named() {
        let batch = vec![named(1.0, 0.0), named(2.0, 1.0), named(3.0, 0.0)];
        let Inputs::Named(out) = concat_examples(&batch, Device::Gpu(1)).unwrap() else {
            panic!("expected named inputs");
        };
        assert_eq!(out["x"].shape(), &[3, 1]);
        assert_eq!(out["t"].data(), &[0.0, 1.0, 0.0]);
        assert_eq!(out["x"].device(), Device::Gpu(1));
    }

    #[test]
    fn test_concat_single() {
        let batch = vec![
            Inputs::Single(Array::new(vec![1.0, 2.0], [2]).unwrap()),
            Inputs::Single(Array::new(vec![3.0, 4.0], [2]).unwrap()),
        ];
        let out = concat_examples(&batch, Device::Cpu).unwrap();
        assert_eq!(
            out,
            Inputs::Single(Array::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap())
        );
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(
            concat_examples(&[], Device::Cpu),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mixed_structure() {
        let batch = vec![named(1.0, 0.0), Inputs::Single(Array::scalar(1.0))];
        assert!(matches!(
            concat_examples(&batch, Device::Cpu),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_padding() {
        let batch = vec![
            Inputs::Single(Array::new(vec![1.0], [1]).unwrap()),
            Inputs::Single(Array::new(vec![2.0, 3.0], [2]).unwrap()),
        ];
        assert!(concat_examples(&batch, Device::Cpu).is_err());

        let Inputs::Single(out) = ConcatExamples::with_padding(-1.0)
            .convert(&batch, Device::Cpu)
            .unwrap()
        else {
            panic!("expected single input");
        };
        assert_eq!(out.data(), &[1.0, -1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_closure_converter() {
        let first_only = |batch: &[Example], device: Device| -> Result<Inputs> {
            concat_examples(&batch[..1], device)
        };
        let batch = vec![
            Inputs::Single(Array::scalar(1.0)),
            Inputs::Single(Array::scalar(2.0)),
        ];
        let Inputs::Single(out) = first_only.convert(&batch, Device::Cpu).unwrap() else {
            panic!("expected single input");
        };
        assert_eq!(out.data(), &[1.0]);
    }
}
