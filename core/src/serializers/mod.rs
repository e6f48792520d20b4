//! Serialization protocol.
//!
//! Stateful objects (links, optimizers, iterators, updaters) describe their state
//! by walking a [`Serializer`]: they open a child per sub-object and record one
//! value per leaf. The same walk is used for saving and loading; a saving
//! serializer stores the values it is given, a loading one hands back the
//! stored values.
//!
//! Key paths are slash-delimited. A child opened with key `k` under path `p`
//! has path `p + k + "/"`, and a leaf `v` recorded there is stored as `p + k + "/" + v`.
//!
//! ```rust
//! use dptrain::serializers::{DictionarySerializer, Serializer, SerializerExt, StateDict};
//!
//! let mut target = StateDict::new();
//! let mut s = DictionarySerializer::new(&mut target);
//! let mut iteration = 7u64;
//! s.child("updater").value("iteration", &mut iteration).unwrap();
//! assert!(target.contains_key("updater/iteration"));
//! ```

pub mod checkpoint;
pub mod dict;

pub use checkpoint::{load_checkpoint, load_state, save_checkpoint, save_state};
pub use dict::{load_state_dict, to_state_dict, DictionaryDeserializer, DictionarySerializer, StateDict};

use crate::array::Array;
use crate::error::{Error, Result};

/// A single stored value.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Array { shape: Vec<usize>, data: Vec<f32> },
    Int(i64),
    Float(f64),
    Bool(bool),
    Indices(Vec<u64>),
}

impl Record {
    fn kind(&self) -> &'static str {
        match self {
            Record::Array { .. } => "array",
            Record::Int(_) => "int",
            Record::Float(_) => "float",
            Record::Bool(_) => "bool",
            Record::Indices(_) => "indices",
        }
    }

    fn unexpected(&self, wanted: &str) -> Error {
        Error::Serialization(format!("expected {} record, found {}", wanted, self.kind()))
    }
}

/// Visitor over an object's state.
pub trait Serializer {
    /// Opens the sub-hierarchy named `key`.
    fn child(&mut self, key: &str) -> Box<dyn Serializer + '_>;

    /// Records `value` under `key`.
    ///
    /// Returns the value the caller should keep: `value` itself when saving, the
    /// stored value when loading.
    fn record(&mut self, key: &str, value: Record) -> Result<Record>;

    fn is_loading(&self) -> bool;
}

/// Values that can be stored as a [`Record`].
pub trait Persist {
    /// # Errors
    ///
    /// [`Error::Serialization`] if the value cannot be represented as a record.
    fn to_record(&self) -> Result<Record>;

    /// Overwrites `self` with a loaded record.
    fn load(&mut self, record: Record) -> Result<()>;
}

/// Typed access on top of [`Serializer::record`].
pub trait SerializerExt: Serializer {
    /// Saves or restores `value` under `key`, depending on the direction of
    /// the serializer.
    fn value<T: Persist + ?Sized>(&mut self, key: &str, value: &mut T) -> Result<()> {
        let stored = self.record(key, value.to_record()?)?;
        if self.is_loading() {
            value.load(stored)?;
        }
        Ok(())
    }
}

impl<S: Serializer + ?Sized> SerializerExt for S {}

/// Objects that can save and restore themselves through a [`Serializer`].
pub trait Serializable {
    fn serialize(&mut self, serializer: &mut dyn Serializer) -> Result<()>;
}

macro_rules! persist_int {
    ($($t:ty),*) => {
        $(
            impl Persist for $t {
                fn to_record(&self) -> Result<Record> {
                    i64::try_from(*self).map(Record::Int).map_err(|_| {
                        Error::Serialization(format!(
                            "{} does not fit in a stored int",
                            self
                        ))
                    })
                }

                fn load(&mut self, record: Record) -> Result<()> {
                    match record {
                        Record::Int(v) => {
                            *self = <$t>::try_from(v).map_err(|_| {
                                Error::Serialization(format!(
                                    "{} out of range for {}",
                                    v,
                                    stringify!($t)
                                ))
                            })?;
                            Ok(())
                        }
                        other => Err(other.unexpected("int")),
                    }
                }
            }
        )*
    };
}

persist_int!(u64, usize, i64);

impl Persist for f64 {
    fn to_record(&self) -> Result<Record> {
        Ok(Record::Float(*self))
    }

    fn load(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Float(v) => *self = v,
            Record::Int(v) => *self = v as f64,
            other => return Err(other.unexpected("float")),
        }
        Ok(())
    }
}

impl Persist for f32 {
    fn to_record(&self) -> Result<Record> {
        Ok(Record::Float(f64::from(*self)))
    }

    fn load(&mut self, record: Record) -> Result<()> {
        let mut v = f64::from(*self);
        v.load(record)?;
        *self = v as f32;
        Ok(())
    }
}

impl Persist for bool {
    fn to_record(&self) -> Result<Record> {
        Ok(Record::Bool(*self))
    }

    fn load(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Bool(v) => {
                *self = v;
                Ok(())
            }
            other => Err(other.unexpected("bool")),
        }
    }
}

impl Persist for Vec<usize> {
    fn to_record(&self) -> Result<Record> {
        Ok(Record::Indices(self.iter().map(|&i| i as u64).collect()))
    }

    fn load(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Indices(v) => {
                *self = v
                    .into_iter()
                    .map(|i| {
                        usize::try_from(i).map_err(|_| {
                            Error::Serialization(format!("index {} out of range", i))
                        })
                    })
                    .collect::<Result<_>>()?;
                Ok(())
            }
            other => Err(other.unexpected("indices")),
        }
    }
}

/// Arrays are stored from host memory and loaded back in place: the target
/// keeps its device and must already have the stored shape.
impl Persist for Array {
    fn to_record(&self) -> Result<Record> {
        Ok(Record::Array {
            shape: self.shape().to_vec(),
            data: self.data().to_vec(),
        })
    }

    fn load(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Array { shape, data } => {
                if shape != self.shape() {
                    return Err(Error::ShapeMismatch {
                        expected: self.shape().to_vec(),
                        got: shape,
                    });
                }
                if data.len() != self.size() {
                    return Err(Error::Serialization(format!(
                        "array record holds {} values, shape {:?} needs {}",
                        data.len(),
                        shape,
                        self.size()
                    )));
                }
                self.data_mut().copy_from_slice(&data);
                Ok(())
            }
            other => Err(other.unexpected("array")),
        }
    }
}
