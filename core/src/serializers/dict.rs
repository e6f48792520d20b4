//! In-memory serializers over a flat path → record map.

use super::{Record, Serializable, Serializer};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Flat map from key path to stored value.
pub type StateDict = BTreeMap<String, Record>;

/// Saves an object hierarchy into a [`StateDict`].
#[derive(Debug)]
pub struct DictionarySerializer<'a> {
    target: &'a mut StateDict,
    path: String,
}

impl<'a> DictionarySerializer<'a> {
    pub fn new(target: &'a mut StateDict) -> Self {
        Self::with_path(target, "")
    }

    /// Serializer rooted at `path`. `path` should be empty or end with `/`.
    pub fn with_path(target: &'a mut StateDict, path: impl Into<String>) -> Self {
        Self {
            target,
            path: path.into(),
        }
    }
}

impl Serializer for DictionarySerializer<'_> {
    fn child(&mut self, key: &str) -> Box<dyn Serializer + '_> {
        Box::new(DictionarySerializer {
            target: &mut *self.target,
            path: format!("{}{}/", self.path, key),
        })
    }

    fn record(&mut self, key: &str, value: Record) -> Result<Record> {
        self.target
            .insert(format!("{}{}", self.path, key), value.clone());
        Ok(value)
    }

    fn is_loading(&self) -> bool {
        false
    }
}

/// Restores an object hierarchy from a [`StateDict`].
///
/// In strict mode a missing key is an error; otherwise the current value is
/// left as it is.
#[derive(Debug)]
pub struct DictionaryDeserializer<'a> {
    source: &'a StateDict,
    path: String,
    strict: bool,
}

impl<'a> DictionaryDeserializer<'a> {
    pub fn new(source: &'a StateDict) -> Self {
        Self {
            source,
            path: String::new(),
            strict: true,
        }
    }

    pub fn non_strict(source: &'a StateDict) -> Self {
        Self {
            strict: false,
            ..Self::new(source)
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

impl Serializer for DictionaryDeserializer<'_> {
    fn child(&mut self, key: &str) -> Box<dyn Serializer + '_> {
        Box::new(DictionaryDeserializer {
            source: self.source,
            path: format!("{}{}/", self.path, key),
            strict: self.strict,
        })
    }

    fn record(&mut self, key: &str, value: Record) -> Result<Record> {
        let path = format!("{}{}", self.path, key);
        match self.source.get(&path) {
            Some(stored) => Ok(stored.clone()),
            None if self.strict => Err(Error::NotFound(format!("serialized entry {:?}", path))),
            None => Ok(value),
        }
    }

    fn is_loading(&self) -> bool {
        true
    }
}

/// Collects the state of `obj` into a fresh [`StateDict`].
pub fn to_state_dict<S: Serializable + ?Sized>(obj: &mut S) -> Result<StateDict> {
    let mut target = StateDict::new();
    obj.serialize(&mut DictionarySerializer::new(&mut target))?;
    Ok(target)
}

/// Restores `obj` from `state`.
pub fn load_state_dict<S: Serializable + ?Sized>(
    obj: &mut S,
    state: &StateDict,
    strict: bool,
) -> Result<()> {
    let mut d = if strict {
        DictionaryDeserializer::new(state)
    } else {
        DictionaryDeserializer::non_strict(state)
    };
    obj.serialize(&mut d)
}
