//! Checkpoint files.
//!
//! A [`StateDict`] is written with the `safetensors` format, one tensor per key
//! path. Scalars are stored as zero-rank tensors.

use super::dict::{load_state_dict, to_state_dict, StateDict};
use super::{Record, Serializable};
use crate::error::{Error, Result};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::HashMap;
use std::path::Path;

fn encode(record: &Record) -> (Dtype, Vec<usize>, Vec<u8>) {
    match record {
        Record::Array { shape, data } => (
            Dtype::F32,
            shape.clone(),
            data.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ),
        Record::Int(v) => (Dtype::I64, vec![], v.to_le_bytes().to_vec()),
        Record::Float(v) => (Dtype::F64, vec![], v.to_le_bytes().to_vec()),
        Record::Bool(v) => (Dtype::BOOL, vec![], vec![u8::from(*v)]),
        Record::Indices(v) => (
            Dtype::U64,
            vec![v.len()],
            v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ),
    }
}

fn words<const N: usize>(bytes: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    bytes.chunks_exact(N).map(|chunk| {
        let mut buf = [0u8; N];
        buf.copy_from_slice(chunk);
        buf
    })
}

fn first_word<const N: usize>(name: &str, bytes: &[u8]) -> Result<[u8; N]> {
    words::<N>(bytes)
        .next()
        .ok_or_else(|| Error::Serialization(format!("entry {:?} has no data", name)))
}

fn decode(name: &str, dtype: Dtype, shape: &[usize], bytes: &[u8]) -> Result<Record> {
    match dtype {
        Dtype::F32 => Ok(Record::Array {
            shape: shape.to_vec(),
            data: words::<4>(bytes).map(f32::from_le_bytes).collect(),
        }),
        Dtype::I64 => Ok(Record::Int(i64::from_le_bytes(first_word(name, bytes)?))),
        Dtype::F64 => Ok(Record::Float(f64::from_le_bytes(first_word(name, bytes)?))),
        Dtype::BOOL => Ok(Record::Bool(first_word::<1>(name, bytes)?[0] != 0)),
        Dtype::U64 => Ok(Record::Indices(words::<8>(bytes).map(u64::from_le_bytes).collect())),
        other => Err(Error::Serialization(format!(
            "entry {:?} has unsupported dtype {:?}",
            name, other
        ))),
    }
}

/// Saves a state dict to a safetensors file.
pub fn save_state<P: AsRef<Path>>(path: P, state: &StateDict) -> Result<()> {
    let encoded: Vec<(&String, (Dtype, Vec<usize>, Vec<u8>))> =
        state.iter().map(|(k, r)| (k, encode(r))).collect();

    let mut views = HashMap::new();
    for (name, (dtype, shape, bytes)) in &encoded {
        let view = TensorView::new(*dtype, shape.clone(), bytes)
            .map_err(|e| Error::Serialization(format!("entry {:?}: {:?}", name, e)))?;
        views.insert(name.to_string(), view);
    }

    let metadata: Option<HashMap<String, String>> = None;
    safetensors::serialize_to_file(&views, metadata, path.as_ref())
        .map_err(|e| Error::Serialization(format!("failed to save checkpoint: {:?}", e)))?;
    tracing::debug!(path = %path.as_ref().display(), entries = state.len(), "checkpoint saved");
    Ok(())
}

/// Loads a state dict from a safetensors file.
pub fn load_state<P: AsRef<Path>>(path: P) -> Result<StateDict> {
    let bytes = std::fs::read(path.as_ref())?;
    let file = SafeTensors::deserialize(&bytes)
        .map_err(|e| Error::Serialization(format!("failed to read checkpoint: {:?}", e)))?;

    let mut state = StateDict::new();
    for (name, view) in file.tensors() {
        let record = decode(&name, view.dtype(), view.shape(), view.data())?;
        state.insert(name, record);
    }
    Ok(state)
}

/// Serializes `obj` and writes it to `path`.
pub fn save_checkpoint<P: AsRef<Path>, S: Serializable + ?Sized>(path: P, obj: &mut S) -> Result<()> {
    let state = to_state_dict(obj)?;
    save_state(path, &state)
}

/// Reads `path` and restores `obj` from it. Every entry `obj` asks for must be present.
pub fn load_checkpoint<P: AsRef<Path>, S: Serializable + ?Sized>(path: P, obj: &mut S) -> Result<()> {
    let state = load_state(path)?;
    load_state_dict(obj, &state, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_are_zero_rank() {
        let (dtype, shape, bytes) = encode(&Record::Int(-42));
        assert_eq!(dtype, Dtype::I64);
        assert!(shape.is_empty());
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn test_decode_empty_scalar_fails() {
        assert!(decode("x", Dtype::I64, &[], &[]).is_err());
    }
}
