//! Model checkpoints as a single safetensors file.

use std::{borrow::Cow, collections::HashMap, fs, path::Path};

use safetensors::{Dtype, SafeTensors, View, tensor::Metadata};

use crate::{
    MlErr, Result,
    arch::{StateDict, Tensor},
};

impl View for &Tensor {
    fn dtype(&self) -> Dtype {
        Dtype::F32
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        if cfg!(target_endian = "little") {
            Cow::Borrowed(bytemuck::cast_slice(&self.data))
        } else {
            Cow::Owned(self.data.iter().flat_map(|v| v.to_le_bytes()).collect())
        }
    }

    fn data_len(&self) -> usize {
        self.data.len() * size_of::<f32>()
    }
}

/// Writes `dict` and `metadata` to `path`, creating its parent directory if needed.
pub fn save(path: &Path, dict: &StateDict, metadata: HashMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let metadata = (!metadata.is_empty()).then_some(metadata);
    safetensors::serialize_to_file(dict.iter(), &metadata, path)?;
    Ok(())
}

/// Reads back a checkpoint written by [`save`].
///
/// # Returns
/// The state dict and the metadata, or an error if a tensor isn't `f32`.
pub fn load(path: &Path) -> Result<(StateDict, HashMap<String, String>)> {
    let bytes = fs::read(path)?;
    let (_, header): (usize, Metadata) = SafeTensors::read_metadata(&bytes)?;
    let metadata = header.metadata().clone().unwrap_or_default();

    let tensors = SafeTensors::deserialize(&bytes)?;
    let mut dict = StateDict::new();

    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(MlErr::Checkpoint(format!(
                "{name} has dtype {:?}, expected F32",
                view.dtype()
            )));
        }

        let data = view
            .data()
            .chunks_exact(size_of::<f32>())
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let tensor = Tensor {
            shape: view.shape().to_vec(),
            data,
        };
        dict.insert(name, tensor);
    }

    Ok((dict, metadata))
}
