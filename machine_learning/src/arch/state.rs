use std::collections::BTreeMap;

use ndarray::{ArrayView2, ArrayViewMut2};

use super::{Model, ParamKind, ParamSpec};
use crate::{MlErr, Result};

/// A named dense `f32` tensor in row major order.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// The exported parameters of a model, keyed by name.
pub type StateDict = BTreeMap<String, Tensor>;

/// Exports `params` under the names and shapes given by `model.param_specs()`. Weight
/// matrices are transposed to `[out, in]`.
pub fn state_dict<M: Model>(model: &M, params: &[f32]) -> Result<StateDict> {
    check_size(model, params.len())?;

    model
        .param_specs()
        .into_iter()
        .map(|spec| -> Result<(String, Tensor)> {
            let raw = &params[spec.offset..spec.offset + spec.len()];
            let data = match spec.kind {
                ParamKind::Weight { fan_in, fan_out } => {
                    ArrayView2::from_shape((fan_in, fan_out), raw)?
                        .t()
                        .iter()
                        .copied()
                        .collect()
                }
                ParamKind::Bias { .. } => raw.to_vec(),
            };

            let tensor = Tensor {
                shape: spec.shape(),
                data,
            };
            Ok((spec.name, tensor))
        })
        .collect()
}

/// Writes the tensors of `dict` back into `params`. Every parameter of the model must be
/// present with its exported shape and no extra keys are allowed.
pub fn load_state_dict<M: Model>(model: &M, params: &mut [f32], dict: &StateDict) -> Result<()> {
    check_size(model, params.len())?;

    let specs = model.param_specs();
    if let Some(extra) = dict.keys().find(|k| !specs.iter().any(|s| &s.name == *k)) {
        return Err(MlErr::StateDict(format!("unexpected key {extra}")));
    }

    for spec in specs {
        let tensor = lookup(dict, &spec)?;
        let raw = &mut params[spec.offset..spec.offset + spec.len()];

        match spec.kind {
            ParamKind::Weight { fan_in, fan_out } => {
                let src = ArrayView2::from_shape((fan_out, fan_in), &tensor.data)?;
                let mut dst = ArrayViewMut2::from_shape((fan_in, fan_out), raw)?;
                dst.assign(&src.t());
            }
            ParamKind::Bias { .. } => raw.copy_from_slice(&tensor.data),
        }
    }

    Ok(())
}

fn lookup<'a>(dict: &'a StateDict, spec: &ParamSpec) -> Result<&'a Tensor> {
    let tensor = dict
        .get(&spec.name)
        .ok_or_else(|| MlErr::StateDict(format!("missing key {}", spec.name)))?;

    if tensor.shape != spec.shape() || tensor.data.len() != spec.len() {
        return Err(MlErr::StateDict(format!(
            "{} has shape {:?}, expected {:?}",
            spec.name,
            tensor.shape,
            spec.shape()
        )));
    }

    Ok(tensor)
}

fn check_size<M: Model>(model: &M, len: usize) -> Result<()> {
    let expected = model.size();
    if len != expected {
        return Err(MlErr::SizeMismatch {
            what: "state dict parameters",
            got: len,
            expected,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Sequential;

    #[test]
    fn weights_are_exported_transposed() {
        let model = Sequential::mlp(2, &[], 3);
        // W (in=2, out=3) = [[1, 2, 3], [4, 5, 6]], b = [7, 8, 9]
        let params: Vec<f32> = (1..=9).map(|v| v as f32).collect();

        let dict = state_dict(&model, &params).unwrap();

        let weight = &dict["fc1.weight"];
        assert_eq!(weight.shape, vec![3, 2]);
        assert_eq!(weight.data, vec![1., 4., 2., 5., 3., 6.]);
        assert_eq!(dict["fc1.bias"].data, vec![7., 8., 9.]);
    }

    #[test]
    fn load_restores_the_flat_layout() {
        let model = Sequential::mlp(3, &[4], 2);
        let params: Vec<f32> = (0..model.size()).map(|v| v as f32 * 0.5).collect();
        let dict = state_dict(&model, &params).unwrap();

        let mut restored = vec![0.; model.size()];
        load_state_dict(&model, &mut restored, &dict).unwrap();

        assert_eq!(restored, params);
    }

    #[test]
    fn unexpected_and_missing_keys_are_rejected() {
        let model = Sequential::mlp(2, &[], 2);
        let params = vec![0.; model.size()];
        let mut dict = state_dict(&model, &params).unwrap();
        let mut buf = params.clone();

        let stray = Tensor {
            shape: vec![1],
            data: vec![0.],
        };
        dict.insert("fc9.bias".into(), stray);
        assert!(matches!(
            load_state_dict(&model, &mut buf, &dict),
            Err(MlErr::StateDict(_))
        ));

        dict.remove("fc9.bias");
        dict.remove("fc1.weight");
        assert!(matches!(
            load_state_dict(&model, &mut buf, &dict),
            Err(MlErr::StateDict(_))
        ));
    }
}
