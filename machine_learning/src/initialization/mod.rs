mod chained;
mod constant;
mod error;
mod param_gen;
mod random;

use std::{cell::RefCell, rc::Rc};

use rand::{SeedableRng, rngs::StdRng};

pub use chained::ChainedParamGen;
pub use constant::ConstParamGen;
pub use error::RandErr;
pub use param_gen::ParamGen;
pub use random::RandParamGen;

use crate::{MlErr, Result, arch::Model};

/// Draws the initial parameters of `model` from a generator seeded with `seed`.
///
/// Every parameter, weights and biases alike, is sampled from
/// `U(-1/sqrt(fan_in), 1/sqrt(fan_in))` in layout order, so two processes calling this with the
/// same model and seed get bit-identical vectors.
pub fn init_params<M: Model>(model: &M, seed: u64) -> Result<Vec<f32>> {
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));

    let param_gens = model
        .param_specs()
        .into_iter()
        .map(|spec| -> Result<Box<dyn ParamGen>> {
            let param_gen = RandParamGen::fan_in_uniform(rng.clone(), spec.len(), spec.fan_in())?;
            Ok(Box::new(param_gen))
        })
        .collect::<Result<Vec<_>>>()?;

    let size = model.size();
    let params = ChainedParamGen::new(param_gens)
        .sample(size)
        .unwrap_or_default();

    if params.len() != size {
        return Err(MlErr::SizeMismatch {
            what: "initial parameters",
            got: params.len(),
            expected: size,
        });
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Sequential;

    #[test]
    fn same_seed_same_parameters() {
        let model = Sequential::mlp(784, &[120, 84], 10);

        let a = init_params(&model, 0).unwrap();
        let b = init_params(&model, 0).unwrap();
        let c = init_params(&model, 1).unwrap();

        assert_eq!(a.len(), model.size());
        assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
        assert_ne!(a, c);
    }

    #[test]
    fn values_respect_the_fan_in_bound() {
        let model = Sequential::mlp(16, &[8], 4);
        let params = init_params(&model, 7).unwrap();

        for spec in model.param_specs() {
            let bound = 1. / (spec.fan_in() as f32).sqrt();
            let slice = &params[spec.offset..spec.offset + spec.len()];
            assert!(slice.iter().all(|v| v.abs() <= bound), "{}", spec.name);
        }
    }
}
