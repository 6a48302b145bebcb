pub mod activations;
pub mod layers;
pub mod loss;
mod model;
mod sequential;
mod state;

pub use model::{Model, ParamKind, ParamSpec};
pub use sequential::Sequential;
pub use state::{StateDict, Tensor, load_state_dict, state_dict};
