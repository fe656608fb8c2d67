pub mod identity;
pub mod uniform;

pub use identity::{IdentitySample, IdentitySampler};
pub use uniform::{UniformSampler, WindowedSample};
