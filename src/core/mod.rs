pub mod engine;
pub mod sampler;
pub mod scheduler;
pub mod source;

pub use engine::{Callback, CallbackId, Sampler, SamplerGuard, DEFAULT_TOPIC};
pub use sampler::{MaterializedSample, SampleAlgorithm, SampleMetadata, SamplerConfig};
pub use scheduler::{Scheduler, Task};
pub use source::SourceView;
