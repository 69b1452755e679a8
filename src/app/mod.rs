mod pipeline;

pub use pipeline::{probe_only, AcquirePipeline, AcquireReport};
