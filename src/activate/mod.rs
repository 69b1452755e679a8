mod context;
mod probe;

pub use context::{activate, ContextDecision, FetchedIdentity};
pub use probe::{probe_liveness, ClusterProbe, KubectlProbe};

#[cfg(test)]
pub(crate) use probe::fakes;
