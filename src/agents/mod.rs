pub mod registry;
pub mod spec;

pub use registry::{specs_from_config, AgentRegistry, RegistryDiff, RegistrySnapshot};
pub use spec::{AgentSpec, ProbeSpec, RestartPolicy};
