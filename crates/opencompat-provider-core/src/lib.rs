pub mod errors;
pub mod provider;
pub mod registry;

pub use errors::{ProviderError, ProviderResult};
pub use provider::{ChatRequest, ChatStream, Provider};
pub use registry::{EnvVarDoc, ProviderMeta, Registry, RouteError, parse_model};
