pub mod catalog;
pub mod credentials;
pub mod registry;

pub use catalog::{ModelName, ProviderSeed, PROVIDER_SEEDS};
pub use credentials::{KeyResolver, StoredKeyResolver};
pub use registry::{AiInstance, ProviderRegistry};
