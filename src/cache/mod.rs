pub mod error;
pub mod key;
pub mod lifecycle;
pub mod locks;
pub mod model_cache;

pub use error::CacheError;
pub use key::{options_from_json, CacheKey, DeviceSpec, ModelKind, ModelOptions, OptionValue};
pub use lifecycle::{LifecycleCoordinator, ModelBackend, UnloadTarget};
pub use model_cache::{ModelCache, ModelLease, ResidentModel};
