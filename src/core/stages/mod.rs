//! Concrete pipeline stages, composed in order by the engine.

pub mod discover;
pub mod filters;
pub mod load;
pub mod secrets;
pub mod transform;

pub use self::discover::DiscoveryStage;
pub use self::filters::{
    AlwaysIncludeStage, DedupeStage, ProfileFilterStage, SortDirection, SortKey, SortStage,
    VcsFilterMode, VcsFilterStage,
};
pub use self::load::{LoadConfig, LoadStage};
pub use self::secrets::{SecretFinding, SecretScanner, SecretsConfig, SecretsStage};
pub use self::transform::{TransformStage, Transformer};
