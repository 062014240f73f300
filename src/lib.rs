pub mod config;
pub mod derivation;
pub mod engine;
pub mod estimator;
pub mod field;
pub mod fitting;
pub mod history;
pub mod issue;
pub mod observation;
pub mod resolver;
pub mod scoring;
pub mod snapshot;
pub mod source;
pub mod synthetic_feed;
pub mod validator;

pub use config::EngineConfig;
pub use engine::{CancelToken, Engine, EngineRegistry, ResolveJob};
pub use estimator::EstimatorStore;
pub use field::{FieldKey, Side, Stat};
pub use observation::{MatchContext, Observation, ObservationBatch};
pub use snapshot::{FlagRule, Provenance, ResolvedField, ResolvedSnapshot, ValidationFlag};
