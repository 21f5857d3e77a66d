//! Domain model: deals, tasks, results, provider identity, lifecycle state.

pub mod deal;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod provider;
pub mod state;
pub mod task;

pub use deal::{DealId, DealRecord, epoch_to_time};
pub use errors::{ErrorKind, LookupError, ResolveError, StoreError};
pub use ids::{LeaseToken, ResultId, TaskId};
pub use outcome::{ErrorCode, RetrievalResult, TaskResult};
pub use provider::{Location, ProviderInfo, SelfInfo};
pub use state::TaskState;
pub use task::{Content, Module, Provider, Task, UnknownModule};
