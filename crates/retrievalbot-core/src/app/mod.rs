//! App - the long-running pieces built on top of the ports.
//!
//! - **Scheduler**: backlog-gated sampling of deals into tasks
//! - **WorkerLoop / WorkerGroup**: lease, attempt, record, retire
//! - **ReaperLoop**: lease expiry and stale-task sweep
//! - **standalone**: one-shot runs from a static descriptor

pub mod reaper_loop;
pub mod registry;
pub mod sampling;
pub mod scheduler;
pub mod standalone;
pub mod worker_loop;

pub use self::reaper_loop::ReaperLoop;
pub use self::registry::{RegistryError, WorkerRegistry};
pub use self::sampling::{PowerLawWeighting, ProviderWeighting, weighted_downsample};
pub use self::scheduler::{ScheduleError, ScheduleReport, Scheduler, SchedulerDeps, SchedulerSettings};
pub use self::standalone::{DescriptorError, WorkerDescriptor};
pub use self::worker_loop::{WorkerContext, WorkerGroup, WorkerLoop};
