use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::Module;
use crate::ports::ProtocolWorker;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a worker for module {0} is already registered")]
    DuplicateWorker(Module),
}

/// Protocol workers by module.
///
/// Built during startup, then shared read-only.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<Module, Arc<dyn ProtocolWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Arc<dyn ProtocolWorker>) -> Result<(), RegistryError> {
        let module = worker.module();
        if self.workers.contains_key(&module) {
            return Err(RegistryError::DuplicateWorker(module));
        }
        self.workers.insert(module, worker);
        Ok(())
    }

    pub fn get(&self, module: Module) -> Option<&Arc<dyn ProtocolWorker>> {
        self.workers.get(&module)
    }

    pub fn modules(&self) -> impl Iterator<Item = Module> + '_ {
        self.workers.keys().copied()
    }

    /// Modules in `wanted` with no local worker. Tasks for them wait for an
    /// external consumer.
    pub fn missing(&self, wanted: &[Module]) -> Vec<Module> {
        wanted
            .iter()
            .copied()
            .filter(|m| !self.workers.contains_key(m))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
