//! Process-scoped map of mock keys to provisioned instances.
//!
//! Each key owns a slot guarded by its own mutex. The first caller for a key
//! builds while holding the slot; concurrent callers for the same key block on
//! the slot and receive the winner's instance. Callers for different keys only
//! contend on the brief map lookup.
//!
//! Entries are write-once. A failed build leaves the slot empty, so the next
//! caller builds afresh.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    builder::{BuildError, MockBuilder},
    instance::MockedInstance,
    invoker::ToolInvoker,
    resolver::{MockKey, ResolvedRequest},
};

type Slot = Arc<Mutex<Option<Arc<MockedInstance>>>>;

#[derive(Debug, Default)]
pub struct MockRegistry {
    slots: Mutex<HashMap<MockKey, Slot>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance for `request`, building it with `builder` on a miss.
    pub fn get_or_build<I: ToolInvoker>(
        &self,
        request: &ResolvedRequest,
        builder: &MockBuilder<I>,
    ) -> Result<Arc<MockedInstance>, BuildError> {
        self.get_or_build_with(&request.mock_key, || builder.build(request))
    }

    /// Returns the instance for `key`, running `build` on a miss.
    ///
    /// `build` runs at most once at a time per key, and never again once an
    /// instance is stored.
    pub fn get_or_build_with<F, E>(&self, key: &MockKey, build: F) -> Result<Arc<MockedInstance>, E>
    where
        F: FnOnce() -> Result<MockedInstance, E>,
    {
        let slot = self.slots.lock().entry(key.clone()).or_default().clone();

        let mut entry = slot.lock();
        if let Some(instance) = entry.as_ref() {
            tracing::debug!(mock_key = %key, "reusing mock instance");
            return Ok(instance.clone());
        }

        tracing::info!(mock_key = %key, "building mock instance");
        let instance = Arc::new(build()?);
        *entry = Some(instance.clone());

        tracing::info!(mock_key = %key, target = %instance.target(), "mock instance ready");
        Ok(instance)
    }

    /// The stored instance for `key`. A build in progress counts as absent.
    pub fn get(&self, key: &MockKey) -> Option<Arc<MockedInstance>> {
        let slot = self.slots.lock().get(key).cloned()?;
        slot.try_lock().and_then(|entry| entry.clone())
    }

    /// Every stored instance. Builds in progress are skipped.
    pub fn instances(&self) -> Vec<Arc<MockedInstance>> {
        self.slots
            .lock()
            .values()
            .filter_map(|slot| slot.try_lock().and_then(|entry| entry.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the daemon of every stored instance. Entries stay in place.
    ///
    /// Builds in progress are waited for, so their daemons are stopped too.
    /// Keys first requested after this call starts are not covered.
    pub fn terminate_all(&self) {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        let instances = slots.iter().filter_map(|slot| slot.lock().clone());

        for instance in instances {
            if let Err(err) = instance.terminate() {
                tracing::warn!(
                    mock_key = %instance.mock_key(),
                    error = %err,
                    "failed to stop mock instance"
                );
            }
        }
    }
}

/// In-tree integration tests
#[cfg(test)]
mod tests {
    mod it_registry;
}
