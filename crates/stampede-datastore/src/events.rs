//! Typed FIFO event channels for tests and user managers.

use stampede_core::{codec, BackendResult, Event};

use crate::{keys, Datastore};

impl Datastore {
    /// Encodes and appends an event to the channel at `key`.
    pub(crate) async fn push_event(
        &self,
        key: &str,
        kind: &str,
        payload: &[u8],
    ) -> BackendResult<()> {
        let event = Event {
            kind: kind.to_string(),
            payload: payload.to_vec(),
        };

        let bytes = codec::to_bytes(&event).map_err(|e| e.context("Unable to encode event"))?;

        self.commands
            .list_push_bytes(key, &bytes)
            .await
            .map_err(|e| e.context("Error adding event"))
    }

    /// Snapshots the channel length, then pops that many events. Producers
    /// appending after the snapshot are picked up by the next drain, so no
    /// caller starves another.
    pub(crate) async fn drain_events(&self, key: &str) -> BackendResult<Vec<Event>> {
        let len = self
            .commands
            .list_length(key)
            .await
            .map_err(|e| e.context("Error getting event count"))?;

        let mut events = Vec::new();

        for _ in 0..len {
            let Some(bytes) = self
                .commands
                .list_pop_bytes(key)
                .await
                .map_err(|e| e.context("Error getting event"))?
            else {
                break;
            };

            events.push(codec::from_bytes(&bytes).map_err(|e| e.context("Error decoding event"))?);
        }

        Ok(events)
    }

    pub async fn add_test_event(
        &self,
        test_id: &str,
        kind: &str,
        payload: &[u8],
    ) -> BackendResult<()> {
        self.push_event(&keys::test_events(test_id), kind, payload)
            .await
    }

    pub async fn get_test_events(&self, test_id: &str) -> BackendResult<Vec<Event>> {
        self.drain_events(&keys::test_events(test_id)).await
    }

    /// Fans an event out to every manager of the scenario. With no managers
    /// yet, the whole event is buffered and replayed, under its own kind,
    /// when the first managers appear.
    pub async fn add_user_event(
        &self,
        scenario_id: &str,
        kind: &str,
        payload: &[u8],
    ) -> BackendResult<()> {
        let user_managers = self
            .commands
            .map_get_keys(&keys::scenario_user_managers(scenario_id))
            .await
            .map_err(|e| e.context("Error getting scenario user managers"))?;

        if user_managers.is_empty() {
            return self
                .push_event(&keys::buffered_events(scenario_id), kind, payload)
                .await
                .map_err(|e| e.context("Error adding buffered event"));
        }

        for user_manager_id in &user_managers {
            self.push_event(&keys::user_events(user_manager_id, kind), kind, payload)
                .await
                .map_err(|e| {
                    e.context(&format!(
                        "Error adding user events for user manager {user_manager_id}"
                    ))
                })?;
        }

        Ok(())
    }

    pub async fn get_user_events(
        &self,
        user_manager_id: &str,
        kind: &str,
    ) -> BackendResult<Vec<Event>> {
        self.drain_events(&keys::user_events(user_manager_id, kind))
            .await
    }

    /// Replays every buffered event against every current manager. Called
    /// after manager creation, before the new managers are launched.
    pub(crate) async fn replay_buffered_events(&self, scenario_id: &str) -> BackendResult<()> {
        let events = self.drain_events(&keys::buffered_events(scenario_id)).await?;

        if events.is_empty() {
            return Ok(());
        }

        let user_managers = self
            .commands
            .map_get_keys(&keys::scenario_user_managers(scenario_id))
            .await
            .map_err(|e| e.context("Error getting scenario user managers"))?;

        for user_manager_id in &user_managers {
            for event in &events {
                self.push_event(
                    &keys::user_events(user_manager_id, &event.kind),
                    &event.kind,
                    &event.payload,
                )
                .await
                .map_err(|e| {
                    e.context(&format!(
                        "Error adding user events for user manager {user_manager_id}"
                    ))
                })?;
            }
        }

        Ok(())
    }
}
