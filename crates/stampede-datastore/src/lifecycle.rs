//! Test/scenario records and the user-manager lifecycle: bin-packing users
//! into managers on create, draining oldest-first on stop.

use std::collections::HashMap;

use stampede_core::{codec, ids, BackendResult, Scenario, Test};

use crate::{keys, Datastore, RECORD_TTL, START_USERS_KIND, STOP_USERS_KIND};

impl Datastore {
    pub async fn create_test(
        &self,
        backend_address: &str,
        scheduling_metadata: &str,
        tags: Vec<String>,
        env: HashMap<String, String>,
    ) -> BackendResult<String> {
        let test_id = ids::test_id();

        let test = Test {
            test_id: test_id.clone(),
            backend_address: backend_address.to_string(),
            scheduling_metadata: scheduling_metadata.to_string(),
            tags,
            env,
        };

        let bytes = codec::to_bytes(&test).map_err(|e| e.context("Error encoding test"))?;

        self.commands
            .set_bytes(&test_id, &bytes, Some(RECORD_TTL))
            .await
            .map_err(|e| e.context("Error setting test in datastore"))?;

        Ok(test_id)
    }

    pub async fn get_test(&self, test_id: &str) -> BackendResult<Test> {
        let bytes = self
            .commands
            .get_bytes(test_id)
            .await
            .map_err(|e| e.context("Error getting test"))?;

        codec::from_bytes(&bytes).map_err(|e| e.context("Error decoding test"))
    }

    pub async fn create_scenario(
        &self,
        test_id: &str,
        scenario_name: &str,
        context: &str,
        users_per_instance: u32,
        tags: Vec<String>,
    ) -> BackendResult<String> {
        let scenario_id = ids::scenario_id();

        let scenario = Scenario {
            test_id: test_id.to_string(),
            scenario_id: scenario_id.clone(),
            scenario_name: scenario_name.to_string(),
            context: context.to_string(),
            users_per_instance,
            tags,
        };

        let bytes = codec::to_bytes(&scenario).map_err(|e| e.context("Error encoding scenario"))?;

        self.commands
            .set_bytes(&scenario_id, &bytes, Some(RECORD_TTL))
            .await
            .map_err(|e| e.context("Error setting scenario in datastore"))?;

        Ok(scenario_id)
    }

    pub async fn get_scenario(&self, scenario_id: &str) -> BackendResult<Scenario> {
        let bytes = self
            .commands
            .get_bytes(scenario_id)
            .await
            .map_err(|e| e.context("Error getting scenario"))?;

        codec::from_bytes(&bytes).map_err(|e| e.context("Error decoding scenario"))
    }

    /// Users currently assigned to a manager, in assignment order.
    pub(crate) async fn user_ids(
        &self,
        scenario_id: &str,
        user_manager_id: &str,
    ) -> BackendResult<Vec<String>> {
        let bytes = self
            .commands
            .map_get_key_bytes(&keys::scenario_user_managers(scenario_id), user_manager_id)
            .await
            .map_err(|e| {
                e.context(&format!(
                    "Error getting users under user manager {user_manager_id}"
                ))
            })?;

        match bytes {
            Some(bytes) => codec::from_bytes(&bytes).map_err(|e| e.context("Error decoding user ids")),
            None => Ok(Vec::new()),
        }
    }

    async fn store_user_ids(
        &self,
        scenario_id: &str,
        user_manager_id: &str,
        user_ids: &[String],
    ) -> BackendResult<()> {
        let bytes = codec::to_bytes(&user_ids.to_vec())
            .map_err(|e| e.context("Error encoding user ids"))?;

        self.commands
            .map_set_key(
                &keys::scenario_user_managers(scenario_id),
                user_manager_id,
                &bytes,
            )
            .await
            .map_err(|e| e.context("Error setting user manager"))
    }

    async fn push_id_list_event(
        &self,
        user_manager_id: &str,
        kind: &str,
        user_ids: &[String],
    ) -> BackendResult<()> {
        let payload = serde_json::to_vec(&serde_json::json!({ "IDs": user_ids }))
            .map_err(|e| stampede_core::BackendError::decode(format!("Error encoding user ids: {e}")))?;

        self.push_event(&keys::user_events(user_manager_id, kind), kind, &payload)
            .await
            .map_err(|e| {
                e.context(&format!(
                    "Error adding user events for user manager {user_manager_id}"
                ))
            })
    }

    /// Bin-packs `amount` fresh users into the scenario's managers: existing
    /// managers are topped up to capacity in enumeration order, then new
    /// managers are allocated for the remainder. Every touched manager
    /// receives a `START_USERS` event naming its new users, and any work or
    /// events buffered while the scenario had no managers are replayed.
    ///
    /// Returns only the newly allocated manager ids; existing managers learn
    /// about their extra users in-band.
    pub async fn create_users(
        &self,
        scenario_id: &str,
        amount: i64,
    ) -> BackendResult<Vec<String>> {
        if amount < 1 {
            return Ok(Vec::new());
        }

        let scenario = self.get_scenario(scenario_id).await?;
        let capacity = scenario.users_per_instance as usize;

        let user_managers = self
            .commands
            .map_get_keys(&keys::scenario_user_managers(scenario_id))
            .await
            .map_err(|e| e.context("Error getting scenario user managers"))?;

        let mut users_to_create: Vec<(String, Vec<String>)> = Vec::new();
        let mut new_user_managers = Vec::new();
        let mut remaining = amount as usize;

        // Top up existing managers first.
        for user_manager_id in &user_managers {
            if remaining == 0 {
                break;
            }

            let mut user_ids = self.user_ids(scenario_id, user_manager_id).await?;
            let available = capacity.saturating_sub(user_ids.len());
            let taken = available.min(remaining);

            if taken == 0 {
                continue;
            }

            let fresh: Vec<String> = (0..taken).map(|_| ids::user_id()).collect();
            user_ids.extend(fresh.iter().cloned());

            self.store_user_ids(scenario_id, user_manager_id, &user_ids)
                .await?;

            users_to_create.push((user_manager_id.clone(), fresh));
            remaining -= taken;
        }

        // Allocate new managers for whatever is left.
        while remaining > 0 {
            let user_manager_id = ids::user_manager_id();
            let taken = capacity.min(remaining);
            let fresh: Vec<String> = (0..taken).map(|_| ids::user_id()).collect();

            self.store_user_ids(scenario_id, &user_manager_id, &fresh)
                .await?;

            users_to_create.push((user_manager_id.clone(), fresh));
            new_user_managers.push(user_manager_id);
            remaining -= taken;
        }

        for (user_manager_id, fresh) in &users_to_create {
            self.push_id_list_event(user_manager_id, START_USERS_KIND, fresh)
                .await?;
        }

        self.replay_buffered_work(scenario_id)
            .await
            .map_err(|e| e.context("Error distributing buffered work"))?;

        self.replay_buffered_events(scenario_id)
            .await
            .map_err(|e| e.context("Error distributing buffered user events"))?;

        Ok(new_user_managers)
    }

    /// Removes `amount` users, draining each manager's oldest users first in
    /// enumeration order. A manager whose user list empties is removed from
    /// the mapping and reported in the returned to-stop list; the others
    /// keep their younger users and learn about the drain via `STOP_USERS`
    /// events.
    pub async fn stop_users(&self, scenario_id: &str, amount: i64) -> BackendResult<Vec<String>> {
        let user_managers = self
            .commands
            .map_get_keys(&keys::scenario_user_managers(scenario_id))
            .await
            .map_err(|e| e.context("Error getting scenario user managers"))?;

        let mut user_managers_to_stop = Vec::new();
        let mut remaining = amount;

        for user_manager_id in &user_managers {
            if remaining < 1 {
                break;
            }

            let user_ids = self.user_ids(scenario_id, user_manager_id).await?;
            let drained = (remaining as usize).min(user_ids.len());

            self.push_id_list_event(user_manager_id, STOP_USERS_KIND, &user_ids[..drained])
                .await?;

            if drained == user_ids.len() {
                self.commands
                    .map_key_delete(&keys::scenario_user_managers(scenario_id), user_manager_id)
                    .await
                    .map_err(|e| e.context("Error removing user manager key"))?;

                user_managers_to_stop.push(user_manager_id.clone());
            } else {
                self.store_user_ids(scenario_id, user_manager_id, &user_ids[drained..])
                    .await?;
            }

            remaining -= drained as i64;
        }

        Ok(user_managers_to_stop)
    }
}
