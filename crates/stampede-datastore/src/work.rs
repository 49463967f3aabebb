//! Work distribution: splitting integer work amounts across managers and
//! buffering them while a scenario has none.

use rand::seq::SliceRandom;

use stampede_core::BackendResult;

use crate::{keys, Datastore};

impl Datastore {
    /// Splits `amount` work units across the scenario's managers: every
    /// manager gets `amount / N`, and `amount % N` randomly chosen managers
    /// get one extra. Zero-sized batches are pushed so an idle worker still
    /// learns there is no work this tick.
    ///
    /// With no managers, the raw amount is buffered. Buffered amounts are
    /// summed and re-distributed as one total when managers appear, so no
    /// work is lost but the original batch boundaries are not preserved.
    pub async fn distribute_work(&self, scenario_id: &str, amount: i64) -> BackendResult<()> {
        let mut user_managers = self
            .commands
            .map_get_keys(&keys::scenario_user_managers(scenario_id))
            .await
            .map_err(|e| e.context("Error getting scenario user managers"))?;

        if user_managers.is_empty() {
            return self
                .commands
                .list_push_int(&keys::buffered_work(scenario_id), amount)
                .await
                .map_err(|e| e.context("Error adding buffered work"));
        }

        let count = user_managers.len() as i64;
        let base_work = amount / count;
        let with_extra = (amount % count) as usize;

        user_managers.shuffle(&mut rand::thread_rng());

        for (index, user_manager_id) in user_managers.iter().enumerate() {
            let batch = if index < with_extra {
                base_work + 1
            } else {
                base_work
            };

            self.commands
                .list_push_int(&keys::user_work(user_manager_id), batch)
                .await
                .map_err(|e| e.context("Error adding work"))?;
        }

        Ok(())
    }

    /// Drains the manager's work queue and returns the summed batch total.
    pub async fn get_user_work(&self, user_manager_id: &str) -> BackendResult<i64> {
        let key = keys::user_work(user_manager_id);

        let len = self
            .commands
            .list_length(&key)
            .await
            .map_err(|e| e.context("Error getting user work count"))?;

        let mut total_work = 0;

        for _ in 0..len {
            let Some(work) = self
                .commands
                .list_pop_int(&key)
                .await
                .map_err(|e| e.context("Error getting user work"))?
            else {
                break;
            };

            total_work += work;
        }

        Ok(total_work)
    }

    /// Sums and clears the scenario's buffered work, feeding the total back
    /// through [`Datastore::distribute_work`]. Called after manager
    /// creation.
    pub(crate) async fn replay_buffered_work(&self, scenario_id: &str) -> BackendResult<()> {
        let key = keys::buffered_work(scenario_id);

        let len = self
            .commands
            .list_length(&key)
            .await
            .map_err(|e| e.context("Error getting buffered work list length"))?;

        let mut total_work = 0;

        for _ in 0..len {
            let Some(work) = self
                .commands
                .list_pop_int(&key)
                .await
                .map_err(|e| e.context("Error getting buffered work"))?
            else {
                break;
            };

            total_work += work;
        }

        if total_work > 0 {
            return self.distribute_work(scenario_id, total_work).await;
        }

        Ok(())
    }
}
