//! End-to-end behavior of the bookkeeping engine over the embedded store:
//! bin-packing, draining, work distribution, buffering, events, results,
//! and metric aggregation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use stampede_core::codec;
use stampede_datastore::{Datastore, START_USERS_KIND, STOP_USERS_KIND};
use stampede_store::{Commands, EmbeddedCommands};

struct Harness {
    commands: Arc<EmbeddedCommands>,
    datastore: Datastore,
}

fn harness() -> Harness {
    let commands = Arc::new(EmbeddedCommands::open().unwrap());
    let datastore = Datastore::new(commands.clone());
    Harness {
        commands,
        datastore,
    }
}

impl Harness {
    /// Creates a test plus a scenario with the given capacity and returns
    /// the scenario id.
    async fn scenario(&self, users_per_instance: u32) -> String {
        let test_id = self
            .datastore
            .create_test("localhost:8283", "{}", Vec::new(), HashMap::new())
            .await
            .unwrap();

        self.datastore
            .create_scenario(&test_id, "login", "ctx", users_per_instance, Vec::new())
            .await
            .unwrap()
    }

    async fn managers(&self, scenario_id: &str) -> Vec<String> {
        self.commands
            .map_get_keys(&format!("{scenario_id}-user-managers"))
            .await
            .unwrap()
    }

    async fn users_of(&self, scenario_id: &str, manager_id: &str) -> Vec<String> {
        let bytes = self
            .commands
            .map_get_key_bytes(&format!("{scenario_id}-user-managers"), manager_id)
            .await
            .unwrap()
            .unwrap();

        codec::from_bytes(&bytes).unwrap()
    }

    async fn manager_sizes(&self, scenario_id: &str) -> Vec<usize> {
        let mut sizes = Vec::new();
        for manager_id in self.managers(scenario_id).await {
            sizes.push(self.users_of(scenario_id, &manager_id).await.len());
        }
        sizes.sort_unstable();
        sizes
    }
}

fn ids_from_payload(payload: &[u8]) -> Vec<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
    value["IDs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|id| id.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn create_users_bin_packs_into_new_managers() {
    let h = harness();
    let sid = h.scenario(50).await;

    let new_managers = h.datastore.create_users(&sid, 60).await.unwrap();
    assert_eq!(new_managers.len(), 2);
    assert_eq!(h.manager_sizes(&sid).await, vec![10, 50]);

    let new_managers = h.datastore.create_users(&sid, 45).await.unwrap();
    assert_eq!(new_managers.len(), 1);
    assert_eq!(h.manager_sizes(&sid).await, vec![5, 50, 50]);
}

#[tokio::test]
async fn create_users_tops_up_existing_managers_without_new_ones() {
    let h = harness();
    let sid = h.scenario(50).await;

    let first = h.datastore.create_users(&sid, 10).await.unwrap();
    assert_eq!(first.len(), 1);

    let second = h.datastore.create_users(&sid, 5).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(h.manager_sizes(&sid).await, vec![15]);
}

#[tokio::test]
async fn bin_packing_invariant_holds_over_a_sequence() {
    let h = harness();
    let sid = h.scenario(7).await;

    let amounts = [3i64, 9, 1, 20];
    for amount in amounts {
        h.datastore.create_users(&sid, amount).await.unwrap();
    }

    let total: i64 = amounts.iter().sum();
    let sizes = h.manager_sizes(&sid).await;

    assert!(sizes.iter().all(|size| *size <= 7));
    assert_eq!(sizes.iter().sum::<usize>() as i64, total);
    assert_eq!(sizes.len() as i64, (total + 6) / 7);
}

#[tokio::test]
async fn create_users_with_no_amount_is_a_no_op() {
    let h = harness();
    let sid = h.scenario(50).await;

    assert!(h.datastore.create_users(&sid, 0).await.unwrap().is_empty());
    assert!(h.datastore.create_users(&sid, -3).await.unwrap().is_empty());
    assert!(h.managers(&sid).await.is_empty());
}

#[tokio::test]
async fn create_users_for_missing_scenario_is_not_found() {
    let h = harness();

    let err = h.datastore.create_users("scenario-absent", 10).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn start_users_events_name_every_new_user() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore.create_users(&sid, 60).await.unwrap();

    let mut announced = HashSet::new();
    for manager_id in h.managers(&sid).await {
        let events = h
            .datastore
            .get_user_events(&manager_id, START_USERS_KIND)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, START_USERS_KIND);

        let ids = ids_from_payload(&events[0].payload);
        assert_eq!(ids, h.users_of(&sid, &manager_id).await);
        announced.extend(ids);
    }

    assert_eq!(announced.len(), 60);
}

#[tokio::test]
async fn topping_up_announces_only_the_fresh_users() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore.create_users(&sid, 10).await.unwrap();
    let manager_id = h.managers(&sid).await.remove(0);

    // Drain the creation announcement, then add more users.
    h.datastore
        .get_user_events(&manager_id, START_USERS_KIND)
        .await
        .unwrap();
    h.datastore.create_users(&sid, 5).await.unwrap();

    let events = h
        .datastore
        .get_user_events(&manager_id, START_USERS_KIND)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);

    let fresh = ids_from_payload(&events[0].payload);
    assert_eq!(fresh.len(), 5);
    assert_eq!(h.users_of(&sid, &manager_id).await[10..], fresh[..]);
}

#[tokio::test]
async fn stop_users_drains_the_oldest_users_first() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore.create_users(&sid, 30).await.unwrap();
    let manager_id = h.managers(&sid).await.remove(0);
    let before = h.users_of(&sid, &manager_id).await;

    let to_stop = h.datastore.stop_users(&sid, 10).await.unwrap();
    assert!(to_stop.is_empty());
    assert_eq!(h.users_of(&sid, &manager_id).await, before[10..]);

    let events = h
        .datastore
        .get_user_events(&manager_id, STOP_USERS_KIND)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(ids_from_payload(&events[0].payload), before[..10]);
}

#[tokio::test]
async fn stop_users_deletes_emptied_managers() {
    let h = harness();
    let sid = h.scenario(2).await;

    h.datastore.create_users(&sid, 5).await.unwrap();
    assert_eq!(h.manager_sizes(&sid).await, vec![1, 2, 2]);

    let to_stop = h.datastore.stop_users(&sid, 5).await.unwrap();
    assert_eq!(to_stop.len(), 3);
    assert!(h.managers(&sid).await.is_empty());

    // Nothing left to drain.
    let to_stop = h.datastore.stop_users(&sid, 5).await.unwrap();
    assert!(to_stop.is_empty());
}

#[tokio::test]
async fn stopping_more_than_the_total_empties_the_scenario() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore.create_users(&sid, 105).await.unwrap();
    let manager_count = h.managers(&sid).await.len();

    let to_stop = h.datastore.stop_users(&sid, 1000).await.unwrap();
    assert_eq!(to_stop.len(), manager_count);
    assert!(h.managers(&sid).await.is_empty());
}

#[tokio::test]
async fn partial_stop_keeps_total_consistent() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore.create_users(&sid, 105).await.unwrap();
    let to_stop = h.datastore.stop_users(&sid, 55).await.unwrap();

    let sizes = h.manager_sizes(&sid).await;
    assert_eq!(sizes.iter().sum::<usize>(), 50);
    assert_eq!(sizes.len() + to_stop.len(), 3);
}

#[tokio::test]
async fn distribute_work_balances_batches() {
    let h = harness();
    let sid = h.scenario(1).await;

    h.datastore.create_users(&sid, 3).await.unwrap();
    h.datastore.distribute_work(&sid, 11).await.unwrap();

    let mut batches = Vec::new();
    for manager_id in h.managers(&sid).await {
        batches.push(h.datastore.get_user_work(&manager_id).await.unwrap());
    }

    assert_eq!(batches.iter().sum::<i64>(), 11);
    assert!(batches.iter().all(|batch| *batch == 3 || *batch == 4));
    assert_eq!(batches.iter().filter(|batch| **batch == 4).count(), 2);
}

#[tokio::test]
async fn distribute_work_pushes_zero_sized_batches() {
    let h = harness();
    let sid = h.scenario(1).await;

    h.datastore.create_users(&sid, 3).await.unwrap();
    h.datastore.distribute_work(&sid, 2).await.unwrap();

    // Every manager received a batch, even the zero-sized one.
    for manager_id in h.managers(&sid).await {
        assert_eq!(
            h.commands
                .list_length(&format!("{manager_id}-work"))
                .await
                .unwrap(),
            1
        );
    }
}

#[tokio::test]
async fn work_is_buffered_until_managers_exist() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore.distribute_work(&sid, 10).await.unwrap();
    assert_eq!(
        h.commands
            .list_length(&format!("{sid}-buffered-work"))
            .await
            .unwrap(),
        1
    );

    let new_managers = h.datastore.create_users(&sid, 50).await.unwrap();
    assert_eq!(new_managers.len(), 1);

    assert_eq!(
        h.datastore.get_user_work(&new_managers[0]).await.unwrap(),
        10
    );
    assert_eq!(
        h.commands
            .list_length(&format!("{sid}-buffered-work"))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn buffered_work_amounts_are_summed_on_flush() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore.distribute_work(&sid, 4).await.unwrap();
    h.datastore.distribute_work(&sid, 6).await.unwrap();

    let new_managers = h.datastore.create_users(&sid, 50).await.unwrap();
    assert_eq!(
        h.datastore.get_user_work(&new_managers[0]).await.unwrap(),
        10
    );
}

#[tokio::test]
async fn get_user_work_drains_the_queue() {
    let h = harness();
    let sid = h.scenario(1).await;

    let managers = h.datastore.create_users(&sid, 1).await.unwrap();
    h.datastore.distribute_work(&sid, 5).await.unwrap();
    h.datastore.distribute_work(&sid, 7).await.unwrap();

    assert_eq!(h.datastore.get_user_work(&managers[0]).await.unwrap(), 12);
    assert_eq!(h.datastore.get_user_work(&managers[0]).await.unwrap(), 0);
}

#[tokio::test]
async fn user_events_are_buffered_with_their_kind() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore
        .add_user_event(&sid, "CUSTOM", b"payload-1")
        .await
        .unwrap();

    let new_managers = h.datastore.create_users(&sid, 50).await.unwrap();
    let events = h
        .datastore
        .get_user_events(&new_managers[0], "CUSTOM")
        .await
        .unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "CUSTOM");
    assert_eq!(events[0].payload, b"payload-1");
}

#[tokio::test]
async fn user_events_are_fifo_per_channel() {
    let h = harness();
    let sid = h.scenario(50).await;

    let managers = h.datastore.create_users(&sid, 10).await.unwrap();

    h.datastore.add_user_event(&sid, "STOP", b"p1").await.unwrap();
    h.datastore.add_user_event(&sid, "STOP", b"p2").await.unwrap();

    let events = h
        .datastore
        .get_user_events(&managers[0], "STOP")
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].payload, b"p1");
    assert_eq!(events[1].payload, b"p2");

    assert!(h
        .datastore
        .get_user_events(&managers[0], "STOP")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_events_drain_in_push_order() {
    let h = harness();
    let sid = h.scenario(50).await;
    let test_id = h.datastore.get_scenario(&sid).await.unwrap().test_id;

    h.datastore
        .add_test_event(&test_id, "SCENARIO_STARTED", b"login")
        .await
        .unwrap();
    h.datastore
        .add_test_event(&test_id, "SCENARIO_FINISHED", b"login")
        .await
        .unwrap();

    let events = h.datastore.get_test_events(&test_id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "SCENARIO_STARTED");
    assert_eq!(events[1].kind, "SCENARIO_FINISHED");

    assert!(h.datastore.get_test_events(&test_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn metric_statistics_compose_the_aggregates() {
    let h = harness();
    let sid = h.scenario(50).await;

    for value in [1.23, 4.56, 7.89] {
        h.datastore.add_metric(&sid, "lat", value).await.unwrap();
    }

    let stats = h.datastore.get_metric_statistics(&sid, "lat").await.unwrap();
    assert_eq!(stats.min, 1.23);
    assert_eq!(stats.max, 7.89);
    assert_eq!(stats.median, 4.56);
    assert_eq!(stats.len, 3);
    assert!((stats.average - 4.56).abs() < 1e-9);

    let rate = h.datastore.get_rate(&sid, "lat", 2.0).await.unwrap();
    assert!((rate - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn metric_total_is_the_exact_sum() {
    let h = harness();
    let sid = h.scenario(50).await;

    for value in [0.5, 1.25, 2.25] {
        h.datastore.add_metric(&sid, "calls", value).await.unwrap();
    }

    assert_eq!(h.datastore.get_metric_total(&sid, "calls").await.unwrap(), 4.0);
}

#[tokio::test]
async fn last_metric_tracks_the_latest_write() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore.add_metric(&sid, "lat", 1.0).await.unwrap();
    h.datastore.add_metric(&sid, "lat", 2.5).await.unwrap();

    assert_eq!(h.datastore.get_last_metric(&sid, "lat").await.unwrap(), 2.5);
}

#[tokio::test]
async fn absent_metrics_are_not_found() {
    let h = harness();
    let sid = h.scenario(50).await;

    assert!(h
        .datastore
        .get_last_metric(&sid, "absent")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(h
        .datastore
        .get_metric_total(&sid, "absent")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(h
        .datastore
        .get_metric_statistics(&sid, "absent")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn scenario_result_round_trips() {
    let h = harness();
    let sid = h.scenario(50).await;

    h.datastore
        .set_scenario_result(
            &sid,
            Some("ok".to_string()),
            None,
            "ran 3 users".to_string(),
            1.5,
            3,
            0,
        )
        .await
        .unwrap();

    let result = h.datastore.move_scenario_result(&sid).await.unwrap();
    assert_eq!(result.output.as_deref(), Some("ok"));
    assert_eq!(result.exception, None);
    assert_eq!(result.logs, "ran 3 users");
    assert_eq!(result.time_taken, 1.5);
    assert_eq!(result.succeeded, 3);
    assert_eq!(result.failed, 0);
    assert!(!result.id.is_empty());
    assert!(chrono::DateTime::parse_from_rfc3339(&result.timestamp).is_ok());

    // The slot survives a read; it only dies by TTL.
    assert!(h.datastore.move_scenario_result(&sid).await.is_ok());
}

#[tokio::test]
async fn missing_scenario_result_is_not_found() {
    let h = harness();

    let err = h
        .datastore
        .move_scenario_result("scenario-absent")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn user_results_respect_order_and_limit() {
    let h = harness();
    let sid = h.scenario(50).await;

    let managers = h.datastore.create_users(&sid, 10).await.unwrap();
    let results: Vec<Vec<u8>> = (0..5).map(|i| vec![i as u8]).collect();
    h.datastore
        .add_user_results(&managers[0], &results)
        .await
        .unwrap();

    let moved = h.datastore.move_user_results(&sid, 3).await.unwrap();
    assert_eq!(moved, vec![vec![0], vec![1], vec![2]]);

    let rest = h.datastore.move_user_results(&sid, 10).await.unwrap();
    assert_eq!(rest, vec![vec![3], vec![4]]);
}

#[tokio::test]
async fn move_user_results_walks_every_manager() {
    let h = harness();
    let sid = h.scenario(1).await;

    let managers = h.datastore.create_users(&sid, 2).await.unwrap();
    for manager_id in &managers {
        h.datastore
            .add_user_results(manager_id, &[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
            .await
            .unwrap();
    }

    let moved = h.datastore.move_user_results(&sid, 100).await.unwrap();
    assert_eq!(moved.len(), 6);
}

#[tokio::test]
async fn missing_test_is_not_found() {
    let h = harness();

    assert!(h
        .datastore
        .get_test("stampede-test-absent")
        .await
        .unwrap_err()
        .is_not_found());
}
