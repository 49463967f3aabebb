use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use stampede_core::{BackendError, BackendResult};

use crate::commands::Commands;
use crate::sorted_set::SortedSetIndex;

/// A value held in the embedded store. Lists and maps are stored whole
/// under their key, the way the transactional substrate sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Item {
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    List(Vec<Item>),
    Map(HashMap<String, Vec<u8>>),
}

/// Storage frame: the substrate has no native TTL, so expiring keys carry
/// their deadline and read as absent once it passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stored {
    expires_at_ms: Option<i64>,
    item: Item,
}

impl Stored {
    fn plain(item: Item) -> Self {
        Self {
            expires_at_ms: None,
            item,
        }
    }

    fn expiring(item: Item, ttl: Option<Duration>) -> Self {
        Self {
            expires_at_ms: ttl.map(|ttl| now_ms() + ttl.as_millis() as i64),
            item,
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn storage(err: impl std::fmt::Display) -> BackendError {
    BackendError::storage(err.to_string())
}

fn encode(stored: &Stored) -> BackendResult<Vec<u8>> {
    bincode::serialize(stored).map_err(|e| BackendError::decode(format!("Error encoding value: {e}")))
}

fn decode(raw: &[u8]) -> BackendResult<Stored> {
    bincode::deserialize(raw).map_err(|e| BackendError::decode(format!("Error decoding value: {e}")))
}

/// Embedded implementation of [`Commands`].
///
/// List, map, and counter primitives run as compare-and-swap loops against
/// an in-process database: a conflicting concurrent write logs a warning
/// and the operation retries; all other errors surface. Sorted sets live in
/// an in-memory index guarded by a single mutex and are not durable.
pub struct EmbeddedCommands {
    db: sled::Db,
    sets: Mutex<SortedSetIndex>,
}

impl EmbeddedCommands {
    /// Opens a fresh store backed by a temporary directory, removed when
    /// the instance drops.
    pub fn open() -> BackendResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| BackendError::storage(format!("Error opening embedded store: {e}")))?;

        Ok(Self {
            db,
            sets: Mutex::new(SortedSetIndex::default()),
        })
    }

    /// Reads the live value at `key`, dropping it when expired.
    fn load(&self, key: &str) -> BackendResult<Option<Item>> {
        let Some(raw) = self.db.get(key).map_err(storage)? else {
            return Ok(None);
        };

        let stored = decode(&raw)?;

        if let Some(deadline) = stored.expires_at_ms {
            if deadline <= now_ms() {
                let _ = self.db.remove(key);
                return Ok(None);
            }
        }

        Ok(Some(stored.item))
    }

    /// Read-modify-write under compare-and-swap, retrying on conflict.
    fn mutate<R>(
        &self,
        key: &str,
        op: &str,
        apply: impl Fn(Option<Item>) -> BackendResult<(Option<Stored>, R)>,
    ) -> BackendResult<R> {
        loop {
            let current = self.db.get(key).map_err(storage)?;

            let item = match &current {
                Some(raw) => {
                    let stored = decode(raw)?;
                    match stored.expires_at_ms {
                        Some(deadline) if deadline <= now_ms() => None,
                        _ => Some(stored.item),
                    }
                }
                None => None,
            };

            let (next, result) = apply(item)?;

            let next_raw = match &next {
                Some(stored) => Some(encode(stored)?),
                None => None,
            };

            match self
                .db
                .compare_and_swap(key, current, next_raw)
                .map_err(storage)?
            {
                Ok(()) => return Ok(result),
                Err(_) => warn!("Transaction conflict {op}, retrying..."),
            }
        }
    }

    fn as_list(item: Option<Item>) -> BackendResult<Vec<Item>> {
        match item {
            None => Ok(Vec::new()),
            Some(Item::List(list)) => Ok(list),
            Some(_) => Err(BackendError::decode("Value is not a list")),
        }
    }

    fn as_map(item: Option<Item>) -> BackendResult<HashMap<String, Vec<u8>>> {
        match item {
            None => Ok(HashMap::new()),
            Some(Item::Map(map)) => Ok(map),
            Some(_) => Err(BackendError::decode("Value is not a map")),
        }
    }

    fn pop_front(&self, key: &str, op: &str) -> BackendResult<Option<Item>> {
        self.mutate(key, op, |item| {
            let mut list = Self::as_list(item)?;

            if list.is_empty() {
                return Ok((Some(Stored::plain(Item::List(list))), None));
            }

            let elem = list.remove(0);
            Ok((Some(Stored::plain(Item::List(list))), Some(elem)))
        })
    }
}

#[async_trait]
impl Commands for EmbeddedCommands {
    async fn list_length(&self, key: &str) -> BackendResult<i64> {
        Ok(Self::as_list(self.load(key)?)?.len() as i64)
    }

    async fn list_push_bytes(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        self.mutate(key, "pushing list", |item| {
            let mut list = Self::as_list(item)?;
            list.push(Item::Bytes(value.to_vec()));
            Ok((Some(Stored::plain(Item::List(list))), ()))
        })
    }

    async fn list_push_int(&self, key: &str, value: i64) -> BackendResult<()> {
        self.mutate(key, "pushing list", |item| {
            let mut list = Self::as_list(item)?;
            list.push(Item::Int(value));
            Ok((Some(Stored::plain(Item::List(list))), ()))
        })
    }

    async fn list_pop_bytes(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        match self.pop_front(key, "popping list")? {
            None => Ok(None),
            Some(Item::Bytes(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(BackendError::decode("List item not castable to bytes")),
        }
    }

    async fn list_pop_int(&self, key: &str) -> BackendResult<Option<i64>> {
        match self.pop_front(key, "popping list")? {
            None => Ok(None),
            Some(Item::Int(value)) => Ok(Some(value)),
            Some(_) => Err(BackendError::decode("List item not castable to int")),
        }
    }

    async fn get_bytes(&self, key: &str) -> BackendResult<Vec<u8>> {
        match self.load(key)? {
            None => Err(BackendError::NotFound),
            Some(Item::Bytes(bytes)) => Ok(bytes),
            Some(_) => Err(BackendError::decode("Value not castable to bytes")),
        }
    }

    async fn get_float(&self, key: &str) -> BackendResult<f64> {
        match self.load(key)? {
            None => Err(BackendError::NotFound),
            Some(Item::Float(value)) => Ok(value),
            Some(_) => Err(BackendError::decode("Value not castable to float")),
        }
    }

    async fn set_bytes(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        let stored = Stored::expiring(Item::Bytes(value.to_vec()), ttl);
        self.db.insert(key, encode(&stored)?).map_err(storage)?;
        Ok(())
    }

    async fn set_float(&self, key: &str, value: f64, ttl: Option<Duration>) -> BackendResult<()> {
        let stored = Stored::expiring(Item::Float(value), ttl);
        self.db.insert(key, encode(&stored)?).map_err(storage)?;
        Ok(())
    }

    async fn add_to_set(&self, key: &str, score: f64) -> BackendResult<()> {
        self.sets.lock().add(key, score);
        Ok(())
    }

    async fn get_min(&self, key: &str) -> BackendResult<f64> {
        self.sets.lock().min(key).ok_or(BackendError::NotFound)
    }

    async fn get_max(&self, key: &str) -> BackendResult<f64> {
        Ok(self.sets.lock().max(key))
    }

    async fn get_median(&self, key: &str) -> BackendResult<f64> {
        Ok(self.sets.lock().median(key))
    }

    async fn get_cardinality(&self, key: &str) -> BackendResult<i64> {
        Ok(self.sets.lock().cardinality(key))
    }

    async fn range_count(&self, key: &str, min: f64, max: f64) -> BackendResult<i64> {
        Ok(self.sets.lock().range_count(key, min, max))
    }

    async fn increment_counter(&self, key: &str, amount: f64) -> BackendResult<()> {
        self.mutate(key, "incrementing counter", |item| {
            let total = match item {
                None => amount,
                Some(Item::Float(current)) => current + amount,
                Some(_) => return Err(BackendError::decode("Value not castable to float")),
            };
            Ok((Some(Stored::plain(Item::Float(total))), ()))
        })
    }

    async fn map_set_key(&self, map: &str, key: &str, value: &[u8]) -> BackendResult<()> {
        self.mutate(map, "setting map key", |item| {
            let mut entries = Self::as_map(item)?;
            entries.insert(key.to_string(), value.to_vec());
            Ok((Some(Stored::plain(Item::Map(entries))), ()))
        })
    }

    async fn map_get_key_bytes(&self, map: &str, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(Self::as_map(self.load(map)?)?.get(key).cloned())
    }

    async fn map_get_keys(&self, map: &str) -> BackendResult<Vec<String>> {
        Ok(Self::as_map(self.load(map)?)?.keys().cloned().collect())
    }

    async fn map_key_delete(&self, map: &str, key: &str) -> BackendResult<()> {
        self.mutate(map, "deleting map key", |item| {
            let mut entries = Self::as_map(item)?;
            entries.remove(key);
            Ok((Some(Stored::plain(Item::Map(entries))), ()))
        })
    }

    async fn close(&self) -> BackendResult<()> {
        self.db
            .flush()
            .map_err(|e| BackendError::storage(format!("Error closing embedded store: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_frame_round_trips() {
        let stored = Stored::expiring(Item::Bytes(b"payload".to_vec()), Some(Duration::from_secs(60)));

        let raw = encode(&stored).unwrap();
        let decoded = decode(&raw).unwrap();

        assert!(decoded.expires_at_ms.unwrap() > now_ms());
        assert!(matches!(decoded.item, Item::Bytes(ref bytes) if bytes == b"payload"));
    }

    #[test]
    fn plain_frames_never_expire() {
        let stored = Stored::plain(Item::Float(1.5));
        assert_eq!(stored.expires_at_ms, None);
    }

    #[tokio::test]
    async fn mutate_sees_expired_entries_as_absent() {
        let store = EmbeddedCommands::open().unwrap();

        // An already-expired frame written straight to the database.
        let stale = Stored {
            expires_at_ms: Some(now_ms() - 1_000),
            item: Item::Float(99.0),
        };
        store.db.insert("counter", encode(&stale).unwrap()).unwrap();

        store.increment_counter("counter", 2.0).await.unwrap();
        assert_eq!(store.get_float("counter").await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn type_confusion_is_a_decode_error() {
        let store = EmbeddedCommands::open().unwrap();

        store.set_bytes("record", b"blob", None).await.unwrap();

        assert!(matches!(
            store.get_float("record").await.unwrap_err(),
            BackendError::Decode(_)
        ));
        assert!(matches!(
            store.list_push_int("record", 1).await.unwrap_err(),
            BackendError::Decode(_)
        ));
        assert!(matches!(
            store.map_get_keys("record").await.unwrap_err(),
            BackendError::Decode(_)
        ));
    }

    #[tokio::test]
    async fn close_flushes_without_error() {
        let store = EmbeddedCommands::open().unwrap();
        store.set_float("last", 1.0, None).await.unwrap();
        store.close().await.unwrap();
    }
}
