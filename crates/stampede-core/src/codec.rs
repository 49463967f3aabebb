//! Binary codec for records kept in the backing store.
//!
//! Every consumer of the store uses the same compact encoding, so a blob
//! written by one component can be drained and decoded by another.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BackendError, BackendResult};

/// Encodes a record for storage.
pub fn to_bytes<T: Serialize>(value: &T) -> BackendResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| BackendError::decode(format!("Error encoding value: {e}")))
}

/// Decodes a stored record. Failures are fatal to the request.
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> BackendResult<T> {
    bincode::deserialize(bytes).map_err(|e| BackendError::decode(format!("Error decoding value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    #[test]
    fn round_trips_an_event() {
        let event = Event {
            kind: "START_USERS".to_string(),
            payload: b"{\"IDs\":[]}".to_vec(),
        };

        let bytes = to_bytes(&event).unwrap();
        let decoded: Event = from_bytes(&bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = from_bytes::<Event>(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }
}
