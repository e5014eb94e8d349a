use std::collections::HashSet;

use super::order::Order;

// ============================================================================
// Inbound Message Rules
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("order_uid is empty")]
    EmptyOrderUid,

    #[error("duplicate item rid: {0}")]
    DuplicateItemRid(String),
}

/// Reasons a payload never reaches the service. None of these are retried
/// against storage.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message has no payload")]
    Empty,

    #[error("malformed order json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid order: {0}")]
    Invalid(#[from] ValidationError),
}

impl Order {
    /// Decode a bus payload into a validated order.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }

        let order: Order = serde_json::from_slice(payload)?;
        order.validate()?;

        Ok(order.with_storage_precision())
    }

    /// `rid` is optional, but a non-empty one keys its item within the order
    /// and may appear only once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_uid.trim().is_empty() {
            return Err(ValidationError::EmptyOrderUid);
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in self.items.iter().filter(|item| item.has_rid()) {
            if !seen.insert(item.rid.as_str()) {
                return Err(ValidationError::DuplicateItemRid(item.rid.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;

    fn item(rid: &str) -> Item {
        Item { rid: rid.to_string(), ..Default::default() }
    }

    #[test]
    fn test_decode_valid_order() {
        let payload = br#"{"orderUid": "o-1", "items": [{"rid": "a"}, {"rid": "b"}]}"#;
        let order = Order::decode(payload).unwrap();

        assert_eq!(order.order_uid, "o-1");
        let rids: Vec<&str> = order.items.iter().map(|item| item.rid.as_str()).collect();
        assert_eq!(rids, vec!["a", "b"]);
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        assert!(matches!(Order::decode(b""), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(Order::decode(b"not json at all"), Err(DecodeError::Json(_))));
        assert!(matches!(Order::decode(b"[1, 2, 3]"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_rejects_missing_order_uid() {
        let result = Order::decode(br#"{"trackNumber": "T1"}"#);
        assert!(matches!(
            result,
            Err(DecodeError::Invalid(ValidationError::EmptyOrderUid))
        ));
    }

    #[test]
    fn test_decode_accepts_items_without_rid() {
        let payload = br#"{
            "orderUid": "uniqueOrderID123",
            "items": [
                {"chrtId": 1, "name": "Test Item 1", "price": 100},
                {"chrtId": 2, "name": "Test Item 2", "price": 50}
            ]
        }"#;
        let order = Order::decode(payload).unwrap();

        assert_eq!(order.items.len(), 2);
        assert!(order.items.iter().all(|item| item.rid.is_empty()));
        assert!(!order.items_keyed_by_rid());
    }

    #[test]
    fn test_validate_allows_repeated_empty_rids() {
        let order = Order {
            order_uid: "o-1".into(),
            items: vec![item("a"), item(""), item("")],
            ..Default::default()
        };
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_rids() {
        let order = Order {
            order_uid: "o-1".into(),
            items: vec![item("a"), item("b"), item("a")],
            ..Default::default()
        };
        assert_eq!(
            order.validate(),
            Err(ValidationError::DuplicateItemRid("a".into()))
        );
    }

    #[test]
    fn test_validate_accepts_order_without_items() {
        let order = Order { order_uid: "o-1".into(), ..Default::default() };
        assert!(order.validate().is_ok());
    }
}
