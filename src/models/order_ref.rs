// models/order_ref.rs
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

/// Segment separator in the opaque merchantOrderId string. Fixed by the
/// wire format agreed with Duitku; not renegotiable.
pub const SEGMENT_DELIMITER: char = '-';

/// Structured form of the merchantOrderId Duitku echoes back on callbacks.
///
/// On the wire it is `nonce-userId-courseId-instanceId`. The nonce keeps
/// repeat purchases of the same course by the same user distinguishable to
/// the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub nonce: String,
    pub user_id: i64,
    pub course_id: i64,
    pub instance_id: i64,
}

impl OrderRef {
    pub fn new(nonce: String, user_id: i64, course_id: i64, instance_id: i64) -> Self {
        Self {
            nonce,
            user_id,
            course_id,
            instance_id,
        }
    }

    /// Parses an inbound merchantOrderId. Requires at least four non-empty
    /// segments with numeric ids; anything else is rejected before any
    /// network or database work happens.
    pub fn decode(reference: &str) -> Result<Self> {
        let segments: Vec<&str> = reference.split(SEGMENT_DELIMITER).collect();
        if segments.len() < 4 {
            return Err(AppError::invalid_request(format!(
                "malformed merchantOrderId: {}",
                reference
            )));
        }
        if segments.iter().take(4).any(|segment| segment.is_empty()) {
            return Err(AppError::invalid_request(format!(
                "malformed merchantOrderId: {}",
                reference
            )));
        }

        Ok(Self {
            nonce: segments[0].to_string(),
            user_id: parse_id(segments[1], reference)?,
            course_id: parse_id(segments[2], reference)?,
            instance_id: parse_id(segments[3], reference)?,
        })
    }

    /// Inverse of `decode`; used at purchase initiation only.
    pub fn encode(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.nonce, self.user_id, self.course_id, self.instance_id
        )
    }
}

fn parse_id(segment: &str, reference: &str) -> Result<i64> {
    segment
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| {
            AppError::invalid_request(format!(
                "non-numeric id segment in merchantOrderId: {}",
                reference
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn decodes_four_segment_reference() {
        let order_ref = OrderRef::decode("42-7-3-19").unwrap();
        assert_eq!(order_ref.nonce, "42");
        assert_eq!(order_ref.user_id, 7);
        assert_eq!(order_ref.course_id, 3);
        assert_eq!(order_ref.instance_id, 19);
    }

    #[test]
    fn encode_round_trips() {
        let order_ref = OrderRef::new("1722950000000".to_string(), 7, 3, 19);
        assert_eq!(OrderRef::decode(&order_ref.encode()).unwrap(), order_ref);
    }

    #[rstest]
    #[case("")] // nothing at all
    #[case("7-3-19")] // three segments
    #[case("42-7-3")] // three segments
    #[case("42--3-19")] // empty segment
    #[case("42-x-3-19")] // non-numeric user id
    #[case("42-7-3-x")] // non-numeric instance id
    #[case("42-7.5-3-19")] // id segment is not an integer
    fn rejects_malformed_references(#[case] reference: &str) {
        assert!(OrderRef::decode(reference).is_err());
    }

    #[test]
    fn rejects_negative_ids() {
        // "42--7-3-19" splits into an empty segment followed by "7",
        // so a literal negative id never survives decoding.
        assert!(OrderRef::decode("42--7-3-19").is_err());
    }
}
