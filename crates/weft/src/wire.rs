// Wire encoding for over-the-network exchange of operations.
// Variant-tagged the same way the transport messages tag themselves, so a
// peer can dispatch on "type" without trial decoding.

use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;

/// Encoded form of an executed operation.
///
/// This is what execution listeners receive and what `receive` accepts
/// from the transport. `content` is opaque to the engine; it only has to
/// serialize. Reference fields are plain identifiers; decoding produces an
/// operation whose references are pending until their targets execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EncodedOp<T> {
    Delete {
        uid: Identifier,
        deletes: Identifier,
    },

    Insert {
        uid: Identifier,
        prev: Identifier,
        next: Identifier,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<Identifier>,
    },

    ImmutableObject {
        uid: Identifier,
        prev: Identifier,
        next: Identifier,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<Identifier>,
        content: T,
    },

    Delimiter {
        uid: Identifier,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev: Option<Identifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<Identifier>,
    },
}

impl<T> EncodedOp<T> {
    pub fn uid(&self) -> &Identifier {
        match self {
            EncodedOp::Delete { uid, .. }
            | EncodedOp::Insert { uid, .. }
            | EncodedOp::ImmutableObject { uid, .. }
            | EncodedOp::Delimiter { uid, .. } => uid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::PeerId;

    fn id(peer: &str, n: u64) -> Identifier {
        Identifier::new(PeerId::from(peer), n)
    }

    #[test]
    fn insert_roundtrips_and_omits_equal_origin() {
        let op: EncodedOp<char> = EncodedOp::Insert {
            uid: id("alice", 1),
            prev: Identifier::head(),
            next: Identifier::tail(),
            origin: None,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""type":"Insert""#));
        assert!(!json.contains("origin"));

        let back: EncodedOp<char> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn immutable_object_carries_content() {
        let op = EncodedOp::ImmutableObject {
            uid: id("bob", 2),
            prev: id("alice", 1),
            next: Identifier::tail(),
            origin: Some(Identifier::head()),
            content: "payload".to_string(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""type":"ImmutableObject""#));
        assert!(json.contains(r#""content":"payload""#));

        let back: EncodedOp<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn delimiter_neighbors_are_optional() {
        let head: EncodedOp<char> = EncodedOp::Delimiter {
            uid: Identifier::head(),
            prev: None,
            next: Some(Identifier::tail()),
        };
        let json = serde_json::to_string(&head).unwrap();
        assert!(!json.contains("prev"));

        let back: EncodedOp<char> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, head);
    }

    #[test]
    fn unknown_tag_is_a_decode_error() {
        let raw = r#"{"type":"Move","uid":{"creator":"alice","op_number":1}}"#;
        assert!(serde_json::from_str::<EncodedOp<char>>(raw).is_err());
    }
}
