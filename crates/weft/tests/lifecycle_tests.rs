// Lifecycle tests: reference resolution, deferral and wake-up, the wire
// codec, delimiter arrival orders and the fatal error kinds.

#[cfg(test)]
mod lifecycle_tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use weft::{EncodedOp, Engine, EngineError, ExecOutcome, Identifier, PeerId};

    fn engine(peer: &str) -> Engine<char> {
        Engine::new(PeerId::from(peer)).unwrap()
    }

    fn id(peer: &str, n: u64) -> Identifier {
        Identifier::new(PeerId::from(peer), n)
    }

    #[test]
    fn partial_resolution_is_retained_across_validate_calls() {
        let mut alice = engine("alice");
        let x = alice.insert_local(0, 'x').unwrap();

        // Crafted insert referencing x as prev with HEAD as origin. On a
        // replica that has never seen x, only x stays unresolved.
        let crafted: EncodedOp<char> = EncodedOp::ImmutableObject {
            uid: id("carol", 1),
            prev: x.clone(),
            next: Identifier::tail(),
            origin: Some(Identifier::head()),
            content: 'w',
        };

        let mut bob = engine("bob");
        bob.receive(crafted).unwrap();

        let parked = bob.history().get(&id("carol", 1)).unwrap();
        assert!(!parked.is_executed());
        // origin and next resolved against the delimiters; x is missing
        assert_eq!(parked.pending_refs(), vec![x.clone()]);

        bob.receive(alice.encode(&x).unwrap()).unwrap();
        let woken = bob.history().get(&id("carol", 1)).unwrap();
        assert!(woken.is_executed());
        assert_eq!(bob.read(), vec!['x', 'w']);
    }

    #[test]
    fn execute_is_idempotent() {
        let mut alice = engine("alice");
        let x = alice.insert_local(0, 'x').unwrap();

        let before = alice.encode(&x).unwrap();
        assert_eq!(alice.execute(&x).unwrap(), ExecOutcome::Executed);
        assert_eq!(alice.execute(&x).unwrap(), ExecOutcome::Executed);
        assert_eq!(alice.encode(&x).unwrap(), before);
        assert_eq!(alice.read(), vec!['x']);
    }

    #[test]
    fn execution_listeners_fire_for_remote_operations_too() {
        let mut alice = engine("alice");
        let x = alice.insert_local(0, 'x').unwrap();

        let seen: Rc<RefCell<Vec<Identifier>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut bob = engine("bob");
        bob.on_execute(move |encoded| sink.borrow_mut().push(encoded.uid().clone()));
        bob.receive(alice.encode(&x).unwrap()).unwrap();

        assert_eq!(&*seen.borrow(), &[x]);
    }

    #[test]
    fn deferred_operations_do_not_reach_listeners_until_executed() {
        let mut alice = engine("alice");
        let x = alice.insert_local(0, 'x').unwrap();
        let x_encoded = alice.encode(&x).unwrap();
        let del = alice.delete_local(0).unwrap();
        let del_encoded = alice.encode(&del).unwrap();

        let seen: Rc<RefCell<Vec<Identifier>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut bob = engine("bob");
        bob.on_execute(move |encoded| sink.borrow_mut().push(encoded.uid().clone()));

        bob.receive(del_encoded).unwrap();
        assert!(seen.borrow().is_empty());

        // x wakes the parked delete; both fire, in dependency order.
        bob.receive(x_encoded).unwrap();
        assert_eq!(&*seen.borrow(), &[x, del]);
    }

    #[test]
    fn codec_roundtrip_through_a_fresh_replica() {
        let mut alice = engine("alice");
        alice.insert_local(0, 'a').unwrap();
        alice.insert_local(1, 'b').unwrap();
        alice.delete_local(0).unwrap();

        let mut bob = engine("bob");
        for op in alice.encoded_ops() {
            bob.receive(op).unwrap();
        }

        // Converged replicas encode every operation identically.
        let canon = |mut ops: Vec<EncodedOp<char>>| {
            ops.sort_by_key(|op| op.uid().clone());
            ops
        };
        assert_eq!(canon(alice.encoded_ops()), canon(bob.encoded_ops()));
    }

    #[test]
    fn receive_json_roundtrip() {
        let mut alice = engine("alice");
        let x = alice.insert_local(0, 'x').unwrap();
        let raw = serde_json::to_string(&alice.encode(&x).unwrap()).unwrap();

        let mut bob = engine("bob");
        bob.receive_json(&raw).unwrap();
        assert_eq!(bob.read(), vec!['x']);
    }

    #[test]
    fn undecodable_messages_are_dropped_without_side_effects() {
        let mut bob = engine("bob");
        let before = bob.history().len();

        let err = bob.receive_json("{\"type\":\"Insert\"}").unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
        assert_eq!(bob.history().len(), before);

        // the replica keeps working afterwards
        bob.insert_local(0, 'x').unwrap();
        assert_eq!(bob.read(), vec!['x']);
    }

    #[test]
    fn joining_replica_accepts_delimiters_in_either_order() {
        let alice = engine("alice");
        let head = alice.encode(alice.head()).unwrap();
        let tail = alice.encode(alice.tail()).unwrap();

        // HEAD first: executes immediately, TAIL completes the link.
        let mut bob = Engine::<char>::join(PeerId::from("bob")).unwrap();
        bob.receive(head.clone()).unwrap();
        assert!(bob.history().get(bob.head()).unwrap().is_executed());
        bob.receive(tail.clone()).unwrap();
        let bob_head = bob.history().get(bob.head()).unwrap();
        assert_eq!(bob_head.next_cl(), Some(bob.tail()));

        // TAIL first: parks until HEAD arrives.
        let mut carol = Engine::<char>::join(PeerId::from("carol")).unwrap();
        carol.receive(tail).unwrap();
        assert!(!carol.history().get(carol.tail()).unwrap().is_executed());
        carol.receive(head).unwrap();
        assert!(carol.history().get(carol.tail()).unwrap().is_executed());
        let carol_head = carol.history().get(carol.head()).unwrap();
        assert_eq!(carol_head.next_cl(), Some(carol.tail()));

        // and the sequence is usable
        carol.insert_local(0, 'c').unwrap();
        assert_eq!(carol.read(), vec!['c']);
    }

    #[test]
    fn delimiter_without_neighbors_is_fatal() {
        let mut bob = Engine::<char>::join(PeerId::from("bob")).unwrap();
        let orphan: EncodedOp<char> = EncodedOp::Delimiter {
            uid: id("mallory", 1),
            prev: None,
            next: None,
        };
        assert!(matches!(
            bob.receive(orphan),
            Err(EngineError::UnderspecifiedDelimiter(_))
        ));
    }

    #[test]
    fn delimiter_onto_an_occupied_link_is_fatal() {
        let alice = engine("alice");
        let mut bob = Engine::<char>::join(PeerId::from("bob")).unwrap();
        bob.receive(alice.encode(alice.head()).unwrap()).unwrap();
        bob.receive(alice.encode(alice.tail()).unwrap()).unwrap();

        // A second delimiter claiming HEAD as its left neighbor collides
        // with the TAIL already linked there.
        let imposter: EncodedOp<char> = EncodedOp::Delimiter {
            uid: id("mallory", 2),
            prev: Some(Identifier::head()),
            next: None,
        };
        assert!(matches!(
            bob.receive(imposter),
            Err(EngineError::DuplicateOperation(_))
        ));
    }

    #[test]
    fn delete_of_a_delimiter_is_ignored() {
        let mut bob = engine("bob");
        let rogue: EncodedOp<char> = EncodedOp::Delete {
            uid: id("mallory", 3),
            deletes: Identifier::head(),
        };
        bob.receive(rogue).unwrap();
        assert!(!bob.history().get(bob.head()).unwrap().is_deleted());
        bob.insert_local(0, 'x').unwrap();
        assert_eq!(bob.read(), vec!['x']);
    }

    #[test]
    fn restored_counter_never_reissues_identities() {
        let mut alice = engine("alice");
        alice.insert_local(0, 'x').unwrap();
        let last = alice.insert_local(1, 'y').unwrap();

        // a restarted replica must resume numbering past its own history
        let mut restarted = engine("alice");
        restarted.restore_counter(last.op_number);
        for op in alice.encoded_ops() {
            restarted.receive(op).unwrap();
        }
        let fresh = restarted.insert_local(2, 'z').unwrap();
        assert!(fresh.op_number > last.op_number);
        assert_eq!(restarted.read(), vec!['x', 'y', 'z']);
    }

    #[test]
    #[should_panic]
    fn listener_panics_propagate() {
        let mut alice = engine("alice");
        alice.on_execute(|_| panic!("listener blew up"));
        let _ = alice.insert_local(0, 'x');
    }
}
