// Example usage of the weft engine
// Demonstrates local editing, wire exchange between peers, convergence of
// concurrent edits and deferred out-of-order delivery.

use weft::{Engine, PeerId};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== weft: replicated sequence engine ===\n");

    example_local_editing();
    example_wire_exchange();
    example_concurrent_inserts();
    example_out_of_order_delivery();
}

fn example_local_editing() {
    println!("Example 1: Local Editing");
    println!("========================");

    let mut doc = Engine::new(PeerId::from("alice")).unwrap();

    for (i, ch) in "Hello".chars().enumerate() {
        doc.insert_local(i, ch).unwrap();
    }
    println!("After insertions: {:?}", doc.read());

    doc.delete_local(4).unwrap();
    println!("After deleting index 4: {:?}", doc.read());
    println!("Visible length: {} (the tombstone stays in the list)\n", doc.len());
}

fn example_wire_exchange() {
    println!("Example 2: Wire Exchange Between Two Peers");
    println!("===========================================");

    let mut alice = Engine::new(PeerId::from("alice")).unwrap();
    let mut bob = Engine::new(PeerId::from("bob")).unwrap();

    // A transport subscribes to the execution listener and broadcasts the
    // encoded form. Here we just collect the JSON by hand.
    let h = alice.insert_local(0, 'h').unwrap();
    let i = alice.insert_local(1, 'i').unwrap();

    for uid in [&h, &i] {
        let json = serde_json::to_string(&alice.encode(uid).unwrap()).unwrap();
        println!("On the wire: {}", json);
        bob.receive_json(&json).unwrap();
    }

    println!("Alice: {:?}", alice.read());
    println!("Bob:   {:?}", bob.read());
    println!("Converged: {}\n", alice.read() == bob.read());
}

fn example_concurrent_inserts() {
    println!("Example 3: Concurrent Inserts at the Same Position");
    println!("===================================================");

    let mut alice = Engine::new(PeerId::from("alice")).unwrap();
    let mut bob = Engine::new(PeerId::from("bob")).unwrap();

    // Both insert at the beginning without having seen each other.
    let a = alice.insert_local(0, 'a').unwrap();
    let b = bob.insert_local(0, 'b').unwrap();

    // Exchange in opposite orders.
    bob.receive(alice.encode(&a).unwrap()).unwrap();
    alice.receive(bob.encode(&b).unwrap()).unwrap();

    println!("Alice: {:?}", alice.read());
    println!("Bob:   {:?}", bob.read());
    println!("Converged: {}", alice.read() == bob.read());
    println!("(equal-distance siblings order by creator: alice < bob)\n");
}

fn example_out_of_order_delivery() {
    println!("Example 4: Out-of-Order Delivery");
    println!("=================================");

    let mut alice = Engine::new(PeerId::from("alice")).unwrap();
    let x = alice.insert_local(0, 'x').unwrap();
    let del = alice.delete_local(0).unwrap();

    // carol hears about the delete before the insert it targets.
    let mut carol = Engine::new(PeerId::from("carol")).unwrap();
    carol.receive(alice.encode(&del).unwrap()).unwrap();
    println!("After the delete alone: {:?} (deferred)", carol.read());

    carol.receive(alice.encode(&x).unwrap()).unwrap();
    println!("After the insert arrives: {:?} (tombstoned on arrival)", carol.read());
    println!("History holds {} operations", carol.history().len());
}
