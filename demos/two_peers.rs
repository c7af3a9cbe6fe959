//! Two peers editing a shared document through a flaky link.
//!
//! ```text
//! RUST_LOG=replica_sync=debug cargo run --example two_peers
//! ```

use std::rc::Rc;

use replica_sync::prelude::*;
use tracing_subscriber::EnvFilter;

fn show(label: &str, a: &Replica, b: &Replica) {
    println!("--- {label}");
    println!("  {}: {:?} counters={:?}", a.name(), a.text(), a.counters());
    println!("  {}: {:?} counters={:?}", b.name(), b.text(), b.counters());
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let alice = Rc::new(Replica::new("alice"));
    let bob = Rc::new(Replica::new("bob"));
    let link = SyncLink::new(Rc::clone(&alice), Rc::clone(&bob))?;

    link.on_sync_event(|event| {
        println!(
            "  [{:?}] {} -> {} ({} bytes)",
            event.kind, event.from, event.to, event.bytes
        );
    });

    // Phase 1: both online, every edit is relayed immediately.
    alice.insert_text(0, "hello")?;
    bob.insert_text(5, " world")?;
    alice.increment_counter(1)?;
    show("online", &alice, &bob);

    // Phase 2: bob drops off; alice's edits queue up.
    link.set_online("bob", false)?;
    alice.insert_text(11, "!")?;
    alice.increment_counter(1)?;
    bob.insert_text(0, ">> ")?;
    bob.increment_counter(-1)?;
    show("bob offline", &alice, &bob);

    // Phase 3: bob returns; state vectors decide what each side is missing.
    link.set_online("bob", true)?;
    show("reconnected", &alice, &bob);

    link.destroy();
    Ok(())
}
