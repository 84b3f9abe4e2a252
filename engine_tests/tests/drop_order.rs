//! Alias-chain ownership: exactly-once destruction for any drop order,
//! reference semantics of copies, inert moved-from handles.

use std::cell::Cell;
use std::rc::Rc;

use engine_resources::prelude::*;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

fn counted_cache() -> (ResourceCache<u32, String>, Rc<Cell<u32>>) {
    let cache = ResourceCache::new(PluggableConstructor::with_creator(|id: &u32| {
        Some(format!("mesh-{id}"))
    }));
    let evicted = Rc::new(Cell::new(0));
    let counter = Rc::clone(&evicted);
    cache.set_on_release(move |_, _| counter.set(counter.get() + 1));
    (cache, evicted)
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    permutations(n - 1)
        .into_iter()
        .flat_map(|rest| {
            (0..=rest.len()).map(move |at| {
                let mut perm = rest.clone();
                perm.insert(at, n - 1);
                perm
            })
        })
        .collect()
}

/// Drops `handles` in `order`, checking that eviction fires only on the last.
fn drop_in_order(
    cache: &ResourceCache<u32, String>,
    evicted: &Cell<u32>,
    mut handles: Vec<Option<Handle<String>>>,
    order: &[usize],
) -> anyhow::Result<()> {
    let before = evicted.get();
    for (step, &index) in order.iter().enumerate() {
        handles[index] = None;
        let last = step + 1 == order.len();
        assert_eq!(
            evicted.get() - before,
            u32::from(last),
            "order {order:?}, step {step}"
        );
        cache.check_invariants()?;
    }
    Ok(())
}

#[test]
fn every_drop_order_of_five_evicts_exactly_once() -> anyhow::Result<()> {
    let (cache, evicted) = counted_cache();
    for order in permutations(5) {
        // Mix of cache hits and direct copies of different chain members.
        let first = cache.get(&1)?;
        let second = first.clone();
        let third = cache.get(&1)?;
        let fourth = second.clone();
        let fifth = cache.get(&1)?;
        let handles = vec![Some(first), Some(second), Some(third), Some(fourth), Some(fifth)];
        drop_in_order(&cache, &evicted, handles, &order)?;
        assert!(cache.is_empty());
    }
    assert_eq!(evicted.get(), 120);
    assert_eq!(cache.stats().constructions, 120);
    Ok(())
}

#[test]
fn shuffled_drop_orders_of_large_chains() -> anyhow::Result<()> {
    let (cache, evicted) = counted_cache();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for round in 0..20u32 {
        let root = cache.get(&round)?;
        let mut handles = vec![Some(root)];
        for _ in 0..31 {
            // Copy a random live member so splices land all over the chain.
            let source = rng.gen_range(0..handles.len());
            let copy = match rng.gen_bool(0.5) {
                true => handles[source].clone().unwrap_or_default(),
                false => cache.get(&round)?,
            };
            handles.push(Some(copy));
        }
        let mut order: Vec<usize> = (0..handles.len()).collect();
        order.shuffle(&mut rng);
        drop_in_order(&cache, &evicted, handles, &order)?;
    }
    assert_eq!(evicted.get(), 20);
    Ok(())
}

#[test]
fn copy_outlives_source() -> anyhow::Result<()> {
    let (cache, evicted) = counted_cache();
    let h1 = cache.get(&7)?;
    let h2 = h1.clone();
    let id = h1.value_id();

    drop(h1);
    assert_eq!(evicted.get(), 0);
    assert_eq!(h2.value_id(), id);
    assert_eq!(h2.with(String::clone).as_deref(), Some("mesh-7"));
    assert_eq!(h2.alias_count(), 1);
    Ok(())
}

#[test]
fn moved_from_handle_is_inert() -> anyhow::Result<()> {
    let (cache, evicted) = counted_cache();
    let mut h1 = cache.get(&3)?;
    let h2 = h1.take();

    assert!(h1.is_empty());
    drop(h1);
    assert_eq!(evicted.get(), 0);
    assert!(cache.contains(&3));
    assert_eq!(h2.alias_count(), 1);

    // A native move keeps the chain intact as well.
    let h3 = h2;
    assert_eq!(h3.alias_count(), 1);
    drop(h3);
    assert_eq!(evicted.get(), 1);
    Ok(())
}
