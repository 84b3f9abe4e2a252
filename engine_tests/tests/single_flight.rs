//! Cache-level behaviour: single flight, eviction, fresh generations.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::Context;
use engine_resources::prelude::*;

/// Texture payload tagged with the construction that produced it.
#[derive(Debug, Clone, PartialEq)]
struct Texture {
    path: String,
    generation: u32,
}

struct TextureCache {
    cache: ResourceCache<String, Texture>,
    built: Rc<Cell<u32>>,
    released: Rc<RefCell<Vec<(String, Texture)>>>,
}

fn texture_cache() -> TextureCache {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();

    let built = Rc::new(Cell::new(0));
    let counter = Rc::clone(&built);
    let creator = PluggableConstructor::with_creator(move |path: &String| {
        counter.set(counter.get() + 1);
        Some(Texture {
            path: path.clone(),
            generation: counter.get(),
        })
    });
    let cache = ResourceCache::with_config(creator, CacheConfig::named("textures"));

    let released = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&released);
    cache.set_on_release(move |key: &String, texture| sink.borrow_mut().push((key.clone(), texture)));

    TextureCache {
        cache,
        built,
        released,
    }
}

#[test]
fn copy_then_drop_both_evicts_once() -> anyhow::Result<()> {
    let t = texture_cache();

    let h1 = t.cache.get("a.png").context("first get")?;
    assert_eq!(t.built.get(), 1);
    let h2 = h1.clone();

    drop(h1);
    assert!(t.released.borrow().is_empty(), "value still aliased by h2");

    drop(h2);
    {
        let released = t.released.borrow();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, "a.png");
        assert_eq!(released[0].1.generation, 1);
    }

    let h3 = t.cache.get("a.png")?;
    assert_eq!(t.built.get(), 2);
    assert_eq!(h3.with(|tex| tex.generation), Some(2));
    Ok(())
}

#[test]
fn repeated_gets_never_rebuild_while_held() -> anyhow::Result<()> {
    let t = texture_cache();
    let anchor = t.cache.get("grass.png")?;

    let mut extra = Vec::new();
    for _ in 0..50 {
        extra.push(t.cache.get("grass.png")?);
        // Dropping transient handles must not evict while `anchor` lives.
        drop(t.cache.get("grass.png")?);
    }
    assert_eq!(t.built.get(), 1);
    assert_eq!(anchor.alias_count(), 51);
    assert!(extra.iter().all(|h| h.same_value(&anchor)));
    assert!(t.released.borrow().is_empty());

    let stats = t.cache.stats();
    assert_eq!(stats.constructions, 1);
    assert_eq!(stats.hits, 100);
    t.cache.check_invariants()?;
    Ok(())
}

#[test]
fn constructions_count_generations() -> anyhow::Result<()> {
    let t = texture_cache();
    let mut previous = None;

    for generation in 1..=5 {
        let handles: Vec<_> = (0..3)
            .map(|_| t.cache.get("rock.png"))
            .collect::<Result<_, _>>()?;
        let id = handles[0].value_id();
        assert_ne!(id, previous, "a new generation must be a new value");
        previous = id;
        assert_eq!(t.built.get(), generation);
        drop(handles);
        assert!(!t.cache.contains("rock.png"));
    }

    assert_eq!(t.released.borrow().len(), 5);
    assert_eq!(t.cache.stats().evictions, 5);
    Ok(())
}

#[test]
fn keys_are_independent() -> anyhow::Result<()> {
    let t = texture_cache();
    let a = t.cache.get("a.png")?;
    let b = t.cache.get("b.png")?;
    assert!(!a.same_value(&b));
    assert_eq!(t.cache.len(), 2);

    let mut keys = t.cache.keys();
    keys.sort();
    assert_eq!(keys, vec!["a.png".to_string(), "b.png".to_string()]);

    drop(a);
    assert_eq!(t.released.borrow().len(), 1);
    assert!(t.cache.contains("b.png"));
    assert_eq!(b.with(|tex| tex.path.clone()).as_deref(), Some("b.png"));
    Ok(())
}

#[test]
fn assign_moves_between_chains() -> anyhow::Result<()> {
    let t = texture_cache();
    let a = t.cache.get("a.png")?;
    let mut slot = t.cache.get("b.png")?;

    slot.assign(&a);
    assert_eq!(t.released.borrow().len(), 1, "b.png lost its only alias");
    assert_eq!(a.alias_count(), 2);

    slot.assign(&a);
    assert_eq!(a.alias_count(), 2, "assigning the same value is a no-op");
    t.cache.check_invariants()?;
    Ok(())
}
