//! Resource scenario runner.
//!
//! Usage:
//!   cargo run -p engine_tests --bin scenario_runner -- [engine_tests/data/shapes.json]
//!
//! Runs the cache, alias-chain and factory scenarios and prints a summary.
//! When a catalog file is given, every entry in it is also built through a
//! catalog-backed cache with the built-in shape factories.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context};
use engine_resources::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

struct Outcome {
    id: &'static str,
    name: &'static str,
    duration: Duration,
    error: Option<String>,
}

/// Runs one scenario and captures its result.
fn run_scenario<F>(id: &'static str, name: &'static str, f: F) -> Outcome
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let start = Instant::now();
    let result = f();
    Outcome {
        id,
        name,
        duration: start.elapsed(),
        error: result.err().map(|e| format!("{e:#}")),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let catalog_path = std::env::args().nth(1).map(PathBuf::from);

    println!("Resource Scenario Runner");
    println!("========================\n");

    let mut outcomes = vec![
        run_scenario("RC-001", "copy, drop, evict, rebuild", copy_drop_rebuild),
        run_scenario("RC-002", "single flight under repeated gets", single_flight),
        run_scenario("RC-003", "declined construction is a missing resource", declined),
        run_scenario("AC-001", "last alias destroys for every drop order", every_drop_order),
        run_scenario("AC-002", "moved-from handle is inert", moved_from),
        run_scenario("FR-001", "construct by type tag", construct_by_tag),
        run_scenario("FR-002", "duplicate tag keeps the first factory", duplicate_tag),
    ];
    if let Some(path) = catalog_path {
        outcomes.push(run_scenario("CT-001", "build every catalog entry", || {
            build_catalog(&path)
        }));
    }

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    for outcome in &outcomes {
        match &outcome.error {
            None => println!("  ok   {} {} ({:?})", outcome.id, outcome.name, outcome.duration),
            Some(e) => println!("  FAIL {} {}: {}", outcome.id, outcome.name, e),
        }
    }
    println!("\nTotal: {}  Passed: {}  Failed: {}", outcomes.len(), outcomes.len() - failed, failed);

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn counting_cache() -> (ResourceCache<String, String>, Rc<Cell<u32>>, Rc<Cell<u32>>) {
    let built = Rc::new(Cell::new(0));
    let counter = Rc::clone(&built);
    let cache = ResourceCache::with_config(
        PluggableConstructor::with_creator(move |key: &String| {
            counter.set(counter.get() + 1);
            (!key.is_empty()).then(|| format!("{key}#{}", counter.get()))
        }),
        CacheConfig::named("scenario"),
    );
    let released = Rc::new(Cell::new(0));
    let sink = Rc::clone(&released);
    cache.set_on_release(move |_, _| sink.set(sink.get() + 1));
    (cache, built, released)
}

fn copy_drop_rebuild() -> anyhow::Result<()> {
    let (cache, built, released) = counting_cache();
    let h1 = cache.get("a.png")?;
    let h2 = h1.clone();
    drop(h1);
    ensure!(released.get() == 0, "evicted while h2 is alive");
    drop(h2);
    ensure!(released.get() == 1, "expected one eviction, saw {}", released.get());
    let h3 = cache.get("a.png")?;
    ensure!(built.get() == 2, "expected a fresh construction");
    ensure!(h3.with(|v| v == "a.png#2") == Some(true), "stale value came back");
    Ok(())
}

fn single_flight() -> anyhow::Result<()> {
    let (cache, built, _) = counting_cache();
    let handles = (0..100)
        .map(|_| cache.get("shader.glsl"))
        .collect::<Result<Vec<_>, _>>()?;
    ensure!(built.get() == 1, "constructed {} times", built.get());
    ensure!(handles[0].alias_count() == 100, "chain lost members");
    cache.check_invariants()?;
    Ok(())
}

fn declined() -> anyhow::Result<()> {
    let (cache, _, released) = counting_cache();
    let handle = cache.get("")?;
    ensure!(handle.is_empty(), "declined construction produced a value");
    ensure!(cache.is_empty(), "declined construction left an entry");
    drop(handle);
    ensure!(released.get() == 0, "empty handle triggered an eviction");
    Ok(())
}

fn every_drop_order() -> anyhow::Result<()> {
    let (cache, _, released) = counting_cache();
    let orders = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
    for (round, order) in orders.iter().enumerate() {
        let first = cache.get("mesh")?;
        let mut handles = vec![Some(first.clone()), Some(first.clone()), Some(cache.get("mesh")?)];
        handles.insert(0, Some(first));
        for (step, &index) in order.iter().enumerate() {
            handles[index] = None;
            let expected = round as u32 + u32::from(step == order.len() - 1);
            ensure!(released.get() == expected, "order {order:?} step {step}");
        }
    }
    Ok(())
}

fn moved_from() -> anyhow::Result<()> {
    let (cache, _, released) = counting_cache();
    let mut h1 = cache.get("rig")?;
    let h2 = h1.take();
    drop(h1);
    ensure!(released.get() == 0 && cache.contains("rig"), "move had side effects");
    drop(h2);
    ensure!(released.get() == 1, "moved-to handle did not evict");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Circle {
    radius: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Rect {
    width: f64,
    height: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Circle(Circle),
    Rect(Rect),
}

impl From<Circle> for Shape {
    fn from(c: Circle) -> Self {
        Shape::Circle(c)
    }
}

impl From<Rect> for Shape {
    fn from(r: Rect) -> Self {
        Shape::Rect(r)
    }
}

fn shape_registry() -> anyhow::Result<FactoryRegistry<Shape>> {
    let mut registry = FactoryRegistry::new();
    registry.register_deserialize::<Circle>("Circle")?;
    registry.register_deserialize::<Rect>("Rect")?;
    Ok(registry)
}

fn construct_by_tag() -> anyhow::Result<()> {
    let registry = shape_registry()?;
    let circle = registry.construct(&json!({"type": "Circle", "radius": 5}))?;
    ensure!(circle == Some(Shape::Circle(Circle { radius: 5.0 })), "got {circle:?}");
    match registry.construct(&json!({"type": "Hexagon"})) {
        Err(ResourceError::UnknownTypeTag(tag)) if tag == "Hexagon" => Ok(()),
        other => bail!("expected UnknownTypeTag, got {other:?}"),
    }
}

fn duplicate_tag() -> anyhow::Result<()> {
    let mut registry = shape_registry()?;
    match registry.register_deserialize::<Rect>("Circle") {
        Err(ResourceError::DuplicateFactoryTag(_)) => {}
        other => bail!("expected DuplicateFactoryTag, got {other:?}"),
    }
    let circle = registry.construct(&json!({"type": "Circle", "radius": 1}))?;
    ensure!(matches!(circle, Some(Shape::Circle(_))), "first factory was shadowed");
    Ok(())
}

fn build_catalog(path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read catalog {}", path.display()))?;
    let catalog = ConfigCatalog::from_json_str(shape_registry()?, &text).context("parse catalog")?;
    let mut names: Vec<String> = catalog.names().map(str::to_owned).collect();
    names.sort();

    let cache = ResourceCache::with_config(catalog, CacheConfig::named("catalog"));
    let evicted = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&evicted);
    cache.set_on_release(move |key: &String, _| sink.borrow_mut().push(key.clone()));

    let mut failures = 0;
    let mut built = 0;
    for name in &names {
        match cache.get(name.as_str()) {
            Ok(handle) if handle.is_empty() => warn!(%name, "catalog entry declined"),
            Ok(handle) => {
                info!(%name, shape = ?handle.with(Shape::clone), "built");
                built += 1;
            }
            Err(error) => {
                warn!(%name, %error, "catalog entry failed");
                failures += 1;
            }
        }
    }
    ensure!(failures == 0, "{failures} catalog entries failed");
    ensure!(cache.is_empty(), "catalog cache kept entries after all handles dropped");
    ensure!(evicted.borrow().len() == built, "evictions do not match constructions");
    Ok(())
}
