//! Data-driven construction: factory tags, catalogs behind caches, and caches
//! started through a `ResourceContext`.

use std::cell::RefCell;
use std::rc::Rc;

use engine_resources::prelude::*;
use serde::Deserialize;
use serde_json::json;

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
    fn from(circle: Circle) -> Self {
        Shape::Circle(circle)
    }
}

impl From<Rect> for Shape {
    fn from(rect: Rect) -> Self {
        Shape::Rect(rect)
    }
}

fn shapes() -> anyhow::Result<FactoryRegistry<Shape>> {
    let mut registry = FactoryRegistry::new();
    registry.register_deserialize::<Circle>("Circle")?;
    registry.register_deserialize::<Rect>("Rect")?;
    Ok(registry)
}

#[test]
fn circle_by_tag_and_unknown_hexagon() -> anyhow::Result<()> {
    let registry = shapes()?;
    let circle = registry.construct(&json!({"type": "Circle", "radius": 5}))?;
    assert_eq!(circle, Some(Shape::Circle(Circle { radius: 5.0 })));

    let err = registry
        .construct(&json!({"type": "Hexagon"}))
        .expect_err("hexagons are not registered");
    assert_eq!(err, ResourceError::UnknownTypeTag("Hexagon".into()));
    assert!(!err.is_fatal());
    Ok(())
}

#[test]
fn duplicate_tag_keeps_first_factory() -> anyhow::Result<()> {
    let mut registry = FactoryRegistry::new();
    registry.register_factory("Circle", |_| Some(Shape::Circle(Circle { radius: 1.0 })))?;
    let err = registry
        .register_factory("Circle", |_| Some(Shape::Circle(Circle { radius: 2.0 })))
        .expect_err("second registration must be rejected");
    assert_eq!(err, ResourceError::DuplicateFactoryTag("Circle".into()));

    let built = registry.construct(&json!({"type": "Circle"}))?;
    assert_eq!(built, Some(Shape::Circle(Circle { radius: 1.0 })));
    Ok(())
}

const SHAPE_CATALOG: &str = r#"{
    "wheel":  { "type": "Circle", "radius": 0.5 },
    "door":   { "type": "Rect", "width": 1.0, "height": 2.0 },
    "broken": { "type": "Rect", "width": 1.0 },
    "alien":  { "type": "Hexagon" }
}"#;

#[test]
fn catalog_backed_cache() -> anyhow::Result<()> {
    let catalog = ConfigCatalog::from_json_str(shapes()?, SHAPE_CATALOG)?;
    let cache = ResourceCache::with_config(catalog, CacheConfig::named("shapes"));
    let evicted = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&evicted);
    cache.set_on_release(move |key: &String, _| sink.borrow_mut().push(key.clone()));

    let wheel = cache.get("wheel")?;
    let again = cache.get("wheel")?;
    assert!(wheel.same_value(&again));
    assert_eq!(
        wheel.with(Shape::clone),
        Some(Shape::Circle(Circle { radius: 0.5 }))
    );

    // Missing names and nodes the factory declines are missing resources.
    assert!(cache.get("nothing")?.is_empty());
    assert!(cache.get("broken")?.is_empty());
    assert_eq!(
        cache.get("alien").unwrap_err(),
        ResourceError::UnknownTypeTag("Hexagon".into())
    );
    assert_eq!(cache.len(), 1);

    drop((wheel, again));
    assert_eq!(*evicted.borrow(), vec!["wheel".to_string()]);
    Ok(())
}

#[derive(Debug)]
struct Material {
    name: String,
    albedo: Handle<String>,
}

type Textures = PluggableConstructor<String, String>;

#[test]
fn context_wires_dependent_caches() -> anyhow::Result<()> {
    let mut ctx = ResourceContext::new();
    let textures = ctx.start_up::<String, String, Textures>(PluggableConstructor::with_creator(
        |path: &String| Some(format!("texels:{path}")),
    ))?;
    textures.set_on_release(|_, _| {});

    // Materials pull their albedo through the texture cache.
    let deps = ctx.cache::<String, String, Textures>()?;
    let materials = ctx.start_up::<String, Material, PluggableConstructor<String, Material>>(
        PluggableConstructor::with_creator(move |name: &String| {
            let albedo = deps.get(&format!("{name}.png")).ok()?;
            Some(Material {
                name: name.clone(),
                albedo,
            })
        }),
    )?;
    materials.set_on_release(|_, material| drop(material));

    let brick = materials.get("brick")?;
    let brick_texture = textures.get("brick.png")?;
    assert!(brick
        .with(|m| m.albedo.same_value(&brick_texture))
        .unwrap_or(false));
    assert_eq!(brick_texture.alias_count(), 2);

    // Evicting the material releases its texture alias.
    drop(brick);
    assert!(!materials.contains("brick"));
    assert_eq!(brick_texture.alias_count(), 1);
    drop(brick_texture);
    assert!(textures.is_empty());

    ctx.shut_down::<String, Material, PluggableConstructor<String, Material>>()?;
    ctx.shut_down::<String, String, Textures>()?;
    assert!(!ctx.is_running::<String, String, Textures>());
    Ok(())
}

#[test]
fn material_names_survive_generations() -> anyhow::Result<()> {
    let textures: ResourceCache<String, String> =
        ResourceCache::new(PluggableConstructor::with_creator(|p: &String| Some(p.clone())));
    textures.set_on_release(|_, _| {});
    let deps = textures.clone();
    let materials: ResourceCache<String, Material> =
        ResourceCache::new(PluggableConstructor::with_creator(move |name: &String| {
            Some(Material {
                name: name.clone(),
                albedo: deps.get(&format!("{name}.png")).ok()?,
            })
        }));
    let names = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&names);
    materials.set_on_release(move |_, material: Material| sink.borrow_mut().push(material.name));

    for _ in 0..3 {
        let stone = materials.get("stone")?;
        assert_eq!(stone.with(|m| m.name.clone()).as_deref(), Some("stone"));
    }
    assert_eq!(names.borrow().len(), 3);
    assert!(textures.is_empty());
    assert_eq!(textures.stats().constructions, 3);
    Ok(())
}
