//! Tags declared with `message_tags!` against the runtime registry.

#![allow(deprecated)]

use tag_bus::*;

// Same-name children under different parents
message_tags! {
    pub mod Tags {
        Combat {
            Attack;
            Idle;
            Damage {
                Fire;
                Ice;
            }
        }
        Movement {
            Attack;
            Idle;
        }
        Status {
            Active {
                Running;
            }
            Passive {
                Running;
            }
        }
        #[redirect = "Combat.Damage.Fire"]
        Burn;
        #[deprecated(note = "use Status.Active")]
        Buffed;
    }
}

#[test]
fn same_name_tags_are_distinct() {
    assert_ne!(Tags::Combat::Attack::TAG, Tags::Movement::Attack::TAG);
    assert_ne!(Tags::Combat::Idle::TAG, Tags::Movement::Idle::TAG);
    assert_ne!(
        Tags::Status::Active::Running::TAG,
        Tags::Status::Passive::Running::TAG
    );
}

#[test]
fn paths_and_depths() {
    assert_eq!(Tags::Combat::Attack::PATH, "Combat.Attack");
    assert_eq!(Tags::Movement::Attack::PATH, "Movement.Attack");
    assert_eq!(Tags::Status::Passive::Running::PATH, "Status.Passive.Running");

    assert_eq!(Tags::Combat::DEPTH, 0);
    assert_eq!(Tags::Combat::Attack::DEPTH, 1);
    assert_eq!(Tags::Status::Active::Running::DEPTH, 2);
    assert_eq!(Tags::Combat::Damage::Fire::TAG.depth(), 2);
}

#[test]
fn tree_shape_constants() {
    assert_eq!(Tags::TREE_DEPTH, 3);
    // Burn is a redirect and has no node of its own.
    assert_eq!(Tags::NODE_COUNT, 15);
    assert_eq!(Tags::DEFINITIONS.len(), Tags::NODE_COUNT);
    assert_eq!(Tags::REDIRECTS, &[RedirectDef::new("Burn", "Combat.Damage.Fire")]);
}

#[test]
fn hierarchy_without_registry() {
    let fire = Tags::Combat::Damage::Fire::TAG;

    assert!(fire.is_descendant_of(Tags::Combat::TAG));
    assert!(fire.is_descendant_of(Tags::Combat::Damage::TAG));
    assert!(!fire.is_descendant_of(Tags::Movement::TAG));
    assert!(!Tags::Movement::Attack::TAG.is_descendant_of(Tags::Combat::TAG));
    assert_eq!(fire.parent(), Some(Tags::Combat::Damage::TAG));
}

#[test]
fn compile_time_ids_match_runtime_interning() {
    let registry = TagRegistry::new();

    assert_eq!(
        registry.intern("Combat.Damage.Fire").unwrap(),
        Tags::Combat::Damage::Fire::TAG
    );
    assert_eq!(
        registry.intern("Movement.Attack").unwrap().id(),
        Tags::Movement::Attack::ID
    );
}

#[test]
fn register_native_definitions() {
    let registry = TagRegistry::new();
    registry.register_native(Tags::DEFINITIONS).unwrap();
    registry.register_redirects(Tags::REDIRECTS).unwrap();

    assert_eq!(registry.len(), Tags::NODE_COUNT);
    assert_eq!(registry.tree_depth(), Tags::TREE_DEPTH);
    assert!(registry.is_native(Tags::Status::Passive::Running::TAG));
    assert_eq!(
        registry.resolve("Combat.Attack"),
        Some(Tags::Combat::Attack::TAG)
    );
    assert_eq!(
        registry.children_of(Tags::Combat::Damage::TAG),
        vec![Tags::Combat::Damage::Fire::TAG, Tags::Combat::Damage::Ice::TAG]
    );
}

#[test]
fn redirect_constants_resolve_to_target() {
    assert_eq!(Tags::Burn::TAG, Tags::Combat::Damage::Fire::TAG);
    assert_eq!(Tags::Burn::PATH, "Burn");
    assert_eq!(Tags::Burn::TARGET, "Combat.Damage.Fire");

    let registry = TagRegistry::new();
    registry.register_native(Tags::DEFINITIONS).unwrap();
    registry.register_redirects(Tags::REDIRECTS).unwrap();
    assert_eq!(registry.resolve("Burn"), Some(Tags::Combat::Damage::Fire::TAG));
    assert_eq!(registry.redirect_target("Burn"), Some(Tags::Burn::TAG));
}

#[test]
fn deprecated_nodes_are_still_declared() {
    assert_eq!(Tags::Buffed::PATH, "Buffed");
    assert!(Tags::DEFINITIONS.iter().any(|d| d.path == "Buffed"));
}

#[test]
fn tags_work_as_container_keys() {
    let container = TagContainer::new()
        .with(Tags::Combat::Damage::Ice::TAG)
        .with(Tags::Movement::Idle::TAG);

    assert!(container.matches(Tags::Combat::TAG, true));
    assert!(!container.matches(Tags::Combat::TAG, false));
    assert!(!container.matches(Tags::Status::TAG, true));
}

#[test]
fn colliding_runtime_siblings_keep_separate_listeners() {
    // W65 and W173 hash onto the same slot under Item.Weapon.
    let registry = std::sync::Arc::new(TagRegistry::new());
    registry.register_native(Tags::DEFINITIONS).unwrap();
    let bus = MessageBus::with_registry(registry.clone());

    let first = registry.intern("Item.Weapon.W65").unwrap();
    let second = registry.intern("Item.Weapon.W173").unwrap();
    assert_ne!(first, second);

    let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let h = hits.clone();
    bus.listen(first, ListenOptions::new(), move |_: &u8| {
        h.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    })
    .unwrap();

    assert_eq!(bus.raise(second, 1u8).delivered(), 0);
    assert_eq!(bus.raise(first, 1u8).delivered(), 1);
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Declared tags still land on their constants.
    assert_eq!(registry.resolve("Combat.Damage.Fire"), Some(Tags::Combat::Damage::Fire::TAG));
}
