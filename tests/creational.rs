use ferrous_cdi::{
    Bean, ContainerConfig, Contextual, ContextualId, ContextualUnit, Creational, CreationalContext,
    CreationalContextFactory, DiError, DiResult, FactoryBean, InjectionPoint, Instance, ScopeKind,
};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ===== Helpers =====

type Log = Arc<Mutex<Vec<String>>>;

fn logging_unit(name: &'static str, log: &Log) -> ContextualUnit {
    let log = log.clone();
    FactoryBean::new(name, ScopeKind::Dependent, move |_| Ok(Arc::new(name.to_string())))
        .on_destroy(move |_, _| {
            log.lock().unwrap().push(name.to_string());
            Ok(())
        })
        .into_unit()
}

fn register(cc: &CreationalContext, unit: &ContextualUnit) -> Instance {
    let instance = unit.create(cc).unwrap();
    cc.add_dependent(unit, Some(instance.clone()));
    instance
}

fn factory() -> CreationalContextFactory {
    CreationalContextFactory::new(&ContainerConfig::default())
}

// ===== Release =====

#[test]
fn test_second_release_does_not_destroy_again() {
    let log: Log = Arc::default();
    let a = logging_unit("a", &log);
    let b = logging_unit("b", &log);

    let cc = factory().creational_context(None);
    register(&cc, &a);
    register(&cc, &b);

    cc.release().unwrap();
    cc.release().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    assert_eq!(cc.dependent_count(), 0);
}

#[test]
fn test_own_bean_is_destroyed_first() {
    let log: Log = Arc::default();
    let first = logging_unit("first", &log);
    let second = logging_unit("second", &log);
    let me = logging_unit("me", &log);

    let cc = factory().creational_context(Some(&me));
    register(&cc, &first);
    register(&cc, &second);
    register(&cc, &me);

    cc.release().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["me", "first", "second"]);
}

#[test]
fn test_dependents_registered_during_teardown_are_destroyed() {
    let log: Log = Arc::default();
    let late = logging_unit("late", &log);

    let chain_log = log.clone();
    let chained = FactoryBean::new("chained", ScopeKind::Dependent, |_| Ok(Arc::new(())))
        .on_destroy(move |_, cc| {
            chain_log.lock().unwrap().push("chained".to_string());
            let instance = late.create(cc)?;
            cc.add_dependent(&late, Some(instance));
            Ok(())
        })
        .into_unit();
    let plain = logging_unit("plain", &log);

    let cc = factory().creational_context(None);
    register(&cc, &chained);
    register(&cc, &plain);

    cc.release().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["chained", "plain", "late"]);
    assert_eq!(cc.dependent_count(), 0);
}

#[test]
fn test_endless_reregistration_trips_circuit_breaker() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let slot: Arc<OnceCell<ContextualUnit>> = Arc::new(OnceCell::new());

    let counter = attempts.clone();
    let me = slot.clone();
    let hydra = FactoryBean::new("hydra", ScopeKind::Dependent, |_| Ok(Arc::new(())))
        .on_destroy(move |_, cc| {
            counter.fetch_add(1, Ordering::SeqCst);
            let unit = me.get().cloned().ok_or_else(|| DiError::destruction("hydra", "unset"))?;
            cc.add_dependent(&unit, Some(Arc::new(())));
            Ok(())
        })
        .into_unit();
    slot.set(hydra.clone()).unwrap();

    let cc = factory().creational_context(None);
    register(&cc, &hydra);
    register(&cc, &hydra);
    assert_eq!(cc.dependent_count(), 2);

    match cc.release() {
        Err(DiError::TeardownLoop { limit, .. }) => assert_eq!(limit, 6),
        other => panic!("expected teardown loop, got {:?}", other),
    }
    assert!(attempts.load(Ordering::SeqCst) <= 6);
    assert!(DiError::TeardownLoop { bean: "x".into(), limit: 1 }.is_fatal());
}

#[test]
fn test_teardown_factor_comes_from_config() {
    let config = ContainerConfig {
        teardown_factor: 1,
        ..ContainerConfig::default()
    };
    let factory = CreationalContextFactory::new(&config);
    assert_eq!(factory.teardown_factor(), 1);
    assert_eq!(factory.creational_context(None).teardown_factor(), 1);
}

#[test]
fn test_destroy_failures_are_collected() {
    let log: Log = Arc::default();
    let broken = FactoryBean::new("broken", ScopeKind::Dependent, |_| Ok(Arc::new(())))
        .on_destroy(|_, _| Err(DiError::destruction("broken", "disk on fire")))
        .into_unit();
    let fine = logging_unit("fine", &log);

    let cc = factory().creational_context(None);
    register(&cc, &broken);
    register(&cc, &fine);

    match cc.release() {
        Err(DiError::Teardown { failures, .. }) => {
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0], DiError::Destruction { .. }));
        }
        other => panic!("expected teardown failure, got {:?}", other),
    }
    assert_eq!(*log.lock().unwrap(), vec!["fine"]);
}

// ===== Lookup =====

#[test]
fn test_contains_dependent_tracks_registration_and_destruction() {
    let log: Log = Arc::default();
    let x = logging_unit("x", &log);

    let cc = factory().creational_context(None);
    let other: Instance = Arc::new("other".to_string());
    assert!(!cc.contains_dependent(&x, &other));

    let instance = register(&cc, &x);
    assert!(cc.contains_dependent(&x, &instance));
    assert!(!cc.contains_dependent(&x, &other));

    // Equal value, different object
    let twin: Instance = Arc::new("x".to_string());
    assert!(!cc.contains_dependent(&x, &twin));

    assert!(cc.destroy_dependent(&instance).unwrap());
    assert!(!cc.contains_dependent(&x, &instance));
    assert!(!cc.destroy_dependent(&instance).unwrap());
    assert_eq!(*log.lock().unwrap(), vec!["x"]);
}

#[test]
fn test_contextual_equality_is_logical() {
    let log: Log = Arc::default();
    let original = logging_unit("same", &log);
    let twin = logging_unit("same", &log);

    let cc = factory().creational_context(None);
    let instance = register(&cc, &original);
    assert!(cc.contains_dependent(&twin, &instance));
}

#[test]
fn test_null_instance_is_ignored() {
    let log: Log = Arc::default();
    let x = logging_unit("x", &log);
    let cc = factory().creational_context(None);
    cc.add_dependent(&x, None);
    assert_eq!(cc.dependent_count(), 0);
    cc.release().unwrap();
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_duplicate_registration_is_ignored() {
    let log: Log = Arc::default();
    let x = logging_unit("x", &log);
    let cc = factory().creational_context(None);
    let instance = register(&cc, &x);
    cc.add_dependent(&x, Some(instance));
    assert_eq!(cc.dependent_count(), 1);
}

// ===== Ambient state =====

#[test]
fn test_injection_points_and_event_metadata_stack_independently() {
    let cc = factory().creational_context(None);
    assert!(cc.injection_point().is_none());

    cc.put_injection_point(InjectionPoint::new("outer"));
    cc.put_injection_point(InjectionPoint::new("inner"));
    cc.put_event_metadata(ferrous_cdi::EventMetadata::new("OrderPlaced"));

    assert_eq!(cc.injection_point().unwrap().member, "inner");
    assert_eq!(cc.remove_injection_point().unwrap().member, "inner");
    assert_eq!(cc.injection_point().unwrap().member, "outer");
    assert_eq!(cc.event_metadata().unwrap().event_type, "OrderPlaced");
    assert_eq!(cc.remove_injection_point().unwrap().member, "outer");
    assert!(cc.remove_injection_point().is_none());
    assert!(cc.remove_event_metadata().is_some());
}

#[test]
fn test_delegate_and_contextual_swaps_return_previous() {
    let log: Log = Arc::default();
    let original = logging_unit("original", &log);
    let decorator = logging_unit("decorator", &log);
    let cc = factory().creational_context(Some(&original));

    let delegate: Instance = Arc::new(1u8);
    assert!(cc.put_delegate(Some(delegate.clone())).is_none());
    let previous = cc.put_delegate(None).unwrap();
    assert!(ferrous_cdi::same_instance(&previous, &delegate));

    let previous = cc.put_contextual(Some(decorator.clone())).unwrap();
    assert!(previous.is_same(&original));
    assert!(cc.contextual().unwrap().is_same(&decorator));
    let restored = cc.put_contextual(Some(previous)).unwrap();
    assert!(restored.is_same(&decorator));
    assert!(cc.bean().is_some());
}

// ===== Wrapping =====

struct ForeignContext {
    released: AtomicUsize,
    pushed: Mutex<Option<Instance>>,
}

impl Creational for ForeignContext {
    fn push(&self, incomplete: Instance) {
        *self.pushed.lock().unwrap() = Some(incomplete);
    }

    fn release(&self) -> DiResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Decorator {
    id: ContextualId,
}

impl Contextual for Decorator {
    fn id(&self) -> &ContextualId {
        &self.id
    }

    fn create(&self, _cc: &CreationalContext) -> DiResult<Instance> {
        Ok(Arc::new("decorated"))
    }

    fn destroy(&self, _instance: Instance, _cc: &CreationalContext) -> DiResult<()> {
        Ok(())
    }
}

#[test]
fn test_wrapped_context_defers_to_foreign_context() {
    let foreign = Arc::new(ForeignContext {
        released: AtomicUsize::new(0),
        pushed: Mutex::new(None),
    });
    let decorator = ContextualUnit::decorator(Decorator {
        id: ContextualId::new("decorator"),
    });

    let cc = factory().wrapped_creational_context(foreign.clone(), &decorator);
    assert!(cc.is_wrapped());
    assert!(cc.contextual().unwrap().is_same(&decorator));
    assert!(cc.bean().is_none());

    let incomplete: Instance = Arc::new(5u32);
    cc.push(incomplete.clone());
    assert!(ferrous_cdi::same_instance(&cc.incomplete_instance().unwrap(), &incomplete));
    assert!(foreign.pushed.lock().unwrap().is_some());

    cc.release().unwrap();
    assert_eq!(foreign.released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wrapping_a_rich_context_keeps_its_identity() {
    let log: Log = Arc::default();
    let unit = logging_unit("unit", &log);
    let factory = factory();
    let cc = factory.creational_context(Some(&unit));

    let wrapped = factory.wrapped_creational_context(Arc::new(cc.clone()), &unit);
    assert!(wrapped.same_episode(&cc));
    assert!(!wrapped.is_wrapped());
}

#[test]
fn test_bean_trait_defaults() {
    let unit = FactoryBean::new("b", ScopeKind::Session, |_| Ok(Arc::new(()))).into_unit();
    let bean = unit.as_bean().unwrap();
    assert_eq!(bean.scope(), ScopeKind::Session);
    assert!(!bean.is_passivation_capable());
}
