use ferrous_cdi::{
    ContainerConfig, ContextsService, CreationalContextFactory, DiError, FactoryBean, Instance, ScopeContext,
    ScopeKind, ScopeParams,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_get_or_create_creates_once() {
    const THREADS: usize = 16;

    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let unit = FactoryBean::new("expensive", ScopeKind::Application, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        Ok(Arc::new(String::from("expensive")))
    })
    .into_unit();

    let context = Arc::new(ScopeContext::new(ScopeKind::Application));
    context.set_active(true);
    let factory = CreationalContextFactory::default();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let context = context.clone();
            let unit = unit.clone();
            let factory = factory.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                context.get_or_create(&unit, factory.creational_context(Some(&unit))).unwrap()
            })
        })
        .collect();

    let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(created.load(Ordering::SeqCst), 1);
    for instance in &instances[1..] {
        assert!(Arc::ptr_eq(&instances[0], instance));
    }
    assert_eq!(context.len(), 1);
}

#[test]
fn test_distinct_contextuals_create_in_parallel() {
    const THREADS: usize = 8;

    let context = Arc::new(ScopeContext::new(ScopeKind::Application));
    context.set_active(true);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let context = context.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                // Every create waits on the barrier; this only completes if the
                // creations are not serialized behind one another.
                let inner = barrier.clone();
                let unit = FactoryBean::new(format!("unit-{i}"), ScopeKind::Application, move |_| {
                    inner.wait();
                    Ok(Arc::new(i))
                })
                .into_unit();
                let factory = CreationalContextFactory::default();
                context.get_or_create(&unit, factory.creational_context(Some(&unit))).unwrap()
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(context.len(), THREADS);
}

#[test]
fn test_instance_created_during_teardown_is_destroyed() {
    let started = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));
    let destroyed = Arc::new(AtomicUsize::new(0));

    let (s, r, counter) = (started.clone(), resume.clone(), destroyed.clone());
    let unit = FactoryBean::new("slow", ScopeKind::Request, move |_| {
        s.wait();
        r.wait();
        Ok(Arc::new(()))
    })
    .on_destroy(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .into_unit();

    let context = Arc::new(ScopeContext::new(ScopeKind::Request));
    context.set_active(true);

    let creator = {
        let context = context.clone();
        let unit = unit.clone();
        thread::spawn(move || {
            let factory = CreationalContextFactory::default();
            context.get_or_create(&unit, factory.creational_context(Some(&unit)))
        })
    };

    // Tear the context down while the creation is still in flight
    started.wait();
    context.destroy_all().unwrap();
    resume.wait();

    let result = creator.join().unwrap();
    assert!(matches!(result, Err(DiError::ContextNotActive { .. })));
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert!(context.is_empty());
    assert!(!context.contains(&unit));
}

#[test]
fn test_application_context_shared_across_threads() {
    const THREADS: usize = 8;

    let contexts = Arc::new(ContextsService::new(ContainerConfig::default()));
    contexts.start_context(ScopeKind::Application, &ScopeParams::default()).unwrap();

    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let unit = FactoryBean::new("config", ScopeKind::Application, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(42u64))
    })
    .into_unit();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let contexts = contexts.clone();
            let unit = unit.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let factory = CreationalContextFactory::new(contexts.config());
                barrier.wait();
                let application = contexts.current_context(ScopeKind::Application).unwrap().unwrap();
                let instance = application.get_or_create(&unit, factory.creational_context(Some(&unit))).unwrap();
                *instance.downcast_ref::<u64>().unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 42);
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);
    contexts.destroy().unwrap();
}

#[test]
fn test_one_creational_context_shared_by_threads() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = destroyed.clone();
    let unit = FactoryBean::new("shared-dependent", ScopeKind::Dependent, |_| Ok(Arc::new(())))
        .on_destroy(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .into_unit();
    let cc = CreationalContextFactory::default().creational_context(None);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cc = cc.clone();
            let unit = unit.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    let instance = unit.create(&cc).unwrap();
                    cc.add_dependent(&unit, Some(instance));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cc.dependent_count(), THREADS * PER_THREAD);
    cc.release().unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), THREADS * PER_THREAD);
}
