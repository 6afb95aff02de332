use ferrous_cdi::{
    ContainerConfig, ContextsService, ContextualUnit, CreationalContextFactory, DiError, FactoryBean, ScopeContext,
    ScopeKind, ScopeObserver, ScopeParams,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ScopeObserver for Recorder {
    fn initialized(&self, kind: ScopeKind, _context: &ScopeContext) {
        self.events.lock().unwrap().push(format!("+{kind}"));
    }

    fn destroyed(&self, kind: ScopeKind, _context: &ScopeContext) {
        self.events.lock().unwrap().push(format!("-{kind}"));
    }
}

fn wizard(log: &Log) -> ContextualUnit {
    let log = log.clone();
    FactoryBean::new("wizard", ScopeKind::Conversation, |_| Ok(Arc::new(Mutex::new(0u32))))
        .on_destroy(move |_, _| {
            log.lock().unwrap().push("wizard".to_string());
            Ok(())
        })
        .into_unit()
}

fn start_request(contexts: &ContextsService, conversation_id: Option<&str>) {
    let params = match conversation_id {
        Some(id) => ScopeParams::with_conversation_id(id),
        None => ScopeParams::default(),
    };
    contexts.start_context(ScopeKind::Conversation, &params).unwrap();
}

fn end_request(contexts: &ContextsService) {
    contexts.end_context(ScopeKind::Conversation, &ScopeParams::default()).unwrap();
}

#[test]
fn test_propagated_transient_conversation_is_nonexistent() {
    let contexts = ContextsService::new(ContainerConfig::default());
    contexts.start_context(ScopeKind::Session, &ScopeParams::default()).unwrap();

    // First request leaves a transient conversation behind in the session
    start_request(&contexts, None);
    contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    let stale = contexts.current_conversation().unwrap();
    assert!(stale.is_transient());
    contexts.detach_context(ScopeKind::Conversation).unwrap();

    start_request(&contexts, Some(stale.id()));
    let fresh_id = match contexts.current_context(ScopeKind::Conversation) {
        Err(DiError::NonexistentConversation {
            propagated_id,
            transient_id,
        }) => {
            assert_eq!(propagated_id, stale.id());
            assert_ne!(transient_id, stale.id());
            transient_id
        }
        other => panic!("expected nonexistent conversation, got {:?}", other),
    };

    let conversation = contexts.current_conversation().unwrap();
    assert_eq!(conversation.id(), fresh_id);
    assert!(conversation.is_transient());
    let context = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    assert!(Arc::ptr_eq(&context, conversation.context()));

    contexts.destroy().unwrap();
}

#[test]
fn test_unknown_conversation_id_is_nonexistent() {
    let contexts = ContextsService::new(ContainerConfig::default());
    contexts.start_context(ScopeKind::Session, &ScopeParams::default()).unwrap();
    start_request(&contexts, Some("no-such-conversation"));

    let err = contexts.current_context(ScopeKind::Conversation).unwrap_err();
    assert!(err.is_conversation_failure());
    assert!(!err.is_fatal());
    contexts.destroy().unwrap();
}

#[test]
fn test_long_running_conversation_survives_requests() {
    let log: Log = Arc::default();
    let contexts = ContextsService::new(ContainerConfig::default());
    let factory = CreationalContextFactory::new(contexts.config());
    let unit = wizard(&log);
    contexts.start_context(ScopeKind::Session, &ScopeParams::default()).unwrap();

    start_request(&contexts, None);
    let first = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    first.get_or_create(&unit, factory.creational_context(Some(&unit))).unwrap();
    let conversation = contexts.current_conversation().unwrap();
    conversation.begin();
    let id = conversation.id().to_string();
    end_request(&contexts);
    assert!(log.lock().unwrap().is_empty());
    assert!(!conversation.is_busy());

    start_request(&contexts, Some(&id));
    let second = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(second.contains(&unit));

    // Demote and finish
    contexts.current_conversation().unwrap().end();
    end_request(&contexts);
    assert_eq!(*log.lock().unwrap(), vec!["wizard"]);
    let session = contexts.current_context(ScopeKind::Session).unwrap().unwrap();
    assert!(session.conversations().get(&id).is_none());

    contexts.destroy().unwrap();
}

#[test]
fn test_transient_conversation_is_destroyed_at_request_end() {
    let log: Log = Arc::default();
    let recorder = Arc::new(Recorder::default());
    let contexts = ContextsService::new(ContainerConfig::default()).with_observer(recorder.clone());
    let factory = CreationalContextFactory::new(contexts.config());
    let unit = wizard(&log);
    contexts.start_context(ScopeKind::Session, &ScopeParams::default()).unwrap();

    start_request(&contexts, None);
    let context = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    context.get_or_create(&unit, factory.creational_context(Some(&unit))).unwrap();
    end_request(&contexts);

    assert_eq!(*log.lock().unwrap(), vec!["wizard"]);
    assert!(!context.is_active());
    let session = contexts.current_context(ScopeKind::Session).unwrap().unwrap();
    assert!(session.conversations().is_empty());

    // Ending again is a no-op
    end_request(&contexts);
    contexts.destroy().unwrap();
    let events = recorder.events.lock().unwrap();
    assert_eq!(events.iter().filter(|e| *e == "-conversation").count(), 1);
}

#[test]
fn test_concurrent_request_finds_conversation_busy() {
    let contexts = Arc::new(ContextsService::new(ContainerConfig::default()));
    contexts.start_context(ScopeKind::Session, &ScopeParams::default()).unwrap();

    start_request(&contexts, None);
    let held = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    let conversation = contexts.current_conversation().unwrap();
    conversation.begin();
    let id = conversation.id().to_string();
    let session = contexts.current_context(ScopeKind::Session).unwrap().unwrap();

    let remote = contexts.clone();
    let remote_session = session.clone();
    let remote_id = id.clone();
    let outcome = thread::spawn(move || {
        remote
            .start_context(ScopeKind::Session, &ScopeParams::with_session(remote_session))
            .unwrap();
        start_request(&remote, Some(&remote_id));
        let result = remote.current_context(ScopeKind::Conversation);
        let fallback = remote.current_context(ScopeKind::Conversation).unwrap().unwrap();
        end_request(&remote);
        remote.detach_context(ScopeKind::Session);
        (result.err(), fallback.id())
    })
    .join()
    .unwrap();

    match outcome.0 {
        Some(DiError::BusyConversation {
            propagated_id,
            transient_id,
        }) => {
            assert_eq!(propagated_id, id);
            assert_ne!(transient_id, id);
        }
        other => panic!("expected busy conversation, got {:?}", other),
    }
    assert_ne!(outcome.1, held.id());

    // Once the holder releases it, another request can resume it
    end_request(&contexts);
    start_request(&contexts, Some(&id));
    let resumed = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    assert!(Arc::ptr_eq(&resumed, &held));

    contexts.destroy().unwrap();
}

#[test]
fn test_session_end_destroys_its_conversations() {
    let log: Log = Arc::default();
    let recorder = Arc::new(Recorder::default());
    let contexts = ContextsService::new(ContainerConfig::default()).with_observer(recorder.clone());
    let factory = CreationalContextFactory::new(contexts.config());
    let unit = wizard(&log);
    contexts.start_context(ScopeKind::Session, &ScopeParams::default()).unwrap();

    start_request(&contexts, None);
    let context = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    context.get_or_create(&unit, factory.creational_context(Some(&unit))).unwrap();
    contexts.current_conversation().unwrap().begin();
    end_request(&contexts);

    contexts.end_context(ScopeKind::Session, &ScopeParams::default()).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["wizard"]);
    assert!(!context.is_active());

    let events = recorder.events.lock().unwrap();
    let destroyed: Vec<&String> = events.iter().filter(|e| e.starts_with('-')).collect();
    assert_eq!(destroyed, vec!["-conversation", "-session"]);
}

#[test]
fn test_idle_conversations_expire() {
    let config = ContainerConfig {
        conversation_timeout_ms: 0,
        ..ContainerConfig::default()
    };
    let contexts = ContextsService::new(config);
    contexts.start_context(ScopeKind::Session, &ScopeParams::default()).unwrap();

    start_request(&contexts, None);
    let context = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    let conversation = contexts.current_conversation().unwrap();
    conversation.begin();
    end_request(&contexts);
    thread::sleep(Duration::from_millis(5));

    assert_eq!(contexts.destroy_expired_conversations().unwrap(), 1);
    assert!(!context.is_active());
    assert!(conversation.is_destroyed());
    assert_eq!(contexts.destroy_expired_conversations().unwrap(), 0);
    contexts.destroy().unwrap();
}

#[test]
fn test_conversation_without_propagated_id_starts_transient() {
    let contexts = ContextsService::new(ContainerConfig::default());
    contexts.start_context(ScopeKind::Session, &ScopeParams::default()).unwrap();
    assert!(contexts.current_context(ScopeKind::Conversation).unwrap().is_none());

    start_request(&contexts, None);
    let context = contexts.current_context(ScopeKind::Conversation).unwrap().unwrap();
    assert_eq!(context.kind(), ScopeKind::Conversation);
    assert!(contexts.current_conversation().unwrap().is_transient());
    contexts.destroy().unwrap();
}
