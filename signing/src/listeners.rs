use crate::{Listener, Outcome};
use llmq_types::RecoveredSignature;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

/// Handle returned by [Listeners::register], used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Ordered registry of [Listener]s.
///
/// The registry has its own lock, independent of the engine. Notification iterates over a
/// snapshot, so a listener may (un)register listeners from within its callback.
#[derive(Clone, Default)]
pub struct Listeners {
    next: Arc<AtomicU64>,
    registered: Arc<Mutex<Vec<(ListenerId, Arc<dyn Listener>)>>>,
}

impl Listeners {
    pub fn register(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.registered.lock().unwrap().push((id, listener));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut registered = self.registered.lock().unwrap();
        let Some(position) = registered.iter().position(|(other, _)| *other == id) else {
            return false;
        };
        registered.remove(position);
        true
    }

    pub fn len(&self) -> usize {
        self.registered.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener in registration order.
    pub(crate) fn notify(&self, signature: &RecoveredSignature) -> Vec<Outcome> {
        let snapshot: Vec<_> = self
            .registered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        snapshot
            .iter()
            .map(|listener| listener.on_recovered_signature(signature))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use llmq_types::QuorumType;
    use llmq_utils::hash;
    use std::sync::OnceLock;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Listener for Recorder {
        fn on_recovered_signature(&self, _: &RecoveredSignature) -> Outcome {
            self.log.lock().unwrap().push(self.name);
            Outcome::Accepted
        }
    }

    /// Unregisters itself (and another listener) on first notification.
    struct Unregistering {
        listeners: Listeners,
        ids: Arc<OnceLock<(ListenerId, ListenerId)>>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Listener for Unregistering {
        fn on_recovered_signature(&self, _: &RecoveredSignature) -> Outcome {
            self.log.lock().unwrap().push("unregistering");
            if let Some((own, other)) = self.ids.get() {
                self.listeners.unregister(*own);
                self.listeners.unregister(*other);
            }
            Outcome::Ignored
        }
    }

    fn signature() -> RecoveredSignature {
        RecoveredSignature {
            quorum_type: QuorumType::Test,
            quorum_hash: hash(b"quorum"),
            id: hash(b"id"),
            msg_hash: hash(b"msg"),
            signature: Bytes::from_static(b"sig"),
        }
    }

    #[test]
    fn test_registration_order() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            listeners.register(Arc::new(Recorder {
                name,
                log: log.clone(),
            }));
        }
        let outcomes = listeners.notify(&signature());
        assert_eq!(outcomes, vec![Outcome::Accepted; 3]);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unregister() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = listeners.register(Arc::new(Recorder {
            name: "a",
            log: log.clone(),
        }));
        listeners.register(Arc::new(Recorder {
            name: "b",
            log: log.clone(),
        }));
        assert!(listeners.unregister(a));
        assert!(!listeners.unregister(a));
        listeners.notify(&signature());
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_unregister_from_callback() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let ids = Arc::new(OnceLock::new());
        let own = listeners.register(Arc::new(Unregistering {
            listeners: listeners.clone(),
            ids: ids.clone(),
            log: log.clone(),
        }));
        let other = listeners.register(Arc::new(Recorder {
            name: "other",
            log: log.clone(),
        }));
        ids.set((own, other)).unwrap();

        // The snapshot taken before the callback still includes the second listener
        listeners.notify(&signature());
        assert_eq!(*log.lock().unwrap(), vec!["unregistering", "other"]);
        assert!(listeners.is_empty());

        // Nothing is notified afterwards
        listeners.notify(&signature());
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
