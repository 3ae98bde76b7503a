//! Asynchronous action delivery
//!
//! Every registered node gets a mailbox: an unbounded crossbeam channel
//! drained by a dedicated delivery thread. Actions to one destination are
//! handled one at a time, in the order they were sent, so ordering along a
//! single edge is preserved. Senders never wait for the handler.
//!
//! `stop()` closes all mailboxes, lets every delivery thread drain what is
//! already queued, and joins them. Handler invocations are tracked by the
//! watchdog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use super::action::{Action, Endpoint, Envelope};
use super::block_id::BlockId;
use super::errors::ActionError;
use super::node::Node;
use super::watchdog::{OperationGuard, Watchdog};

struct RouterInner {
    mailboxes: RwLock<HashMap<String, Sender<Envelope>>>,
    threads: Mutex<Vec<(String, JoinHandle<()>)>>,
    stopped: AtomicBool,
    watchdog: Watchdog,
    watchdog_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        self.watchdog.stop();
    }
}

/// Routes actions to per-node mailboxes. Cheap to clone.
#[derive(Clone)]
pub struct ActionRouter {
    inner: Arc<RouterInner>,
}

impl ActionRouter {
    /// Create a router whose watchdog reports handlers running longer than
    /// `threshold`. The watchdog thread starts with the first mailbox.
    pub fn new(threshold: Duration) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                mailboxes: RwLock::new(HashMap::new()),
                threads: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
                watchdog: Watchdog::new(threshold),
                watchdog_thread: Mutex::new(None),
            }),
        }
    }

    fn ensure_watchdog(&self) {
        let mut slot = self.inner.watchdog_thread.lock();
        if slot.is_some() {
            return;
        }
        match self.inner.watchdog.start_monitoring_thread() {
            Ok(handle) => *slot = Some(handle),
            Err(e) => warn!("Failed to start action watchdog: {}", e),
        }
    }

    /// Open a mailbox for `node` and start its delivery thread.
    ///
    /// The thread only holds a weak reference; it exits when the mailbox is
    /// closed or the node is gone.
    pub fn register(&self, node: &Arc<dyn Node>) -> Result<(), ActionError> {
        if self.is_stopped() {
            return Err(ActionError::RouterStopped);
        }
        self.ensure_watchdog();
        let name = node.unique_id();
        let (tx, rx) = unbounded::<Envelope>();
        let target = Arc::downgrade(node);
        let handle = self.inner.watchdog.register(&name, "handling action");
        let thread_name = name.clone();

        let join = thread::Builder::new()
            .name(format!("action-{}", name))
            .spawn(move || {
                let mut delivered = 0usize;
                for envelope in rx.iter() {
                    let Some(node) = target.upgrade() else {
                        debug!("[{}] Node is gone, dropping remaining actions", thread_name);
                        break;
                    };
                    trace!(
                        "[{}] Delivering {} on port {} from {:?}",
                        thread_name, envelope.action, envelope.port, envelope.source
                    );
                    let _guard = OperationGuard::new(&handle, &envelope.action.key);
                    node.dispatch_action(envelope.port, envelope.action);
                    delivered += 1;
                }
                debug!(
                    "[{}] Mailbox closed after {} actions",
                    thread_name, delivered
                );
            })
            .map_err(|e| ActionError::Spawn(format!("{}: {}", name, e)))?;

        if let Some(old) = self.inner.mailboxes.write().insert(name.clone(), tx) {
            warn!("[{}] Replaced existing mailbox", name);
            drop(old);
        }
        self.inner.threads.lock().push((name, join));
        Ok(())
    }

    /// Queue an action for a block port, with no source endpoint
    pub fn send(&self, dst: &BlockId, port: usize, action: Action) -> Result<(), ActionError> {
        self.send_from(None, &dst.to_string(), port, action)
    }

    pub(crate) fn send_from(
        &self,
        source: Option<Endpoint>,
        dst: &str,
        port: usize,
        action: Action,
    ) -> Result<(), ActionError> {
        if self.is_stopped() {
            return Err(ActionError::RouterStopped);
        }
        let mailbox = self
            .inner
            .mailboxes
            .read()
            .get(dst)
            .cloned()
            .ok_or_else(|| ActionError::UnknownDestination(dst.to_string()))?;
        trace!("Queued {} for {}:{}", action, dst, port);
        mailbox
            .send(Envelope {
                source,
                port,
                action,
            })
            .map_err(|_| ActionError::RouterStopped)
    }

    pub fn watchdog_threshold(&self) -> Duration {
        self.inner.watchdog.threshold()
    }

    pub fn set_watchdog_threshold(&self, threshold: Duration) {
        self.inner.watchdog.set_threshold(threshold);
    }

    /// Whether the watchdog thread is running
    pub fn is_monitoring(&self) -> bool {
        self.inner.watchdog_thread.lock().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn num_mailboxes(&self) -> usize {
        self.inner.mailboxes.read().len()
    }

    /// Stop accepting actions, deliver everything already queued and join
    /// the delivery threads. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the senders closes the channels once they are drained
        let mailboxes = std::mem::take(&mut *self.inner.mailboxes.write());
        drop(mailboxes);

        let threads = std::mem::take(&mut *self.inner.threads.lock());
        let total = threads.len();
        let me = thread::current().id();
        info!("Draining {} action mailboxes...", total);
        for (name, handle) in threads {
            // A handler may stop the router from its own delivery thread
            if handle.thread().id() == me {
                continue;
            }
            if let Err(e) = handle.join() {
                error!("[{}] Delivery thread panicked: {:?}", name, e);
            }
        }

        self.inner.watchdog.stop();
        if let Some(handle) = self.inner.watchdog_thread.lock().take() {
            let _ = handle.join();
        }
        info!("Action router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::resolver::PropertyStore;

    struct Recorder {
        name: String,
        store: PropertyStore,
        seen: Mutex<Vec<(usize, u64)>>,
        delay: Duration,
    }

    impl Recorder {
        fn new(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                store: PropertyStore::new(name),
                seen: Mutex::new(Vec::new()),
                delay,
            })
        }
    }

    impl Node for Recorder {
        fn unique_id(&self) -> String {
            self.name.clone()
        }

        fn num_input_ports(&self) -> usize {
            1
        }

        fn num_output_ports(&self) -> usize {
            1
        }

        fn properties(&self) -> &PropertyStore {
            &self.store
        }

        fn dispatch_action(&self, port: usize, action: Action) {
            thread::sleep(self.delay);
            self.seen.lock().push((port, action.id));
        }
    }

    fn register(router: &ActionRouter, node: &Arc<Recorder>) {
        let node: Arc<dyn Node> = node.clone();
        router.register(&node).unwrap();
    }

    #[test]
    fn test_actions_arrive_in_send_order() {
        let router = ActionRouter::new(Duration::from_secs(5));
        let sink = Recorder::new("0/Sink#0", Duration::ZERO);
        register(&router, &sink);
        let dst: BlockId = "0/Sink#0".parse().unwrap();

        let ids: Vec<u64> = (0..50)
            .map(|_| {
                let action = Action::new("tick");
                let id = action.id;
                router.send(&dst, 0, action).unwrap();
                id
            })
            .collect();
        router.stop();

        let seen: Vec<u64> = sink.seen.lock().iter().map(|(_, id)| *id).collect();
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_stop_drains_pending_actions() {
        let router = ActionRouter::new(Duration::from_secs(5));
        let slow = Recorder::new("0/Slow#0", Duration::from_millis(20));
        register(&router, &slow);
        let dst: BlockId = "0/Slow#0".parse().unwrap();
        for port in 0..5 {
            router.send(&dst, port, Action::new("work")).unwrap();
        }

        router.stop();
        let ports: Vec<usize> = slow.seen.lock().iter().map(|(port, _)| *port).collect();
        assert_eq!(ports, vec![0, 1, 2, 3, 4]);
        assert_eq!(
            router.send(&dst, 0, Action::new("late")),
            Err(ActionError::RouterStopped)
        );
    }

    #[test]
    fn test_unknown_destination() {
        let router = ActionRouter::new(Duration::from_secs(5));
        let dst: BlockId = "0/Missing#0".parse().unwrap();
        assert_eq!(
            router.send(&dst, 0, Action::new("x")),
            Err(ActionError::UnknownDestination("0/Missing#0".to_string()))
        );
        router.stop();
    }

    #[test]
    fn test_watchdog_starts_with_first_mailbox() {
        let router = ActionRouter::new(Duration::from_secs(5));
        assert!(!router.is_monitoring());
        router.set_watchdog_threshold(Duration::from_millis(250));
        assert_eq!(router.watchdog_threshold(), Duration::from_millis(250));

        register(&router, &Recorder::new("0/Sink#0", Duration::ZERO));
        assert!(router.is_monitoring());
        router.stop();
        assert!(!router.is_monitoring());
    }

    #[test]
    fn test_register_after_stop_rejected() {
        let router = ActionRouter::new(Duration::from_secs(5));
        router.stop();
        router.stop();
        let node: Arc<dyn Node> = Recorder::new("0/Late#0", Duration::ZERO);
        assert!(matches!(router.register(&node), Err(ActionError::RouterStopped)));
        assert_eq!(router.num_mailboxes(), 0);
    }
}
