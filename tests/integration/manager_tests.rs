//! Connection manager integration tests
//!
//! Driven by `ManualLoop`, so every loop turn and timer firing is explicit.

use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use connmgr::connection::{
    ConnRef, ConnectionId, ConnectionManager, ConnectionManagerCallback, ConnectionManagerConfig,
    DrainPhase, ManagedConnection, ManagerId, ManagerSlot, DRAIN_BATCH_SIZE,
};
use connmgr::event_loop::ManualLoop;
use connmgr::metrics::METRICS;

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection double that records every call the manager makes
struct TestConn {
    id: ConnectionId,
    manager: ManagerSlot,
    busy: AtomicBool,
    notified: AtomicUsize,
    close_requests: AtomicUsize,
    dropped: AtomicUsize,
    timeouts: AtomicUsize,
    cancels: AtomicUsize,
    dumps: AtomicUsize,
    leave_on_notify: AtomicBool,
    leave_on_close: AtomicBool,
    leave_on_cancel: AtomicBool,
    victim: Mutex<Option<ConnRef>>,
}

impl TestConn {
    fn new() -> Arc<Self> {
        Self::with_id(ConnectionId::next())
    }

    fn with_id(id: ConnectionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            manager: ManagerSlot::new(),
            busy: AtomicBool::new(false),
            notified: AtomicUsize::new(0),
            close_requests: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            dumps: AtomicUsize::new(0),
            leave_on_notify: AtomicBool::new(false),
            leave_on_close: AtomicBool::new(false),
            leave_on_cancel: AtomicBool::new(false),
            victim: Mutex::new(None),
        })
    }

    fn busy() -> Arc<Self> {
        let conn = Self::new();
        conn.busy.store(true, Ordering::SeqCst);
        conn
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn leave(conn: &dyn ManagedConnection) {
        if let Some(manager) = conn.manager().and_then(ConnectionManager::lookup) {
            manager.remove_connection(conn);
        }
    }
}

impl ManagedConnection for TestConn {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn timeout_expired(&self) {
        self.timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_timeout(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.leave_on_cancel.load(Ordering::SeqCst) {
            Self::leave(self);
        }
    }

    fn notify_pending_shutdown(&self) {
        self.notified.fetch_add(1, Ordering::SeqCst);
        if self.leave_on_notify.load(Ordering::SeqCst) {
            Self::leave(self);
        }
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn close_when_idle(&self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(victim) = self.victim.lock().take() {
            Self::leave(victim.as_ref());
        }
        if self.leave_on_close.load(Ordering::SeqCst) {
            Self::leave(self);
        }
    }

    fn drop_connection(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    fn dump_connection_state(&self, _verbosity: u8) {
        self.dumps.fetch_add(1, Ordering::SeqCst);
    }

    fn manager(&self) -> Option<ManagerId> {
        self.manager.get()
    }

    fn set_manager(&self, manager: Option<ManagerId>) {
        self.manager.set(manager)
    }
}

#[derive(Default)]
struct Recorder {
    added: Cell<usize>,
    removed: Cell<usize>,
    empty: Cell<usize>,
    /// Dropped from `on_empty`, releasing the manager it points to
    release_on_empty: RefCell<Option<Rc<ConnectionManager>>>,
}

impl ConnectionManagerCallback for Recorder {
    fn on_connection_added(&self, _manager: &ConnectionManager) {
        self.added.set(self.added.get() + 1);
    }

    fn on_connection_removed(&self, _manager: &ConnectionManager) {
        self.removed.set(self.removed.get() + 1);
    }

    fn on_empty(&self, _manager: &ConnectionManager) {
        self.empty.set(self.empty.get() + 1);
        self.release_on_empty.borrow_mut().take();
    }
}

fn setup() -> (Rc<ManualLoop>, Rc<Recorder>, Rc<ConnectionManager>) {
    let ev = Rc::new(ManualLoop::new());
    let recorder = Rc::new(Recorder::default());
    let callback: Rc<dyn ConnectionManagerCallback> = recorder.clone();
    let manager = ConnectionManager::new(
        ev.clone(),
        ConnectionManagerConfig {
            idle_timeout: IDLE_TIMEOUT,
        },
        Some(callback),
    );
    (ev, recorder, manager)
}

fn populate(manager: &ConnectionManager, count: usize) -> Vec<Arc<TestConn>> {
    (0..count)
        .map(|_| {
            let conn = TestConn::new();
            manager.add_connection(conn.clone(), true);
            conn
        })
        .collect()
}

fn total(conns: &[Arc<TestConn>], counter: impl Fn(&TestConn) -> &AtomicUsize) -> usize {
    conns.iter().map(|c| TestConn::count(counter(c))).sum()
}

#[test]
fn test_drop_all_on_empty_manager() {
    let (_ev, recorder, manager) = setup();

    manager.drop_all_connections();

    assert!(manager.is_empty());
    assert_eq!(recorder.empty.get(), 0);
    assert_eq!(recorder.removed.get(), 0);
}

#[test]
fn test_close_idle_runs_in_batches() {
    let (ev, _recorder, manager) = setup();
    let conns: Vec<Arc<TestConn>> = (0..100)
        .map(|i| {
            let conn = if i % 4 == 0 { TestConn::busy() } else { TestConn::new() };
            manager.add_connection(conn.clone(), true);
            conn
        })
        .collect();

    manager.initiate_graceful_shutdown(Duration::ZERO);

    assert_eq!(manager.phase(), DrainPhase::CloseIdle);
    for conn in &conns[..DRAIN_BATCH_SIZE] {
        assert_eq!(TestConn::count(&conn.close_requests), 1);
    }
    for conn in &conns[DRAIN_BATCH_SIZE..] {
        assert_eq!(TestConn::count(&conn.close_requests), 0);
    }
    assert_eq!(manager.drain_cursor(), Some(conns[DRAIN_BATCH_SIZE].id()));
    assert_eq!(ev.pending_turn_tasks(), 1);

    let outcome = manager.drain_batch();
    assert_eq!(outcome.visited, 36);
    assert_eq!(outcome.busy_kept, 9);
    assert_eq!(outcome.idle_closed, 27);
    assert!(outcome.finished);

    assert_eq!(total(&conns, |c| &c.close_requests), 100);
    assert_eq!(manager.drain_cursor(), None);
    assert_eq!(ev.pending_turn_tasks(), 0);
    assert_eq!(total(&conns, |c| &c.notified), 0);
}

#[test]
fn test_batches_continue_on_later_turns() {
    let (ev, _recorder, manager) = setup();
    let conns = populate(&manager, 200);

    manager.initiate_graceful_shutdown(Duration::ZERO);
    assert_eq!(total(&conns, |c| &c.close_requests), 64);

    ev.run_turn();
    assert_eq!(total(&conns, |c| &c.close_requests), 128);

    ev.run_turn();
    assert_eq!(total(&conns, |c| &c.close_requests), 192);

    ev.run_turn();
    assert_eq!(total(&conns, |c| &c.close_requests), 200);
    assert_eq!(ev.pending_turn_tasks(), 0);
    assert_eq!(ev.run_turn(), 0);

    // Connections only asked to close stay members until they go away
    assert_eq!(manager.connection_count(), 200);
}

#[test]
fn test_add_twice_refreshes_timeout_only() {
    let (ev, recorder, manager) = setup();
    let conn = TestConn::new();

    manager.add_connection(conn.clone(), true);
    ev.advance(Duration::from_secs(10));
    manager.add_connection(conn.clone(), true);

    assert_eq!(manager.connection_count(), 1);
    assert_eq!(recorder.added.get(), 1);
    assert_eq!(ev.idle_schedules(), 2);
    assert_eq!(ev.idle_deadline(conn.id()), Some(Duration::from_secs(40)));
}

#[test]
fn test_add_without_timeout() {
    let (ev, _recorder, manager) = setup();
    let conn = TestConn::new();

    manager.add_connection(conn.clone(), false);

    assert!(manager.contains(conn.id()));
    assert_eq!(conn.manager(), Some(manager.id()));
    assert_eq!(ev.idle_schedules(), 0);
    assert_eq!(ev.idle_deadline(conn.id()), None);
}

#[test]
fn test_remove_unowned_is_noop() {
    let (_ev, recorder, manager) = setup();
    let (_other_ev, _other_recorder, other) = setup();
    let member = populate(&manager, 1);

    let stray = TestConn::new();
    manager.remove_connection(stray.as_ref());

    let foreign = populate(&other, 1);
    manager.remove_connection(foreign[0].as_ref());

    assert_eq!(manager.connection_count(), 1);
    assert!(manager.contains(member[0].id()));
    assert_eq!(other.connection_count(), 1);
    assert_eq!(foreign[0].manager(), Some(other.id()));
    assert_eq!(recorder.removed.get(), 0);
    assert_eq!(recorder.empty.get(), 0);
    assert_eq!(TestConn::count(&stray.cancels), 0);
}

#[test]
fn test_remove_clears_back_reference_and_timeout() {
    let (ev, recorder, manager) = setup();
    let conns = populate(&manager, 2);

    manager.remove_connection(conns[0].as_ref());

    assert_eq!(conns[0].manager(), None);
    assert_eq!(TestConn::count(&conns[0].cancels), 1);
    assert_eq!(ev.idle_deadline(conns[0].id()), None);
    assert_eq!(recorder.removed.get(), 1);
    assert_eq!(recorder.empty.get(), 0);

    manager.remove_connection(conns[0].as_ref());
    assert_eq!(recorder.removed.get(), 1);

    manager.remove_connection(conns[1].as_ref());
    assert_eq!(recorder.removed.get(), 2);
    assert_eq!(recorder.empty.get(), 1);
    assert!(manager.is_empty());
}

#[test]
fn test_drop_all_closes_everything() {
    let (ev, recorder, manager) = setup();
    let conns = vec![
        TestConn::busy(),
        TestConn::new(),
        TestConn::busy(),
        TestConn::new(),
        TestConn::new(),
    ];
    for conn in &conns {
        manager.add_connection(conn.clone(), true);
    }

    manager.drop_all_connections();

    assert!(manager.is_empty());
    for conn in &conns {
        assert_eq!(TestConn::count(&conn.dropped), 1);
        assert_eq!(conn.manager(), None);
    }
    let dumps: Vec<usize> = conns.iter().map(|c| TestConn::count(&c.dumps)).collect();
    assert_eq!(dumps, vec![1, 1, 0, 0, 0]);
    assert_eq!(recorder.empty.get(), 1);
    assert_eq!(recorder.removed.get(), 0);
    assert_eq!(ev.armed_idle_timeouts(), 0);
}

#[test]
fn test_drop_all_cancels_pending_drain() {
    let (ev, recorder, manager) = setup();
    let conns = populate(&manager, 100);

    manager.initiate_graceful_shutdown(Duration::from_secs(5));
    assert_eq!(ev.pending_turn_tasks(), 1);
    assert_eq!(ev.pending_timers(), 1);

    manager.drop_all_connections();

    assert_eq!(ev.pending_turn_tasks(), 0);
    assert_eq!(ev.pending_timers(), 0);
    assert_eq!(total(&conns, |c| &c.dropped), 100);
    assert_eq!(recorder.empty.get(), 1);

    ev.advance(Duration::from_secs(10));
    assert_eq!(total(&conns, |c| &c.close_requests), 0);
}

#[test]
fn test_idle_timeout_fires_and_reschedules() {
    let (ev, _recorder, manager) = setup();
    let conns = populate(&manager, 2);
    let (quiet, active) = (&conns[0], &conns[1]);
    let active_ref: ConnRef = active.clone();

    ev.advance(Duration::from_secs(20));
    manager.schedule_timeout(&active_ref);

    ev.advance(Duration::from_secs(10));
    assert_eq!(TestConn::count(&quiet.timeouts), 1);
    assert_eq!(TestConn::count(&active.timeouts), 0);

    ev.advance(Duration::from_secs(20));
    assert_eq!(TestConn::count(&active.timeouts), 1);

    // Expiry is reported to the connection; membership is its business
    assert_eq!(manager.connection_count(), 2);
    assert_eq!(manager.default_timeout(), IDLE_TIMEOUT);
}

#[test]
fn test_transfer_between_managers() {
    let (ev_a, recorder_a, manager_a) = setup();
    let (ev_b, recorder_b, manager_b) = setup();
    let conn = TestConn::new();

    manager_a.add_connection(conn.clone(), true);
    assert_eq!(ev_a.armed_idle_timeouts(), 1);

    manager_b.add_connection(conn.clone(), true);

    assert!(manager_a.is_empty());
    assert_eq!(manager_b.connection_count(), 1);
    assert_eq!(conn.manager(), Some(manager_b.id()));
    assert_eq!(ev_a.armed_idle_timeouts(), 0);
    assert_eq!(ev_b.armed_idle_timeouts(), 1);
    assert_eq!(TestConn::count(&conn.cancels), 1);
    assert_eq!(recorder_a.removed.get(), 1);
    assert_eq!(recorder_a.empty.get(), 1);
    assert_eq!(recorder_b.added.get(), 1);
}

#[test]
fn test_duplicate_id_is_not_added() {
    let (ev, recorder, manager) = setup();
    let id = ConnectionId::from_raw(u64::MAX - 1);
    let first = TestConn::with_id(id);
    let second = TestConn::with_id(id);

    manager.add_connection(first.clone(), true);
    manager.add_connection(second.clone(), true);

    assert_eq!(manager.connection_count(), 1);
    assert_eq!(recorder.added.get(), 1);
    assert_eq!(first.manager(), Some(manager.id()));
    assert_eq!(second.manager(), None);
    assert_eq!(ev.armed_idle_timeouts(), 1);

    // The rejected connection is not a member, so removing it does nothing
    manager.remove_connection(second.as_ref());
    assert_eq!(manager.connection_count(), 1);
    assert_eq!(recorder.removed.get(), 0);
    assert_eq!(TestConn::count(&second.cancels), 0);

    manager.remove_connection(first.as_ref());
    assert!(manager.is_empty());
    assert_eq!(first.manager(), None);
    assert_eq!(recorder.removed.get(), 1);
    assert_eq!(recorder.empty.get(), 1);
}

#[test]
fn test_leaving_from_cancel_timeout() {
    let (_ev, recorder, manager) = setup();
    let conns = populate(&manager, 3);
    for conn in &conns {
        conn.leave_on_cancel.store(true, Ordering::SeqCst);
    }

    manager.remove_connection(conns[0].as_ref());
    assert_eq!(TestConn::count(&conns[0].cancels), 1);
    assert_eq!(recorder.removed.get(), 1);
    assert_eq!(manager.connection_count(), 2);

    manager.drop_all_connections();
    assert!(manager.is_empty());
    assert_eq!(total(&conns, |c| &c.cancels), 3);
    assert_eq!(total(&conns[1..], |c| &c.dropped), 2);
    assert_eq!(recorder.removed.get(), 1);
    assert_eq!(recorder.empty.get(), 1);
}

#[test]
fn test_foreign_thread_owner_panics() {
    let (_ev, recorder, manager) = setup();
    let (conn_tx, conn_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let owner = std::thread::spawn(move || {
        let (_ev, _recorder, foreign) = setup();
        let conn = TestConn::new();
        foreign.add_connection(conn.clone(), false);
        conn_tx.send(conn).unwrap();
        done_rx.recv().unwrap();
    });

    let conn = conn_rx.recv().unwrap();
    let owner_id = conn.manager();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        manager.add_connection(conn.clone(), true);
    }));

    let payload = result.unwrap_err();
    let message = payload.downcast_ref::<String>().map(String::as_str).unwrap_or_default();
    assert!(message.contains("call remove_connection on that thread"), "{message}");
    assert!(manager.is_empty());
    assert_eq!(recorder.added.get(), 0);
    assert_eq!(conn.manager(), owner_id);

    done_tx.send(()).unwrap();
    owner.join().unwrap();
    assert_eq!(conn.manager(), None);
}

#[test]
fn test_grace_period_then_close_idle() {
    let (ev, _recorder, manager) = setup();
    let conns = populate(&manager, 3);

    manager.initiate_graceful_shutdown(Duration::from_secs(5));

    assert_eq!(manager.phase(), DrainPhase::Notify);
    assert!(manager.is_draining());
    assert_eq!(total(&conns, |c| &c.notified), 3);
    assert_eq!(total(&conns, |c| &c.close_requests), 0);
    assert_eq!(ev.pending_timers(), 1);
    assert_eq!(ev.pending_turn_tasks(), 0);

    ev.advance(Duration::from_secs(4));
    assert_eq!(manager.phase(), DrainPhase::Notify);

    ev.advance(Duration::from_secs(1));
    assert_eq!(manager.phase(), DrainPhase::CloseIdle);
    assert_eq!(total(&conns, |c| &c.close_requests), 3);
    assert_eq!(total(&conns, |c| &c.notified), 3);
    assert_eq!(ev.pending_timers(), 0);
}

#[test]
fn test_grace_expiry_restarts_walk() {
    let (ev, _recorder, manager) = setup();
    let conns = populate(&manager, 100);

    manager.initiate_graceful_shutdown(Duration::from_millis(1));
    assert_eq!(total(&conns, |c| &c.notified), 64);
    assert_eq!(ev.pending_turn_tasks(), 1);

    ev.advance(Duration::from_millis(1));
    assert_eq!(manager.phase(), DrainPhase::CloseIdle);
    for conn in &conns[..DRAIN_BATCH_SIZE] {
        assert_eq!(TestConn::count(&conn.close_requests), 1);
    }
    assert_eq!(ev.pending_turn_tasks(), 1);

    ev.run_until_idle(10);
    assert_eq!(total(&conns, |c| &c.close_requests), 100);
    assert_eq!(total(&conns, |c| &c.notified), 64);
    assert_eq!(ev.pending_turn_tasks(), 0);
}

#[test]
fn test_phase_never_moves_back() {
    let (ev, _recorder, manager) = setup();
    let conns = populate(&manager, 2);

    manager.initiate_graceful_shutdown(Duration::from_secs(5));
    manager.initiate_graceful_shutdown(Duration::ZERO);
    assert_eq!(manager.phase(), DrainPhase::CloseIdle);
    assert_eq!(ev.pending_timers(), 0);

    manager.initiate_graceful_shutdown(Duration::from_secs(5));
    assert_eq!(manager.phase(), DrainPhase::CloseIdle);
    assert_eq!(ev.pending_timers(), 0);

    assert_eq!(total(&conns, |c| &c.notified), 2);
    assert_eq!(total(&conns, |c| &c.close_requests), 4);
}

#[test]
fn test_drain_batch_without_shutdown_is_noop() {
    let (ev, _recorder, manager) = setup();
    let conns = populate(&manager, 3);

    let outcome = manager.drain_batch();

    assert_eq!(outcome.visited, 0);
    assert_eq!(manager.phase(), DrainPhase::NotDraining);
    assert_eq!(total(&conns, |c| &c.notified), 0);
    assert_eq!(ev.pending_turn_tasks(), 0);
}

#[test]
fn test_drain_on_empty_manager() {
    let (ev, recorder, manager) = setup();

    manager.initiate_graceful_shutdown(Duration::ZERO);

    assert_eq!(manager.phase(), DrainPhase::CloseIdle);
    assert_eq!(ev.pending_turn_tasks(), 0);
    assert_eq!(recorder.empty.get(), 0);
}

#[test]
fn test_self_removal_during_notify() {
    let (ev, recorder, manager) = setup();
    let conns = populate(&manager, 100);
    for conn in &conns {
        conn.leave_on_notify.store(true, Ordering::SeqCst);
    }

    manager.initiate_graceful_shutdown(Duration::from_secs(5));
    assert_eq!(manager.connection_count(), 36);
    assert_eq!(manager.drain_cursor(), Some(conns[DRAIN_BATCH_SIZE].id()));

    ev.run_until_idle(10);

    assert!(manager.is_empty());
    for conn in &conns {
        assert_eq!(TestConn::count(&conn.notified), 1);
        assert_eq!(conn.manager(), None);
    }
    assert_eq!(recorder.removed.get(), 100);
    assert_eq!(recorder.empty.get(), 1);

    ev.advance(Duration::from_secs(5));
    assert_eq!(manager.phase(), DrainPhase::CloseIdle);
    assert_eq!(recorder.empty.get(), 1);
}

#[test]
fn test_removing_next_connection_during_close() {
    let (_ev, _recorder, manager) = setup();
    let conns = populate(&manager, 3);
    *conns[0].victim.lock() = Some(conns[1].clone() as ConnRef);

    manager.initiate_graceful_shutdown(Duration::ZERO);

    assert_eq!(TestConn::count(&conns[0].close_requests), 1);
    assert_eq!(TestConn::count(&conns[1].close_requests), 0);
    assert_eq!(TestConn::count(&conns[2].close_requests), 1);
    assert_eq!(manager.connection_count(), 2);
    assert!(!manager.contains(conns[1].id()));
    assert_eq!(manager.drain_cursor(), None);
}

#[test]
fn test_self_removal_during_close_empties_manager() {
    let (ev, recorder, manager) = setup();
    let conns = populate(&manager, 70);
    for conn in &conns {
        conn.busy.store(true, Ordering::SeqCst);
        conn.leave_on_close.store(true, Ordering::SeqCst);
    }

    manager.initiate_graceful_shutdown(Duration::ZERO);
    assert_eq!(manager.connection_count(), 6);

    ev.run_turn();
    assert!(manager.is_empty());
    assert_eq!(recorder.empty.get(), 1);
    assert_eq!(total(&conns, |c| &c.close_requests), 70);
}

#[test]
fn test_released_by_callback_mid_drain() {
    let (ev, recorder, manager) = setup();
    let id = manager.id();
    let conns = populate(&manager, 100);
    for conn in &conns {
        conn.leave_on_close.store(true, Ordering::SeqCst);
    }
    *recorder.release_on_empty.borrow_mut() = Some(manager.clone());

    manager.initiate_graceful_shutdown(Duration::ZERO);
    drop(manager);
    assert!(ConnectionManager::lookup(id).is_some());

    ev.run_until_idle(10);

    assert!(ConnectionManager::lookup(id).is_none());
    assert_eq!(recorder.empty.get(), 1);
    assert_eq!(total(&conns, |c| &c.close_requests), 100);
    assert!(conns.iter().all(|c| c.manager().is_none()));
    assert_eq!(ev.pending_turn_tasks(), 0);
}

#[test]
fn test_dropping_manager_detaches_connections() {
    let (ev, recorder, manager) = setup();
    let id = manager.id();
    let conns = populate(&manager, 3);
    manager.initiate_graceful_shutdown(Duration::from_secs(5));

    let dropped_before = METRICS.snapshot().connections_dropped;
    drop(manager);

    // Other tests bump the global counter concurrently
    assert!(METRICS.snapshot().connections_dropped >= dropped_before + 3);
    assert!(ConnectionManager::lookup(id).is_none());
    assert!(conns.iter().all(|c| c.manager().is_none()));
    assert_eq!(ev.armed_idle_timeouts(), 0);
    assert_eq!(ev.pending_timers(), 0);
    assert_eq!(recorder.removed.get(), 0);

    ev.advance(Duration::from_secs(60));
    assert_eq!(total(&conns, |c| &c.timeouts), 0);
}

#[test]
fn test_stats_track_membership_and_phase() {
    let (_ev, _recorder, manager) = setup();
    populate(&manager, 4);

    let stats = manager.stats();
    assert_eq!(stats.manager, manager.id().as_u64());
    assert_eq!(stats.connections, 4);
    assert_eq!(stats.phase, DrainPhase::NotDraining);
    assert_eq!(stats.idle_timeout_ms, 30_000);

    manager.initiate_graceful_shutdown(Duration::from_secs(1));
    assert_eq!(manager.stats().phase, DrainPhase::Notify);

    let json = serde_json::to_value(manager.stats()).unwrap();
    assert_eq!(json["phase"], "Notify");
    assert_eq!(json["connections"], 4);
}
