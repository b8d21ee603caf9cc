//! Deterministic event loop with a virtual clock
//!
//! Nothing runs until the owner calls [`ManualLoop::run_turn`] or
//! [`ManualLoop::advance`], so tests can observe the manager between
//! individual loop turns.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::{EventLoop, LoopTask, TaskHandle};
use crate::connection::{ConnRef, ConnectionId, ManagedConnection};

struct IdleEntry {
    deadline: Duration,
    seq: u64,
    conn: Weak<dyn ManagedConnection>,
}

#[derive(Default)]
struct State {
    now: Duration,
    next_seq: u64,
    turn_queue: VecDeque<(u64, LoopTask)>,
    timers: BTreeMap<(Duration, u64), LoopTask>,
    timer_deadlines: HashMap<u64, Duration>,
    idle: HashMap<ConnectionId, IdleEntry>,
    idle_schedules: usize,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

enum Due {
    Timer(LoopTask),
    Idle(ConnectionId, Weak<dyn ManagedConnection>),
}

/// Single-threaded loop driven explicitly by its owner
#[derive(Default)]
pub struct ManualLoop {
    state: RefCell<State>,
}

impl ManualLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time, measured from loop creation
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Run the tasks that were queued before this turn started.
    /// Tasks queued while the turn runs wait for the next turn.
    /// Returns the number of tasks run.
    pub fn run_turn(&self) -> usize {
        let cutoff = self.state.borrow().next_seq;
        let mut ran = 0;

        loop {
            let task = {
                let mut state = self.state.borrow_mut();
                let ready = matches!(state.turn_queue.front(), Some((seq, _)) if *seq <= cutoff);
                if ready {
                    state.turn_queue.pop_front()
                } else {
                    None
                }
            };
            let Some((_, task)) = task else { break };
            task();
            ran += 1;
        }

        ran
    }

    /// Run turns until no next-turn work is queued, up to `max_turns`.
    /// Returns the number of turns that ran at least one task.
    pub fn run_until_idle(&self, max_turns: usize) -> usize {
        let mut turns = 0;
        while turns < max_turns && self.run_turn() > 0 {
            turns += 1;
        }
        turns
    }

    /// Move the clock forward, firing due timers and idle deadlines in
    /// deadline order
    pub fn advance(&self, by: Duration) {
        let target = self.state.borrow().now + by;

        while let Some(due) = self.pop_due(target) {
            match due {
                Due::Timer(task) => task(),
                Due::Idle(_, conn) => {
                    if let Some(conn) = conn.upgrade() {
                        conn.timeout_expired();
                    }
                }
            }
        }

        self.state.borrow_mut().now = target;
    }

    fn pop_due(&self, target: Duration) -> Option<Due> {
        let mut state = self.state.borrow_mut();

        let timer = state.timers.keys().next().copied();
        let idle = state
            .idle
            .iter()
            .map(|(id, entry)| (entry.deadline, entry.seq, *id))
            .min();

        let timer_first = match (timer, idle) {
            (Some((deadline, seq)), Some((idle_deadline, idle_seq, _))) => {
                (deadline, seq) <= (idle_deadline, idle_seq)
            }
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };

        if timer_first {
            let (deadline, seq) = timer?;
            if deadline > target {
                return None;
            }
            state.now = deadline;
            state.timer_deadlines.remove(&seq);
            state.timers.remove(&(deadline, seq)).map(Due::Timer)
        } else {
            let (deadline, _, id) = idle?;
            if deadline > target {
                return None;
            }
            state.now = deadline;
            state.idle.remove(&id).map(|entry| Due::Idle(id, entry.conn))
        }
    }

    /// Number of tasks waiting for a loop turn
    pub fn pending_turn_tasks(&self) -> usize {
        self.state.borrow().turn_queue.len()
    }

    /// Number of armed one-shot timers
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Absolute deadline of the connection's idle timeout, if armed
    pub fn idle_deadline(&self, id: ConnectionId) -> Option<Duration> {
        self.state.borrow().idle.get(&id).map(|entry| entry.deadline)
    }

    /// Number of armed idle deadlines
    pub fn armed_idle_timeouts(&self) -> usize {
        self.state.borrow().idle.len()
    }

    /// Total idle-timeout (re)schedules seen since creation
    pub fn idle_schedules(&self) -> usize {
        self.state.borrow().idle_schedules
    }
}

impl EventLoop for ManualLoop {
    fn schedule_idle_timeout(&self, conn: &ConnRef, after: Duration) {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq();
        let deadline = state.now + after;
        state.idle_schedules += 1;
        state.idle.insert(
            conn.id(),
            IdleEntry {
                deadline,
                seq,
                conn: Arc::downgrade(conn),
            },
        );
    }

    fn cancel_idle_timeout(&self, id: ConnectionId) {
        self.state.borrow_mut().idle.remove(&id);
    }

    fn run_on_next_turn(&self, task: LoopTask) -> TaskHandle {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq();
        state.turn_queue.push_back((seq, task));
        TaskHandle::from_raw(seq)
    }

    fn schedule_one_shot(&self, after: Duration, task: LoopTask) -> TaskHandle {
        let mut state = self.state.borrow_mut();
        let seq = state.next_seq();
        let deadline = state.now + after;
        state.timers.insert((deadline, seq), task);
        state.timer_deadlines.insert(seq, deadline);
        TaskHandle::from_raw(seq)
    }

    fn cancel(&self, handle: TaskHandle) {
        let seq = handle.as_u64();
        let mut state = self.state.borrow_mut();

        if let Some(deadline) = state.timer_deadlines.remove(&seq) {
            state.timers.remove(&(deadline, seq));
        } else {
            state.turn_queue.retain(|(queued, _)| *queued != seq);
        }
    }
}
