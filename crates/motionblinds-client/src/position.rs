//! Position state machine for a single blind.
//!
//! [`PositionTracker`] caches the target a caller asked for and the
//! direction the blind is moving in. It sends the move, then watches the
//! device's state until the blind is at rest, using one of two
//! [`CompletionStrategy`] modes. Either mode gives up at a fixed ceiling and
//! adopts the last position it saw.
//!
//! Every move bumps a generation counter. Timers and poll results belonging
//! to an older generation are discarded.

use crate::state::{StateUpdate, UpdateOrigin};
use crate::{ClientError, Device};
use motionblinds_core::types::{Operation, Position};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Direction of travel, with the codes home-automation hosts expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PositionState {
    Closing = 0,
    Opening = 1,
    Stopped = 2,
}

impl PositionState {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl From<Operation> for PositionState {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Closing => Self::Closing,
            Operation::Opening => Self::Opening,
            Operation::Stopped | Operation::StatusQuery | Operation::Unknown(_) => Self::Stopped,
        }
    }
}

/// How the end of a move is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "mode", rename_all = "snake_case")
)]
pub enum CompletionStrategy {
    /// Sample the position every `interval`, re-reading the device when
    /// `refresh` is set, and stop once it is at the target or has not changed
    /// since the previous sample. A still blind's position becomes the target.
    Poll {
        interval: Duration,
        ceiling: Duration,
        refresh: bool,
    },
    /// Stop when the device pushes a report whose `operation` is not a
    /// motion code.
    TrustReports { ceiling: Duration },
}

impl CompletionStrategy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_CEILING: Duration = Duration::from_secs(30);

    pub fn poll() -> Self {
        Self::Poll {
            interval: Self::DEFAULT_INTERVAL,
            ceiling: Self::DEFAULT_CEILING,
            refresh: true,
        }
    }

    pub fn trust_reports() -> Self {
        Self::TrustReports {
            ceiling: Self::DEFAULT_CEILING,
        }
    }

    /// Longest a move is tracked before the last seen position is adopted.
    pub fn ceiling(&self) -> Duration {
        match *self {
            Self::Poll { ceiling, .. } | Self::TrustReports { ceiling } => ceiling,
        }
    }
}

impl Default for CompletionStrategy {
    fn default() -> Self {
        Self::poll()
    }
}

/// Which report is dropped after a move is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ReportSuppression {
    /// Drop the next report unconditionally. Also covers dropping it only
    /// when the target differs from the current position, since a move is
    /// only sent in that case.
    Always,
    /// Drop the next report unless it shows the new target.
    #[default]
    UnlessAtTarget,
    /// Apply every report.
    Never,
}

/// Snapshot published whenever the tracked triple changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionEvent {
    /// Percent open.
    pub current: u8,
    /// Percent open.
    pub target: u8,
    pub state: PositionState,
}

#[derive(Debug)]
struct Motion {
    generation: u64,
    deadline: Instant,
    last_seen: Position,
    task: JoinHandle<()>,
}

#[derive(Debug)]
struct TrackerState {
    target: Position,
    position_state: PositionState,
    generation: u64,
    motion: Option<Motion>,
    last_event: Option<PositionEvent>,
}

#[derive(Debug)]
struct Shared {
    device: Arc<Device>,
    completion: CompletionStrategy,
    suppression: ReportSuppression,
    state: Mutex<TrackerState>,
    events: broadcast::Sender<PositionEvent>,
}

/// Current/target/direction view of one blind.
///
/// Created with a running tokio runtime; the tracker follows the device's
/// updates in a background task that stops when the tracker is dropped.
#[derive(Debug)]
pub struct PositionTracker {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl PositionTracker {
    pub fn new(
        device: Arc<Device>,
        completion: CompletionStrategy,
        suppression: ReportSuppression,
    ) -> Self {
        let target = device.current_position().unwrap_or(Position::CLOSED);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let updates = device.subscribe();
        let shared = Arc::new(Shared {
            device,
            completion,
            suppression,
            state: Mutex::new(TrackerState {
                target,
                position_state: PositionState::Stopped,
                generation: 0,
                motion: None,
                last_event: None,
            }),
            events,
        });
        let task = tokio::spawn(follow_device(shared.clone(), updates));
        Self { shared, task }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.shared.device
    }

    /// Position the device last reported; fully closed until it has
    /// reported one.
    pub fn current_position(&self) -> Position {
        self.shared.current_position()
    }

    pub fn target_position(&self) -> Position {
        self.shared.lock().target
    }

    pub fn position_state(&self) -> PositionState {
        self.shared.lock().position_state
    }

    /// Moves the blind to `value` percent open and returns the direction it
    /// will travel in. A target equal to the current position is cached
    /// without contacting the device.
    pub fn set_target_position(&self, value: u8) -> Result<PositionState, ClientError> {
        let target = Position::new(value).ok_or(ClientError::PositionOutOfRange(value))?;
        let shared = &self.shared;
        let current = shared.current_position();
        let direction = match target.cmp(&current) {
            Ordering::Greater => PositionState::Opening,
            Ordering::Less => PositionState::Closing,
            Ordering::Equal => PositionState::Stopped,
        };

        {
            let mut state = shared.lock();
            if let Some(motion) = state.motion.take() {
                motion.task.abort();
            }
            state.generation += 1;
            state.target = target;
            state.position_state = direction;
            if direction == PositionState::Stopped {
                shared.emit(&mut state, current);
                return Ok(direction);
            }

            let generation = state.generation;
            let deadline = Instant::now() + shared.completion.ceiling();
            let task = tokio::spawn(complete_motion(shared.clone(), generation, deadline));
            state.motion = Some(Motion {
                generation,
                deadline,
                last_seen: current,
                task,
            });
            shared.emit(&mut state, current);
        }

        let device = &shared.device;
        match shared.suppression {
            ReportSuppression::Always => device.ignore_next_report(),
            ReportSuppression::UnlessAtTarget => device.ignore_next_report_unless_at(target),
            ReportSuppression::Never => device.clear_ignored_report(),
        }
        log::debug!(
            "device {}: {:?} from {} to {}",
            device.mac(),
            direction,
            current.percent(),
            target.percent()
        );
        // The ack echoes the old state; completion is detected from reads
        // and reports instead.
        let _ack = device.move_to(target);
        Ok(direction)
    }

    /// Forces a re-read of the device state.
    pub fn identify(&self) {
        let device = self.shared.device.clone();
        tokio::spawn(async move {
            if let Err(e) = device.update().await {
                log::warn!("re-reading device {} failed: {e}", device.mac());
            }
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for PositionTracker {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(motion) = self.shared.lock().motion.take() {
            motion.task.abort();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_position(&self) -> Position {
        self.device.current_position().unwrap_or(Position::CLOSED)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock()
            .motion
            .as_ref()
            .is_some_and(|m| m.generation == generation)
    }

    /// Reacts to a state update of the device.
    fn observe(&self, origin: UpdateOrigin) {
        let Some(current) = self.device.current_position() else {
            return;
        };
        let operation = self.device.operation();
        let mut state = self.lock();

        if state.motion.is_none() {
            if state.target != current {
                log::debug!(
                    "device {} moved to {} while idle",
                    self.device.mac(),
                    current.percent()
                );
                state.target = current;
            }
        } else {
            let at_rest = match self.completion {
                CompletionStrategy::Poll { .. } => current == state.target,
                CompletionStrategy::TrustReports { .. } => {
                    origin == UpdateOrigin::Report
                        && operation.map(PositionState::from) == Some(PositionState::Stopped)
                }
            };
            if at_rest {
                self.settle(&mut state, current, true);
            }
        }
        self.emit(&mut state, current);
    }

    /// One poll step. Returns `true` once the motion of `generation` is over.
    fn tick(&self, generation: u64, now: Instant) -> bool {
        let current = self.device.current_position();
        let mut state = self.lock();
        let target = state.target;
        let Some(motion) = state
            .motion
            .as_mut()
            .filter(|m| m.generation == generation)
        else {
            return true;
        };

        let settled = match current {
            Some(position) if position == target => Some(position),
            _ if now >= motion.deadline => {
                log::debug!("device {} did not settle before the ceiling", self.device.mac());
                Some(current.unwrap_or(motion.last_seen))
            }
            Some(position) if position == motion.last_seen => Some(position),
            Some(position) => {
                motion.last_seen = position;
                None
            }
            None => None,
        };

        match settled {
            Some(position) => {
                self.settle(&mut state, position, false);
                self.emit(&mut state, current.unwrap_or(position));
                true
            }
            None => false,
        }
    }

    /// Ceiling reached while trusting reports.
    fn expire(&self, generation: u64) {
        let current = self.device.current_position();
        let mut state = self.lock();
        let Some(motion) = state.motion.as_ref().filter(|m| m.generation == generation) else {
            return;
        };
        let position = current.unwrap_or(motion.last_seen);
        log::debug!("device {} sent no final report before the ceiling", self.device.mac());
        self.settle(&mut state, position, false);
        self.emit(&mut state, position);
    }

    fn settle(&self, state: &mut TrackerState, position: Position, abort_timer: bool) {
        state.target = position;
        state.position_state = PositionState::Stopped;
        if let Some(motion) = state.motion.take() {
            if abort_timer {
                motion.task.abort();
            }
        }
        log::debug!("device {} at rest at {}", self.device.mac(), position.percent());
    }

    fn emit(&self, state: &mut TrackerState, current: Position) {
        let event = PositionEvent {
            current: current.percent(),
            target: state.target.percent(),
            state: state.position_state,
        };
        if state.last_event != Some(event) {
            state.last_event = Some(event);
            let _ = self.events.send(event);
        }
    }
}

async fn follow_device(shared: Arc<Shared>, mut updates: broadcast::Receiver<StateUpdate>) {
    loop {
        match updates.recv().await {
            Ok(update) => shared.observe(update.origin),
            Err(RecvError::Lagged(skipped)) => {
                log::debug!("position tracker skipped {skipped} updates");
                shared.observe(UpdateOrigin::Read);
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn complete_motion(shared: Arc<Shared>, generation: u64, deadline: Instant) {
    match shared.completion {
        CompletionStrategy::Poll {
            interval, refresh, ..
        } => loop {
            sleep_until((Instant::now() + interval).min(deadline)).await;
            if !shared.is_current(generation) {
                return;
            }
            if refresh && Instant::now() < deadline {
                if let Ok(Err(e)) = timeout_at(deadline, shared.device.update()).await {
                    log::debug!("polling device {} failed: {e}", shared.device.mac());
                }
            }
            if shared.tick(generation, Instant::now()) {
                return;
            }
        },
        CompletionStrategy::TrustReports { .. } => {
            sleep_until(deadline).await;
            shared.expire(generation);
        }
    }
}
