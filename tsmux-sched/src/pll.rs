//! Phase-locked loop packet pacer.
//!
//! Emits a trigger roughly once per packet period for a configured bitrate
//! (one 188-byte packet every `188*8 / (mbps*10^6)` seconds) while a PID
//! controller nudges the trigger phase toward observed reference events,
//! typically PCR arrivals. All controller math is integer nanoseconds with
//! gains scaled by 100; the delay is clamped to `[0, period]` so a
//! sustained one-sided error cannot run the accumulator away.
//!
//! The run loop owns the ticker and the event stream; the mutex guards PID
//! state updates only and is never held across an await point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Bits in one transport-stream packet.
pub const TS_PACKET_BITS: u64 = 188 * 8;

const STREAM_DEPTH: usize = 64;

/// Portable PID controller state, used to carry phase lock across a
/// pipeline reload when the PLL parameters are unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidSnapshot {
    /// Current trigger offset from the last tick, in nanoseconds.
    pub delay_ns: i64,
    /// Accumulated integral term.
    pub integral: i64,
    /// Error observed by the previous update.
    pub last_delta: i64,
}

struct PidState {
    delay_ns: i64,
    integral: i64,
    last_delta: i64,
    last_tick: Instant,
    kp: i64,
    ki: i64,
    kd: i64,
    period_ns: i64,
}

impl PidState {
    /// Apply one PID update for a signed phase error in nanoseconds
    /// (negative = event early, positive = event late).
    fn update(&mut self, delta: i64) {
        let proportional = delta * self.kp / 100;
        self.integral += delta * self.ki / 100;
        let derivative = (delta - self.last_delta) * self.kd / 100;
        self.last_delta = delta;

        self.delay_ns = (self.delay_ns - (proportional + self.integral + derivative))
            .clamp(0, self.period_ns);
    }
}

/// A PID-controlled periodic trigger locked to a target bitrate.
pub struct Pll {
    period: Duration,
    state: Arc<Mutex<PidState>>,
    event_tx: mpsc::Sender<()>,
    event_rx: Option<mpsc::Receiver<()>>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

impl Pll {
    /// Create a pacer for the given bitrate in Mbps and PID gains scaled
    /// by 100. The initial delay is one full period.
    pub fn new(mbps: f64, kp: i64, ki: i64, kd: i64) -> Self {
        let period_ns = (TS_PACKET_BITS as f64 / (mbps * 1e6) * 1e9).round() as i64;
        let (event_tx, event_rx) = mpsc::channel(STREAM_DEPTH);
        Self {
            period: Duration::from_nanos(period_ns as u64),
            state: Arc::new(Mutex::new(PidState {
                delay_ns: period_ns,
                integral: 0,
                last_delta: 0,
                last_tick: Instant::now(),
                kp,
                ki,
                kd,
                period_ns,
            })),
            event_tx,
            event_rx: Some(event_rx),
            stopped: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
        }
    }

    /// Create a pacer seeded with controller state carried over from a
    /// previous instance with identical parameters.
    pub fn with_state(mbps: f64, kp: i64, ki: i64, kd: i64, snapshot: PidSnapshot) -> Self {
        let pll = Self::new(mbps, kp, ki, kd);
        {
            let mut state = pll.state.lock();
            state.delay_ns = snapshot.delay_ns.clamp(0, state.period_ns);
            state.integral = snapshot.integral;
            state.last_delta = snapshot.last_delta;
        }
        pll
    }

    /// Nanoseconds-per-packet period for the configured bitrate.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Current trigger delay.
    pub fn delay(&self) -> Duration {
        Duration::from_nanos(self.state.lock().delay_ns as u64)
    }

    /// Snapshot the controller state for carry-over across a reload.
    pub fn snapshot(&self) -> PidSnapshot {
        let state = self.state.lock();
        PidSnapshot {
            delay_ns: state.delay_ns,
            integral: state.integral,
            last_delta: state.last_delta,
        }
    }

    /// Sender for phase reference events (one per observed PCR).
    pub fn events(&self) -> mpsc::Sender<()> {
        self.event_tx.clone()
    }

    /// Start the pacer and return the trigger stream.
    ///
    /// A second start returns an already-closed stream; the pacer runs at
    /// most one ticker task.
    pub fn start(&mut self) -> mpsc::Receiver<()> {
        let Some(event_rx) = self.event_rx.take() else {
            tracing::warn!("PLL started twice; returning closed trigger stream");
            let (_, rx) = mpsc::channel(1);
            return rx;
        };

        let (trigger_tx, trigger_rx) = mpsc::channel(STREAM_DEPTH);
        let state = Arc::clone(&self.state);
        let stopped = Arc::clone(&self.stopped);
        let stop_notify = Arc::clone(&self.stop_notify);
        let period = self.period;

        tokio::spawn(run_loop(
            state,
            period,
            event_rx,
            trigger_tx,
            stopped,
            stop_notify,
        ));
        trigger_rx
    }

    /// Stop the pacer: the ticker halts and both streams close. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stop_notify.notify_waiters();
        }
    }

    /// Whether the pacer has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn run_loop(
    state: Arc<Mutex<PidState>>,
    period: Duration,
    mut event_rx: mpsc::Receiver<()>,
    trigger_tx: mpsc::Sender<()>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                let delay = {
                    let mut state = state.lock();
                    state.last_tick = Instant::now();
                    Duration::from_nanos(state.delay_ns as u64)
                };
                let tx = trigger_tx.clone();
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.try_send(()).is_err() {
                        tracing::trace!("trigger dropped, consumer behind");
                    }
                });
            }
            event = event_rx.recv() => match event {
                Some(()) => {
                    let mut state = state.lock();
                    let target = state.last_tick + period;
                    let now = Instant::now();
                    let delta = if now >= target {
                        (now - target).as_nanos() as i64
                    } else {
                        -((target - now).as_nanos() as i64)
                    };
                    state.update(delta);
                }
                None => break,
            },
            _ = stop_notify.notified() => break,
        }
    }
    tracing::debug!("PLL run loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: i64 = 1_000_000;

    fn pid_state(period_ms: i64, delay_ms: i64) -> PidState {
        PidState {
            delay_ns: delay_ms * MS,
            integral: 0,
            last_delta: 0,
            last_tick: Instant::now(),
            kp: 1,
            ki: 1,
            kd: 1,
            period_ns: period_ms * MS,
        }
    }

    #[test]
    fn test_positive_delta_decreases_delay() {
        let mut state = pid_state(10, 10);
        state.update(5 * MS);
        assert!(state.delay_ns < 10 * MS);
        assert!(state.delay_ns >= 0);
    }

    #[test]
    fn test_negative_delta_increases_delay() {
        let mut state = pid_state(10, 8);
        state.update(-5 * MS);
        assert!(state.delay_ns > 8 * MS);
        assert!(state.delay_ns <= 10 * MS);
    }

    #[test]
    fn test_delay_clamped_to_period() {
        let mut state = pid_state(10, 5);
        state.update(i32::MAX as i64);
        assert_eq!(state.delay_ns, 0);

        let mut state = pid_state(10, 5);
        state.update(-(i32::MAX as i64));
        assert_eq!(state.delay_ns, 10 * MS);
    }

    #[test]
    fn test_sustained_error_stays_clamped() {
        let mut state = pid_state(10, 10);
        for _ in 0..10_000 {
            state.update(3 * MS);
            assert!(state.delay_ns >= 0 && state.delay_ns <= 10 * MS);
        }
    }

    #[test]
    fn test_period_from_bitrate() {
        // 188*8 bits at 1.504 Mbps is exactly 1 ms per packet.
        let pll = Pll::new(1.504, 1, 1, 1);
        assert_eq!(pll.period(), Duration::from_millis(1));
        assert_eq!(pll.delay(), pll.period());
    }

    #[test]
    fn test_snapshot_carry_over() {
        let pll = Pll::new(1.504, 1, 1, 1);
        {
            let mut state = pll.state.lock();
            state.update(200_000);
        }
        let snapshot = pll.snapshot();

        let seeded = Pll::with_state(1.504, 1, 1, 1, snapshot);
        assert_eq!(seeded.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn test_triggers_emitted() {
        let mut pll = Pll::new(1.504, 1, 1, 1);
        let mut triggers = pll.start();

        let received = tokio::time::timeout(Duration::from_secs(1), triggers.recv()).await;
        assert_eq!(received.expect("trigger within one second"), Some(()));
        pll.stop();
    }

    #[tokio::test]
    async fn test_stop_idempotent_and_closes_streams() {
        let mut pll = Pll::new(1.504, 1, 1, 1);
        let mut triggers = pll.start();
        let events = pll.events();

        pll.stop();
        pll.stop();
        assert!(pll.is_stopped());

        // The run loop exits, dropping its ends of both streams.
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            while triggers.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "trigger stream must close after stop");

        tokio::time::timeout(Duration::from_secs(1), events.closed())
            .await
            .expect("event stream must close after stop");
    }

    #[tokio::test]
    async fn test_events_keep_delay_in_range() {
        let mut pll = Pll::new(1.504, 1, 1, 1);
        let _triggers = pll.start();
        let events = pll.events();

        for _ in 0..20 {
            events.send(()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let delay = pll.delay();
        assert!(delay <= pll.period());
        pll.stop();
    }
}
