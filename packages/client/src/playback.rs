//! Time-window playback.
//!
//! The machine walks a cursor from the start to the end of the current
//! temporal domain, emitting a window around the cursor on every tick, and
//! debounces manual scrubbing while stopped. Both tick and scrub emit the
//! same symmetric window: `[cursor - step/2, cursor + step/2]`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sensor_map_config::ClientConfig;
use sensor_map_search_models::{ResultEnvelope, TemporalDomain};
use tokio::sync::mpsc;

use crate::ClientError;
use crate::clock::{Clock, PendingTimer};
use crate::orchestrator::FetchOrchestrator;
use crate::signature::{TimeRange, Viewport};

/// How often [`Player::run`] polls the machine.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Whether the cursor is advancing on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackMode {
    #[default]
    Stopped,
    Playing,
}

/// Cursor position within a resolved temporal domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    /// Playing or stopped.
    pub mode: PlaybackMode,
    /// Current position in epoch milliseconds; within the domain.
    pub cursor: i64,
    /// Earliest reading in the domain, epoch milliseconds.
    pub domain_min: i64,
    /// Latest reading in the domain, epoch milliseconds.
    pub domain_max: i64,
    /// Cursor advance per tick, also the width of the emitted window.
    pub step_ms: i64,
}

impl PlaybackState {
    /// The window centred on the cursor.
    #[must_use]
    pub const fn window(&self) -> TimeRange {
        TimeRange::centred(self.cursor, self.step_ms)
    }

    const fn same_domain(&self, min: i64, max: i64) -> bool {
        self.domain_min == min && self.domain_max == max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Tick,
    Scrub,
}

/// Playback state machine. Holds no state until a non-empty domain has
/// been observed.
pub struct PlaybackMachine {
    clock: Arc<dyn Clock>,
    step_ms: i64,
    step_interval_ms: i64,
    debounce_ms: i64,
    state: Option<PlaybackState>,
    timer: PendingTimer<TimerKind>,
}

impl PlaybackMachine {
    /// Creates a machine with the step, tick interval and scrub debounce
    /// from `config`, reading time from `clock`.
    #[must_use]
    pub fn new(config: &ClientConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            step_ms: config.step_ms.max(1),
            step_interval_ms: i64::try_from(config.step_interval_ms).unwrap_or(i64::MAX),
            debounce_ms: i64::try_from(config.debounce_ms).unwrap_or(i64::MAX),
            state: None,
            timer: PendingTimer::default(),
        }
    }

    /// The current state, or `None` until a non-empty domain is known.
    #[must_use]
    pub const fn state(&self) -> Option<&PlaybackState> {
        self.state.as_ref()
    }

    /// Whether playback is running.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state
            .is_some_and(|state| state.mode == PlaybackMode::Playing)
    }

    /// Updates the machine with a freshly resolved domain.
    ///
    /// An unchanged domain is ignored. A changed one resets playback to
    /// `Stopped` at the new start, and an empty one discards the state.
    /// Either way any pending timer is cancelled.
    pub fn observe_domain(&mut self, domain: TemporalDomain) {
        let Some((min, max)) = domain.bounds() else {
            if self.state.take().is_some() {
                log::debug!("Temporal domain is empty; playback disabled");
            }
            self.timer.cancel();
            return;
        };

        if self.state.is_some_and(|state| state.same_domain(min, max)) {
            return;
        }

        log::debug!("Temporal domain changed to [{min}, {max}]; playback reset");
        self.timer.cancel();
        self.state = Some(PlaybackState {
            mode: PlaybackMode::Stopped,
            cursor: min,
            domain_min: min,
            domain_max: max,
            step_ms: self.step_ms,
        });
    }

    /// Starts or stops playback. Returns whether the machine is now
    /// playing.
    ///
    /// Starting requires a resolved domain. A cursor already at the end
    /// rewinds to the start. Stopping only cancels the pending tick.
    pub fn toggle(&mut self) -> bool {
        let now = self.clock.now_ms();
        let Some(state) = self.state.as_mut() else {
            log::debug!("Ignoring play toggle: no temporal domain yet");
            return false;
        };

        match state.mode {
            PlaybackMode::Playing => {
                state.mode = PlaybackMode::Stopped;
                self.timer.cancel();
                false
            }
            PlaybackMode::Stopped => {
                if state.cursor >= state.domain_max {
                    state.cursor = state.domain_min;
                }
                state.mode = PlaybackMode::Playing;
                self.timer.arm(now, self.step_interval_ms, TimerKind::Tick);
                true
            }
        }
    }

    /// Moves the cursor by hand. The window is emitted once scrubbing has
    /// been quiet for the debounce period. Ignored while playing.
    pub fn scrub(&mut self, cursor: i64) {
        let now = self.clock.now_ms();
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.mode == PlaybackMode::Playing {
            log::trace!("Ignoring scrub while playing");
            return;
        }

        state.cursor = cursor.clamp(state.domain_min, state.domain_max);
        self.timer.arm(now, self.debounce_ms, TimerKind::Scrub);
    }

    /// Fires a due timer, returning the window to request if any.
    pub fn poll(&mut self) -> Option<TimeRange> {
        let now = self.clock.now_ms();
        match self.timer.fire(now)? {
            TimerKind::Scrub => self.state.map(|state| state.window()),
            TimerKind::Tick => self.tick(now),
        }
    }

    fn tick(&mut self, now: i64) -> Option<TimeRange> {
        let state = self.state.as_mut()?;
        if state.mode != PlaybackMode::Playing {
            return None;
        }
        if state.cursor >= state.domain_max {
            log::debug!("Playback reached the end of the domain");
            state.mode = PlaybackMode::Stopped;
            return None;
        }

        state.cursor = state
            .cursor
            .saturating_add(state.step_ms)
            .min(state.domain_max);
        let window = state.window();
        self.timer.arm(now, self.step_interval_ms, TimerKind::Tick);
        Some(window)
    }
}

/// Input delivered to a running [`Player::run`] loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// See [`PlaybackMachine::toggle`].
    Toggle,
    /// See [`PlaybackMachine::scrub`].
    Scrub(i64),
    /// See [`Player::set_viewport`].
    SetViewport(Viewport),
}

/// Drives a [`PlaybackMachine`] against a [`FetchOrchestrator`].
pub struct Player {
    machine: PlaybackMachine,
    orchestrator: Arc<FetchOrchestrator>,
    viewport: Viewport,
}

impl Player {
    /// Creates a player requesting windows for `viewport`.
    #[must_use]
    pub const fn new(
        machine: PlaybackMachine,
        orchestrator: Arc<FetchOrchestrator>,
        viewport: Viewport,
    ) -> Self {
        Self {
            machine,
            orchestrator,
            viewport,
        }
    }

    /// The underlying state machine.
    #[must_use]
    pub const fn machine(&self) -> &PlaybackMachine {
        &self.machine
    }

    /// Mutable access to the state machine, for driving it directly
    /// outside [`Self::run`].
    pub const fn machine_mut(&mut self) -> &mut PlaybackMachine {
        &mut self.machine
    }

    /// Moves to a new viewport and fetches it with the server's default
    /// window, updating the playback domain from the response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the request fails.
    pub async fn set_viewport(
        &mut self,
        viewport: Viewport,
    ) -> Result<Option<ResultEnvelope>, ClientError> {
        self.viewport = viewport;
        let envelope = self
            .orchestrator
            .request(&self.viewport, TimeRange::UNSET)
            .await?;
        if let Some(envelope) = &envelope {
            self.machine.observe_domain(envelope.dictionary.datetime);
        }
        Ok(envelope)
    }

    /// Polls the machine once and requests any emitted window. Failures are
    /// logged; playback keeps going.
    pub async fn advance(&mut self) -> Option<ResultEnvelope> {
        let window = self.machine.poll()?;
        match self.orchestrator.request(&self.viewport, window).await {
            Ok(Some(envelope)) => {
                self.machine.observe_domain(envelope.dictionary.datetime);
                Some(envelope)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Playback request failed: {e}");
                None
            }
        }
    }

    /// Applies one command.
    pub async fn handle(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::Toggle => {
                self.machine.toggle();
            }
            PlayerCommand::Scrub(cursor) => self.machine.scrub(cursor),
            PlayerCommand::SetViewport(viewport) => {
                if let Err(e) = self.set_viewport(viewport).await {
                    log::warn!("Viewport request failed: {e}");
                }
            }
        }
    }

    /// Calls [`Self::advance`] on a fixed interval and applies `commands`
    /// as they arrive, until `shutdown` completes. A closed command
    /// channel leaves the loop ticking.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<PlayerCommand>,
        shutdown: impl Future<Output = ()>,
    ) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut open = true;

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                command = commands.recv(), if open => match command {
                    Some(command) => self.handle(command).await,
                    None => open = false,
                },
                _ = interval.tick() => {
                    self.advance().await;
                }
            }
        }
        log::debug!("Playback loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::orchestrator::tests::{FakeTransport, hessdalen, undebounced};

    const MIN: i64 = 1_700_000_000_000;

    fn config() -> ClientConfig {
        ClientConfig {
            debounce_ms: 1_000,
            step_ms: 3,
            step_interval_ms: 100,
            ..ClientConfig::default()
        }
    }

    fn machine(clock: &Arc<ManualClock>) -> PlaybackMachine {
        PlaybackMachine::new(&config(), clock.clone())
    }

    #[test]
    fn ticks_ceil_of_domain_over_step_then_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let mut machine = machine(&clock);
        machine.observe_domain(TemporalDomain::new(MIN, MIN + 10));
        assert!(machine.toggle());

        let mut windows = Vec::new();
        for _ in 0..20 {
            clock.advance(100);
            if let Some(window) = machine.poll() {
                let cursor = machine.state().unwrap().cursor;
                assert!(cursor <= MIN + 10);
                windows.push(window);
            }
        }

        // ceil(10 / 3)
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0], TimeRange::new(MIN + 3 - 1, MIN + 3 + 1));
        assert_eq!(windows[3], TimeRange::new(MIN + 10 - 1, MIN + 10 + 1));
        assert!(!machine.is_playing());
    }

    #[test]
    fn nothing_fires_before_interval() {
        let clock = Arc::new(ManualClock::new(0));
        let mut machine = machine(&clock);
        machine.observe_domain(TemporalDomain::new(MIN, MIN + 10));
        machine.toggle();

        clock.advance(99);
        assert_eq!(machine.poll(), None);
    }

    #[test]
    fn toggle_requires_domain() {
        let clock = Arc::new(ManualClock::new(0));
        let mut machine = machine(&clock);
        assert!(!machine.toggle());
        assert!(machine.state().is_none());
    }

    #[test]
    fn toggle_at_end_rewinds() {
        let clock = Arc::new(ManualClock::new(0));
        let mut machine = machine(&clock);
        machine.observe_domain(TemporalDomain::new(MIN, MIN + 10));
        machine.scrub(MIN + 50);
        assert_eq!(machine.state().unwrap().cursor, MIN + 10);

        assert!(machine.toggle());
        assert_eq!(machine.state().unwrap().cursor, MIN);
    }

    #[test]
    fn stopping_cancels_pending_tick() {
        let clock = Arc::new(ManualClock::new(0));
        let mut machine = machine(&clock);
        machine.observe_domain(TemporalDomain::new(MIN, MIN + 10));
        machine.toggle();
        assert!(!machine.toggle());

        clock.advance(1_000);
        assert_eq!(machine.poll(), None);
        assert_eq!(machine.state().unwrap().cursor, MIN);
    }

    #[test]
    fn scrub_is_debounced() {
        let clock = Arc::new(ManualClock::new(0));
        let mut machine = machine(&clock);
        machine.observe_domain(TemporalDomain::new(MIN, MIN + 1_000));

        machine.scrub(MIN + 100);
        clock.advance(500);
        machine.scrub(MIN + 200);
        clock.advance(600);
        assert_eq!(machine.poll(), None);

        clock.advance(400);
        assert_eq!(machine.poll(), Some(TimeRange::centred(MIN + 200, 3)));
        assert_eq!(machine.poll(), None);
    }

    #[test]
    fn scrub_ignored_while_playing() {
        let clock = Arc::new(ManualClock::new(0));
        let mut machine = machine(&clock);
        machine.observe_domain(TemporalDomain::new(MIN, MIN + 10));
        machine.toggle();
        machine.scrub(MIN + 7);
        assert_eq!(machine.state().unwrap().cursor, MIN);
    }

    #[test]
    fn domain_changes_reset_or_discard_state() {
        let clock = Arc::new(ManualClock::new(0));
        let mut machine = machine(&clock);
        machine.observe_domain(TemporalDomain::new(MIN, MIN + 10));
        machine.toggle();

        machine.observe_domain(TemporalDomain::new(MIN, MIN + 10));
        assert!(machine.is_playing());

        machine.observe_domain(TemporalDomain::new(MIN + 5, MIN + 20));
        let state = *machine.state().unwrap();
        assert_eq!(state.mode, PlaybackMode::Stopped);
        assert_eq!(state.cursor, MIN + 5);
        clock.advance(1_000);
        assert_eq!(machine.poll(), None);

        machine.observe_domain(TemporalDomain::EMPTY);
        assert!(machine.state().is_none());
    }

    #[tokio::test]
    async fn player_requests_each_tick_window() {
        let transport = Arc::new(FakeTransport {
            domain: TemporalDomain::new(MIN, MIN + 6),
            ..FakeTransport::default()
        });
        let orchestrator = Arc::new(undebounced(transport.clone()));
        let clock = Arc::new(ManualClock::new(0));
        let mut player = Player::new(machine(&clock), orchestrator, hessdalen());

        player.set_viewport(hessdalen()).await.unwrap();
        assert!(player.machine_mut().toggle());

        let mut responses = 0;
        for _ in 0..5 {
            clock.advance(100);
            if player.advance().await.is_some() {
                responses += 1;
            }
        }

        assert_eq!(responses, 2);
        assert!(!player.machine().is_playing());

        let queries = transport.queries();
        assert_eq!(queries.len(), 3);
        assert!(!queries[0].contains("from_date"));
        assert!(queries[1].ends_with(&format!(
            "&from_date={}&to_date={}",
            MIN + 3 - 1,
            MIN + 3 + 1
        )));
    }

    #[tokio::test]
    async fn player_keeps_ticking_after_failure() {
        let transport = Arc::new(FakeTransport {
            domain: TemporalDomain::new(MIN, MIN + 9),
            ..FakeTransport::default()
        });
        let orchestrator = Arc::new(undebounced(transport.clone()));
        let clock = Arc::new(ManualClock::new(0));
        let mut player = Player::new(machine(&clock), orchestrator, hessdalen());

        player.set_viewport(hessdalen()).await.unwrap();
        player.machine_mut().toggle();
        transport
            .failures_left
            .store(1, std::sync::atomic::Ordering::SeqCst);

        clock.advance(100);
        assert!(player.advance().await.is_none());
        assert!(player.machine().is_playing());

        clock.advance(100);
        assert!(player.advance().await.is_some());
        assert_eq!(transport.queries().len(), 3);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let transport = Arc::new(FakeTransport::default());
        let orchestrator = Arc::new(undebounced(transport.clone()));
        let clock = Arc::new(ManualClock::new(0));
        let mut player = Player::new(machine(&clock), orchestrator, hessdalen());
        let (_commands, rx) = mpsc::channel(1);

        player
            .run(rx, tokio::time::sleep(Duration::from_millis(120)))
            .await;
        assert!(transport.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_applies_commands_while_playing() {
        let transport = Arc::new(FakeTransport {
            domain: TemporalDomain::new(MIN, MIN + 30),
            ..FakeTransport::default()
        });
        let orchestrator = Arc::new(undebounced(transport.clone()));
        let clock = Arc::new(ManualClock::new(0));
        let mut player = Player::new(machine(&clock), orchestrator, hessdalen());
        let (commands, rx) = mpsc::channel(4);

        let driver = async {
            commands
                .send(PlayerCommand::SetViewport(hessdalen()))
                .await
                .unwrap();
            commands.send(PlayerCommand::Toggle).await.unwrap();
            tokio::time::sleep(POLL_INTERVAL * 2).await;

            clock.advance(100);
            tokio::time::sleep(POLL_INTERVAL * 2).await;

            commands.send(PlayerCommand::Toggle).await.unwrap();
            tokio::time::sleep(POLL_INTERVAL * 2).await;

            clock.advance(1_000);
            tokio::time::sleep(POLL_INTERVAL * 2).await;
        };
        player.run(rx, driver).await;

        assert!(!player.machine().is_playing());
        assert_eq!(player.machine().state().unwrap().cursor, MIN + 3);
        assert_eq!(transport.queries().len(), 2);
    }
}
