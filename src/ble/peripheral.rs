//! Peripheral session controller - advertise, accept, notify, recover.
//!
//! ```text
//!          enable()                 connected(ok)
//!   Idle ───────────▶ Advertising ───────────────▶ Connected ──┐ tick:
//!    ▲                    ▲                            │       │ heart rate +
//!    │ re-advertise       │ disconnected               │       │ battery level
//!    │ rejected           └────────────────────────────┘ ◀─────┘
//! ```
//!
//! While connected a notification cycle runs on the [`Scheduler`]; the
//! pending tick is cancelled before the link's handle is released so no
//! reading is ever pushed on a closed connection.

use embassy_time::Duration;

use crate::ble::adv_parser::{AdvPayload, FLAG_LE_GENERAL, FLAG_NO_BREDR};
use crate::ble::{
    hci, AdvParams, ConnHandle, LinkPhy, PeripheralEvent, PeripheralStack, Scheduler, SensorSink,
    TimerToken,
};
use crate::config;
use crate::error::{Command, Error, StackError};
use crate::sim::{next_battery_level, HeartRateSim};

/// Lifecycle states of the peripheral role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeripheralState {
    Idle,
    Advertising,
    Connected,
}

/// How the notification cycle is kept alive between ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifySchedule {
    /// One repeating task for the whole connection.
    Repeating,
    /// A one-shot task re-armed after every firing.
    Rearm,
}

/// Everything that distinguishes one peripheral build from another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralProfile {
    pub payload: AdvPayload,
    pub adv: AdvParams,
    pub notify_interval: Duration,
    pub notify_schedule: NotifySchedule,
    pub heart_rate_lower: u8,
}

impl PeripheralProfile {
    /// Heart-rate sensor on the 1M PHY: flags + name, slow advertising.
    pub fn heart_rate() -> Result<Self, Error> {
        let payload = AdvPayload::new()
            .with_flags(FLAG_LE_GENERAL | FLAG_NO_BREDR)?
            .with_complete_name(config::PERIPHERAL_DEVICE_NAME)?;
        Ok(Self {
            payload,
            adv: AdvParams {
                connectable: true,
                interval_min: config::ADV_INTERVAL_MIN,
                interval_max: config::ADV_INTERVAL_MAX,
            },
            notify_interval: Duration::from_millis(config::NOTIFY_INTERVAL_MS),
            notify_schedule: NotifySchedule::Repeating,
            heart_rate_lower: config::HEART_RATE_LOWER_STANDARD,
        })
    }

    /// Heart-rate sensor over LE Coded PHY: advertises its services too.
    pub fn heart_rate_coded() -> Result<Self, Error> {
        let payload = AdvPayload::new()
            .with_flags(FLAG_LE_GENERAL | FLAG_NO_BREDR)?
            .with_uuid16_list(&[
                config::UUID16_HEART_RATE_SERVICE,
                config::UUID16_BATTERY_SERVICE,
                config::UUID16_DEVICE_INFORMATION_SERVICE,
            ])?
            .with_complete_name(config::PERIPHERAL_DEVICE_NAME)?;
        Ok(Self {
            payload,
            adv: AdvParams {
                connectable: true,
                interval_min: config::ADV_FAST_INTERVAL_MIN_2,
                interval_max: config::ADV_FAST_INTERVAL_MAX_2,
            },
            notify_interval: Duration::from_millis(config::NOTIFY_INTERVAL_MS),
            notify_schedule: NotifySchedule::Rearm,
            heart_rate_lower: config::HEART_RATE_LOWER_CODED,
        })
    }
}

/// Drives a single-link peripheral over a [`PeripheralStack`].
pub struct PeripheralController<S, T, N>
where
    S: PeripheralStack,
    T: Scheduler,
    N: SensorSink,
{
    stack: S,
    timers: T,
    sink: N,
    profile: PeripheralProfile,
    state: PeripheralState,
    conn: Option<ConnHandle>,
    phy: Option<LinkPhy>,
    notify_timer: Option<TimerToken>,
    heart_rate: HeartRateSim,
    /// `disable()` was called with a link up; teardown ends in `Idle`.
    stopping: bool,
}

impl<S, T, N> PeripheralController<S, T, N>
where
    S: PeripheralStack,
    T: Scheduler,
    N: SensorSink,
{
    pub fn new(stack: S, timers: T, sink: N, profile: PeripheralProfile) -> Self {
        let heart_rate = HeartRateSim::new(profile.heart_rate_lower);
        Self {
            stack,
            timers,
            sink,
            profile,
            state: PeripheralState::Idle,
            conn: None,
            phy: None,
            notify_timer: None,
            heart_rate,
            stopping: false,
        }
    }

    pub fn state(&self) -> PeripheralState {
        self.state
    }

    pub fn connection(&self) -> Option<ConnHandle> {
        self.conn
    }

    pub fn link_phy(&self) -> Option<LinkPhy> {
        self.phy
    }

    /// Whether a notification tick is currently pending.
    pub fn is_notifying(&self) -> bool {
        self.notify_timer.is_some()
    }

    pub fn heart_rate(&self) -> u8 {
        self.heart_rate.value()
    }

    pub fn profile(&self) -> &PeripheralProfile {
        &self.profile
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    /// Event loops that drive the scheduler themselves need it mutably.
    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut N {
        &mut self.sink
    }

    /// Start advertising. Only valid from `Idle`.
    ///
    /// A rejected start leaves the controller `Idle`; retrying is up to
    /// the caller since this is usually a configuration problem.
    pub fn enable(&mut self) -> Result<(), Error> {
        if self.state != PeripheralState::Idle {
            warn!("peripheral: enable() ignored in {:?}", self.state);
            return Err(Error::InvalidState);
        }
        self.stopping = false;
        self.start_advertising()
    }

    /// Stop the role and return to `Idle`.
    ///
    /// The pending notification tick is cancelled before anything else.
    /// With a link up, `Idle` is entered once the disconnect is reported.
    pub fn disable(&mut self) -> Result<(), Error> {
        self.stop_notifying();

        match self.state {
            PeripheralState::Idle => Ok(()),
            PeripheralState::Advertising => match self.stack.stop_advertising() {
                Ok(()) => {
                    self.set_state(PeripheralState::Idle);
                    Ok(())
                }
                Err(e) => {
                    error!("peripheral: stop advertising failed (err {})", e.code);
                    Err(e.during(Command::StopAdvertising))
                }
            },
            PeripheralState::Connected => {
                self.stopping = true;
                let Some(conn) = self.conn else {
                    self.set_state(PeripheralState::Idle);
                    return Ok(());
                };
                self.stack
                    .disconnect(conn, hci::REMOTE_USER_TERMINATED_CONNECTION)
                    .map_err(|e| {
                        error!("peripheral: disconnect failed (err {})", e.code);
                        e.during(Command::Disconnect)
                    })
            }
        }
    }

    /// Single entry point for stack callbacks and timer firings.
    pub fn handle_event(&mut self, event: PeripheralEvent) -> Result<(), Error> {
        match event {
            PeripheralEvent::Connected { conn, status, phy } => {
                self.on_connected(conn, status, phy)
            }
            PeripheralEvent::Disconnected { conn, reason } => self.on_disconnected(conn, reason),
            PeripheralEvent::PairingCancelled { conn } => {
                error!("peripheral: pairing cancelled on {:?}", conn);
                Ok(())
            }
            PeripheralEvent::AdvertisingStopped { cause } => self.on_advertising_stopped(cause),
            PeripheralEvent::Timer(token) => self.on_timer(token),
        }
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn on_connected(
        &mut self,
        conn: ConnHandle,
        status: u8,
        phy: Option<LinkPhy>,
    ) -> Result<(), Error> {
        if status != hci::SUCCESS {
            // Advertising was never stopped, nothing to restart.
            error!("peripheral: connection failed (err {})", status);
            return Ok(());
        }

        if self.conn == Some(conn) {
            debug!("peripheral: repeated connect for {:?}", conn);
            return Ok(());
        }

        if self.state != PeripheralState::Advertising {
            // Single-link role: turn away anything beyond the first link.
            warn!("peripheral: extra link {:?} in {:?}, dropping", conn, self.state);
            let rejected = self
                .stack
                .disconnect(conn, hci::REMOTE_USER_TERMINATED_CONNECTION);
            self.stack.release(conn);
            return rejected.map_err(|e| e.during(Command::Disconnect));
        }

        match phy {
            Some(p) => info!(
                "peripheral: connected {:?}, tx_phy {:?}, rx_phy {:?}",
                conn,
                p.tx,
                p.rx
            ),
            None => info!("peripheral: connected {:?}", conn),
        }

        self.conn = Some(conn);
        self.phy = phy;
        self.heart_rate.reset();
        self.set_state(PeripheralState::Connected);
        self.start_notifying();
        Ok(())
    }

    fn on_disconnected(&mut self, conn: ConnHandle, reason: u8) -> Result<(), Error> {
        if self.conn != Some(conn) {
            debug!("peripheral: stale disconnect for {:?}", conn);
            return Ok(());
        }

        info!("peripheral: disconnected (reason {})", reason);
        self.stop_notifying();
        self.stack.release(conn);
        self.conn = None;
        self.phy = None;

        if self.stopping {
            self.stopping = false;
            self.set_state(PeripheralState::Idle);
            return Ok(());
        }

        // Advertising stops implicitly on an incoming connection.
        self.start_advertising()
    }

    fn on_advertising_stopped(&mut self, cause: StackError) -> Result<(), Error> {
        if self.state != PeripheralState::Advertising {
            debug!("peripheral: advertising end reported in {:?}, ignored", self.state);
            return Ok(());
        }
        error!("peripheral: advertising stopped by the stack (err {})", cause.code);
        self.set_state(PeripheralState::Idle);
        Err(cause.during(Command::StartAdvertising))
    }

    fn on_timer(&mut self, token: TimerToken) -> Result<(), Error> {
        if self.notify_timer != Some(token) {
            trace!("peripheral: stale timer {:?}", token);
            return Ok(());
        }
        let Some(conn) = self.conn else {
            self.notify_timer = None;
            return Ok(());
        };

        if self.profile.notify_schedule == NotifySchedule::Rearm {
            self.notify_timer = Some(self.timers.schedule_once(self.profile.notify_interval));
        }

        let bpm = self.heart_rate.advance();
        let notified = self.sink.notify_heart_rate(conn, bpm);

        let level = next_battery_level(self.sink.battery_level());
        self.sink.set_battery_level(level);
        trace!("peripheral: tick hr={} battery={}", bpm, level);

        notified.map_err(|e| {
            debug!("peripheral: heart rate notify failed (err {})", e.code);
            e.during(Command::Notify)
        })
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn start_advertising(&mut self) -> Result<(), Error> {
        match self
            .stack
            .start_advertising(&self.profile.payload, &self.profile.adv)
        {
            Ok(()) => {
                info!("peripheral: advertising successfully started");
                self.set_state(PeripheralState::Advertising);
                Ok(())
            }
            Err(e) => {
                error!("peripheral: advertising failed to start (err {})", e.code);
                self.set_state(PeripheralState::Idle);
                Err(e.during(Command::StartAdvertising))
            }
        }
    }

    fn start_notifying(&mut self) {
        let interval = self.profile.notify_interval;
        let token = match self.profile.notify_schedule {
            NotifySchedule::Repeating => self.timers.schedule_repeating(interval),
            NotifySchedule::Rearm => self.timers.schedule_once(interval),
        };
        self.notify_timer = Some(token);
    }

    fn stop_notifying(&mut self) {
        if let Some(token) = self.notify_timer.take() {
            self.timers.cancel(token);
        }
    }

    fn set_state(&mut self, next: PeripheralState) {
        if self.state != next {
            info!("peripheral: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        debug_assert_eq!(self.conn.is_some(), self.state == PeripheralState::Connected);
    }
}
