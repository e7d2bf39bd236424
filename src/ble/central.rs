//! Central session controller - scan, filter, connect, negotiate, recover.
//!
//! ```text
//!            start()              match + stop_scan + connect
//!   Idle ─────────────▶ Scanning ───────────────────────────▶ Connecting
//!    ▲                   ▲  ▲                                     │
//!    │ scan rejected     │  │ connect failed / link lost          │ connected(ok)
//!    │                   │  └───────────────┐                     ▼
//!    └───────────────────┘                  └───────────────── Connected
//!                                                                 │ mtu done(ok)
//!                                                                 ▼
//!                                                               Ready
//! ```
//!
//! The controller is the single owner of the "default connection"
//! handle.  It takes the handle from `connect`, hands it back to the
//! stack exactly once through `release` when the link fails or goes
//! down, and ignores any event that names a handle it is not tracking.

use crate::ble::adv_parser::{extract_device_name, matches_target_name};
use crate::ble::{
    hci, Address, AdvType, CentralEvent, CentralStack, ConnHandle, ConnParams, ScanParams,
    SecurityLevel, SessionParameters,
};
use crate::config;
use crate::error::{Command, Error, StackError};

/// Lifecycle states of the central role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CentralState {
    Idle,
    Scanning,
    /// `connect` accepted, waiting for the `Connected` event.
    Connecting,
    /// Link up, MTU exchange in flight (or a disconnect was requested).
    Connected,
    /// Link up and parameters negotiated.
    Ready,
}

impl CentralState {
    /// States in which the controller holds a connection handle.
    pub const fn has_link(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Ready)
    }
}

/// What the central looks for and how it scans/connects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CentralConfig {
    pub target_name: &'static str,
    pub scan: ScanParams,
    pub conn: ConnParams,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            target_name: config::TARGET_DEVICE_NAME,
            scan: ScanParams::default(),
            conn: ConnParams::default(),
        }
    }
}

/// Drives one outbound connection at a time over a [`CentralStack`].
pub struct CentralController<S: CentralStack> {
    stack: S,
    config: CentralConfig,
    state: CentralState,
    conn: Option<ConnHandle>,
    peer: Option<Address>,
    params: SessionParameters,
    /// A disconnect for the tracked link has been issued by us.
    disconnect_requested: bool,
    /// `stop()` was called; the next link teardown ends in `Idle`.
    stopping: bool,
}

impl<S: CentralStack> CentralController<S> {
    pub fn new(stack: S, config: CentralConfig) -> Result<Self, Error> {
        if config.target_name.is_empty() {
            return Err(Error::EmptyTargetName);
        }
        Ok(Self {
            stack,
            config,
            state: CentralState::Idle,
            conn: None,
            peer: None,
            params: SessionParameters::unnegotiated(),
            disconnect_requested: false,
            stopping: false,
        })
    }

    pub fn state(&self) -> CentralState {
        self.state
    }

    /// Handle of the default connection, if any.
    pub fn connection(&self) -> Option<ConnHandle> {
        self.conn
    }

    pub fn peer(&self) -> Option<Address> {
        self.peer
    }

    pub fn session_parameters(&self) -> SessionParameters {
        self.params
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// Begin scanning for the target. Only valid from `Idle`.
    ///
    /// A rejected scan leaves the controller `Idle`; there is no retry.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != CentralState::Idle {
            warn!("central: start() ignored in {:?}", self.state);
            return Err(Error::InvalidState);
        }
        self.stopping = false;
        self.start_scan()
    }

    /// Tear the role down and end in `Idle`.
    ///
    /// While scanning this stops the scan directly.  With a link (pending
    /// or established) it requests a disconnect; the handle is released
    /// and `Idle` entered when the stack reports the teardown.
    pub fn stop(&mut self) -> Result<(), Error> {
        match self.state {
            CentralState::Idle => Ok(()),
            CentralState::Scanning => match self.stack.stop_scan() {
                Ok(()) => {
                    self.set_state(CentralState::Idle);
                    Ok(())
                }
                Err(e) => {
                    error!("central: stop LE scan failed (err {})", e.code);
                    Err(e.during(Command::StopScan))
                }
            },
            CentralState::Connecting | CentralState::Connected | CentralState::Ready => {
                self.stopping = true;
                match self.conn {
                    Some(conn) => {
                        self.request_disconnect(conn, hci::REMOTE_USER_TERMINATED_CONNECTION)
                    }
                    None => {
                        self.set_state(CentralState::Idle);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Single entry point for everything the stack reports.
    ///
    /// `Err` means a command issued while reacting was rejected; the
    /// controller has already applied its recovery policy by then.
    pub fn handle_event(&mut self, event: CentralEvent<'_>) -> Result<(), Error> {
        match event {
            CentralEvent::DeviceFound {
                addr,
                rssi,
                adv_type,
                data,
            } => self.on_device_found(addr, rssi, adv_type, data),
            CentralEvent::Connected { conn, status } => self.on_connected(conn, status),
            CentralEvent::Disconnected { conn, reason } => self.on_disconnected(conn, reason),
            CentralEvent::MtuExchanged { conn, status, mtu } => {
                self.on_mtu_exchanged(conn, status, mtu)
            }
            CentralEvent::SecurityChanged {
                conn,
                level,
                status,
            } => {
                self.on_security_changed(conn, level, status);
                Ok(())
            }
            CentralEvent::ScanStopped { cause } => self.on_scan_stopped(cause),
        }
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn on_device_found(
        &mut self,
        addr: Address,
        rssi: i8,
        adv_type: AdvType,
        data: &[u8],
    ) -> Result<(), Error> {
        // Matches arriving once a connect is in flight are not re-entered.
        if self.state != CentralState::Scanning {
            return Ok(());
        }
        if !matches_target_name(adv_type, data, self.config.target_name) {
            trace!("central: skip {:?} (RSSI {})", addr, rssi);
            return Ok(());
        }

        info!(
            "central: found {:?} '{}' (RSSI {}) ... connecting",
            addr,
            extract_device_name(data).as_str(),
            rssi
        );

        if let Err(e) = self.stack.stop_scan() {
            error!("central: stop LE scan failed (err {})", e.code);
            return Err(e.during(Command::StopScan));
        }

        match self.stack.connect(&addr, &self.config.conn) {
            Ok(conn) => {
                self.conn = Some(conn);
                self.peer = Some(addr);
                self.set_state(CentralState::Connecting);
                Ok(())
            }
            Err(e) => {
                error!("central: create conn failed (err {})", e.code);
                // Scan-start failure is logged inside; the connect error
                // is the one reported.
                let _ = self.start_scan();
                Err(e.during(Command::Connect))
            }
        }
    }

    fn on_connected(&mut self, conn: ConnHandle, status: u8) -> Result<(), Error> {
        if self.conn != Some(conn) || self.state != CentralState::Connecting {
            debug!("central: connected event for untracked {:?}", conn);
            return Ok(());
        }

        if status != hci::SUCCESS {
            error!("central: failed to connect to {:?} ({})", self.peer, status);
            self.release_link();
            return self.after_link_down();
        }

        info!("central: connected {:?}", self.peer);
        self.set_state(CentralState::Connected);

        if self.stopping {
            if self.disconnect_requested {
                return Ok(());
            }
            return self.request_disconnect(conn, hci::REMOTE_USER_TERMINATED_CONNECTION);
        }

        if let Err(e) = self.stack.exchange_mtu(conn) {
            error!("central: MTU exchange failed (err {})", e.code);
            let _ = self.request_disconnect(conn, hci::UNACCEPTABLE_CONN_PARAMS);
            return Err(e.during(Command::ExchangeMtu));
        }
        Ok(())
    }

    fn on_mtu_exchanged(&mut self, conn: ConnHandle, status: u8, mtu: u16) -> Result<(), Error> {
        if self.conn != Some(conn) || self.state != CentralState::Connected {
            debug!("central: MTU result for untracked {:?}", conn);
            return Ok(());
        }
        if self.disconnect_requested {
            debug!("central: MTU result while disconnecting, ignored");
            return Ok(());
        }

        if status != hci::SUCCESS {
            error!("central: BT error while mtu exchange: {}", status);
            return self.request_disconnect(conn, hci::UNACCEPTABLE_CONN_PARAMS);
        }

        info!("central: MTU exchange done ({})", mtu);
        self.params.att_mtu = Some(mtu);
        self.set_state(CentralState::Ready);
        Ok(())
    }

    fn on_disconnected(&mut self, conn: ConnHandle, reason: u8) -> Result<(), Error> {
        info!("central: disconnected {:?} (reason {})", conn, reason);

        if self.conn != Some(conn) {
            debug!("central: stale disconnect for {:?}", conn);
            return Ok(());
        }

        self.release_link();
        self.after_link_down()
    }

    fn on_security_changed(&mut self, conn: ConnHandle, level: SecurityLevel, status: u8) {
        if self.conn != Some(conn) {
            return;
        }
        if status != 0 {
            error!("central: security_changed err: {}", status);
            return;
        }
        info!("central: security level set to {:?}", level);
        self.params.security = Some(level);
    }

    fn on_scan_stopped(&mut self, cause: StackError) -> Result<(), Error> {
        if self.state != CentralState::Scanning {
            debug!("central: scan end reported in {:?}, ignored", self.state);
            return Ok(());
        }
        // Treated like a scan that never started: no automatic retry.
        error!("central: scanning stopped by the stack (err {})", cause.code);
        self.set_state(CentralState::Idle);
        Err(cause.during(Command::StartScan))
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn start_scan(&mut self) -> Result<(), Error> {
        match self.stack.start_scan(&self.config.scan) {
            Ok(()) => {
                info!("central: scanning for '{}'", self.config.target_name);
                self.set_state(CentralState::Scanning);
                Ok(())
            }
            Err(e) => {
                error!("central: scanning failed to start (err {})", e.code);
                self.set_state(CentralState::Idle);
                Err(e.during(Command::StartScan))
            }
        }
    }

    /// Only an accepted disconnect is remembered, so a rejected one is
    /// tried again on the next event for the link.
    fn request_disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), Error> {
        match self.stack.disconnect(conn, reason) {
            Ok(()) => {
                self.disconnect_requested = true;
                Ok(())
            }
            Err(e) => {
                error!("central: disconnect failed (err {})", e.code);
                Err(e.during(Command::Disconnect))
            }
        }
    }

    /// Give the tracked handle back to the stack and forget the session.
    fn release_link(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.stack.release(conn);
        }
        self.peer = None;
        self.params = SessionParameters::unnegotiated();
        self.disconnect_requested = false;
    }

    fn after_link_down(&mut self) -> Result<(), Error> {
        if self.stopping {
            self.stopping = false;
            self.set_state(CentralState::Idle);
            return Ok(());
        }
        self.start_scan()
    }

    fn set_state(&mut self, next: CentralState) {
        if self.state != next {
            info!("central: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        debug_assert_eq!(self.conn.is_some(), self.state.has_link());
    }
}
