//! Unified error type for blelink.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging.

/// Stack command that can be rejected synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    StartScan,
    StopScan,
    Connect,
    ExchangeMtu,
    Disconnect,
    StartAdvertising,
    StopAdvertising,
    Notify,
}

/// Raw non-zero status returned by the BLE stack for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StackError {
    pub code: i32,
}

impl StackError {
    /// Command queue towards the stack is full (`-EBUSY`).
    pub const BUSY: Self = Self { code: -16 };
    /// Stack is not in a state that accepts the command (`-EALREADY`).
    pub const INVALID_STATE: Self = Self { code: -114 };
    /// The referenced connection no longer exists (`-ENOTCONN`).
    pub const NOT_CONNECTED: Self = Self { code: -128 };
    /// No free connection slot for a new link (`-ENOMEM`).
    pub const NO_RESOURCES: Self = Self { code: -12 };
    /// A long-running procedure ran out of time (`-ETIMEDOUT`).
    pub const TIMEOUT: Self = Self { code: -110 };

    pub const fn new(code: i32) -> Self {
        Self { code }
    }

    /// Attach the rejected command to form a top-level [`Error`].
    pub const fn during(self, op: Command) -> Error {
        Error::Stack { op, cause: self }
    }
}

/// Top-level error type used across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The stack rejected a command before doing anything.
    Stack { op: Command, cause: StackError },

    /// The operation is not valid in the controller's current state.
    InvalidState,

    /// The central was configured with an empty target name, so it
    /// could never match anything.
    EmptyTargetName,

    /// Advertisement data does not fit a legacy advertising PDU.
    AdvPayloadOverflow,
}

impl Error {
    /// The rejected command, if this error came from the stack.
    pub fn command(&self) -> Option<Command> {
        match self {
            Error::Stack { op, .. } => Some(*op),
            _ => None,
        }
    }
}
