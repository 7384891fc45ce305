//! The connection lifecycle shared by all printer output devices.

use parse_display::Display;

/// Connection lifecycle of a printer output device.
///
/// A device starts out [ConnectionState::Closed] and may re-enter that
/// state any number of times; reconnecting always goes back through
/// `Closed` first.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[display(style = "lowercase")]
pub enum ConnectionState {
    /// No transport is open.
    #[default]
    Closed,

    /// A transport open is in flight.
    Connecting,

    /// The transport handshake succeeded; the device is ready for work.
    Connected,

    /// A write or flash operation is in progress.
    Busy,

    /// The transport reported an unrecoverable I/O fault.
    Error,
}

impl ConnectionState {
    /// Whether a device may move from `self` to `next`.
    ///
    /// Closing is legal from every state, as is re-reporting the current
    /// state. Everything else follows the lifecycle
    /// closed -> connecting -> connected <-> busy, with error reachable
    /// from any open state.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Closed || next == self {
            return true;
        }

        matches!(
            (self, next),
            (Closed, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Busy)
                | (Connected, Error)
                | (Busy, Connected)
                | (Busy, Error)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(Closed.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Connected.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Connected));
        assert!(Busy.can_transition_to(Error));
    }

    #[test]
    fn test_close_is_always_legal() {
        for state in [Closed, Connecting, Connected, Busy, Error] {
            assert!(state.can_transition_to(Closed));
        }
    }

    #[test]
    fn test_re_reporting_current_state_is_legal() {
        for state in [Closed, Connecting, Connected, Busy, Error] {
            assert!(state.can_transition_to(state));
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert!(!Closed.can_transition_to(Connected));
        assert!(!Closed.can_transition_to(Busy));
        assert!(!Closed.can_transition_to(Error));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Busy.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Connected));
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(Connecting.to_string(), "connecting");
        assert_eq!(Busy.to_string(), "busy");
    }
}
