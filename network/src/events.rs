use stage_core::LinkId;

use crate::protocol::{DecodeError, WireMessage};

/// Events emitted by link supervisors to the router.
#[derive(Debug)]
pub enum LinkEvent {
    /// The link completed a handshake and is ready to carry traffic.
    Up {
        /// ID of the link that came up
        link: LinkId,
    },

    /// The link lost its connection and entered reconnection.
    Down {
        /// ID of the link that went down
        link: LinkId,
        /// Why the link was torn down
        reason: String,
    },

    /// A decoded message arrived on the link.
    Inbound {
        /// ID of the link the message arrived on
        link: LinkId,
        /// The decoded message
        message: WireMessage,
    },

    /// A frame arrived that could not be decoded. The router answers these
    /// with a structured error reply; the link itself stays up.
    Malformed {
        /// ID of the link the frame arrived on
        link: LinkId,
        /// What went wrong during decoding
        error: DecodeError,
    },
}
