//! Request identifiers carried in every packet header.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type of a packet. A request and its response share the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl RequestId {
    /// Uninitialised packet
    pub const NULL: RequestId = RequestId(0x00);

    pub const LOGIN: RequestId = RequestId(0x01);
    pub const LOGOUT: RequestId = RequestId(0x02);
    pub const SIGNUP: RequestId = RequestId(0x03);
    pub const FEEDBACK: RequestId = RequestId(0x04);

    pub const PLAYER_SET: RequestId = RequestId(0x10);
    pub const PLAYER_GET: RequestId = RequestId(0x11);
    pub const PLAYER_SET_FLAG: RequestId = RequestId(0x12);

    pub const GAME_INS: RequestId = RequestId(0x20);
    pub const GAME_REM: RequestId = RequestId(0x21);
    pub const GAME_LST: RequestId = RequestId(0x22);
    pub const GAME_INFO: RequestId = RequestId(0x23);
    pub const GAME_START: RequestId = RequestId(0x24);

    pub const CHAT_SENDMSG: RequestId = RequestId(0x30);
    pub const CHAT_GETMSG: RequestId = RequestId(0x31);
    pub const CHAT_IUNAI: RequestId = RequestId(0x32);
    pub const CHAT_JOIN: RequestId = RequestId(0x33);
    pub const CHAT_JOINS: RequestId = RequestId(0x34);
    pub const CHAT_QUITS: RequestId = RequestId(0x35);
    pub const CHAT_MOTTO_GET: RequestId = RequestId(0x36);
    pub const CHAT_MOTTO_SET: RequestId = RequestId(0x37);
    pub const CHAT_MOTTO_CHANGED: RequestId = RequestId(0x38);
    pub const CHAT_LIST: RequestId = RequestId(0x39);
    pub const CHAT_USER_GET: RequestId = RequestId(0x3A);
    pub const CHAT_PUBLICS: RequestId = RequestId(0x3B);
    pub const CHAT_KICK: RequestId = RequestId(0x3C);
    pub const CHAT_KICKED: RequestId = RequestId(0x3D);
    pub const CHAT_OP: RequestId = RequestId(0x3E);
    pub const CHAT_OPED: RequestId = RequestId(0x3F);
    pub const CHAT_DEOP: RequestId = RequestId(0x40);
    pub const CHAT_DEOPED: RequestId = RequestId(0x41);
    pub const CHAT_LIST_MY_CHANS: RequestId = RequestId(0x42);
    pub const CHAT_DESTROY_CHAN: RequestId = RequestId(0x43);

    /// Highest id a request may use
    pub const MAX: RequestId = RequestId(0x7F);

    /// Matches any packet when looking into the stash
    pub const NONE: RequestId = RequestId(0xFF);

    /// Whether this id may be sent as a request and awaited as a response.
    pub fn is_valid_request(self) -> bool {
        self != Self::NULL && self != Self::NONE && self <= Self::MAX
    }
}

impl From<u32> for RequestId {
    fn from(raw: u32) -> Self {
        RequestId(raw)
    }
}

impl From<RequestId> for u32 {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_not_requests() {
        assert!(!RequestId::NULL.is_valid_request());
        assert!(!RequestId::NONE.is_valid_request());
        assert!(!RequestId(RequestId::MAX.0 + 1).is_valid_request());
    }

    #[test]
    fn test_protocol_ids_are_requests() {
        for id in [
            RequestId::LOGIN,
            RequestId::LOGOUT,
            RequestId::CHAT_SENDMSG,
            RequestId::CHAT_DESTROY_CHAN,
            RequestId(7),
            RequestId::MAX,
        ] {
            assert!(id.is_valid_request(), "{} should be a valid request", id);
        }
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(RequestId::CHAT_USER_GET.to_string(), "0x3a");
        assert_eq!(RequestId(7).to_string(), "0x07");
    }
}
