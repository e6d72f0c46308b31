//! Wire protocol definitions for client-daemon communication
//!
//! Every exchange is framed as `{ code: u32, length: u32, payload: u8[length] }`,
//! all little-endian. A request carries one of the [`request`] codes; the reply
//! arrives as zero or more `MORE_DATA` messages terminated by a final `OK`
//! message, or as a single error-code message whose payload is still
//! length-known and must be drained.

pub mod codec;
pub(crate) mod stream;

use crate::error::Error;

/// Request codes, in protocol order
pub mod request {
    pub const GET_PIPE_VERSION: u32 = 0;
    pub const GET_MAJOR_VERSION: u32 = 1;
    pub const GET_MINOR_VERSION: u32 = 2;
    pub const GET_REVISION: u32 = 3;
    pub const GET_BUILD: u32 = 4;
    pub const FIND_PROPERTY_FROM_NAME: u32 = 5;
    pub const GET_PROPERTY_NAME: u32 = 6;
    pub const GET_PROPERTY_TYPE: u32 = 7;
    pub const SEARCH: u32 = 8;
    pub const SORT: u32 = 9;
    pub const GET_RESULTS: u32 = 10;
    pub const IS_DB_LOADED: u32 = 11;
    pub const IS_PROPERTY_INDEXED: u32 = 12;
    pub const IS_PROPERTY_FAST_SORT: u32 = 13;
    pub const IS_RESULT_CHANGE: u32 = 14;
    pub const WAIT_FOR_RESULT_CHANGE: u32 = 15;
    pub const GET_RUN_COUNT: u32 = 16;
    pub const SET_RUN_COUNT: u32 = 17;
    pub const INC_RUN_COUNT: u32 = 18;
    pub const GET_FOLDER_SIZE: u32 = 19;
    pub const GET_FILE_ATTRIBUTES: u32 = 20;
    pub const GET_FILE_ATTRIBUTES_EX: u32 = 21;
    pub const GET_FIND_FIRST_FILE: u32 = 22;
    pub const GET_JOURNAL_INFO: u32 = 23;
    pub const READ_JOURNAL: u32 = 24;
}

/// Response codes
pub mod response {
    /// Another message in this reply follows
    pub const MORE_DATA: u32 = 100;
    /// Final message of the reply
    pub const OK: u32 = 200;
    pub const BAD_REQUEST: u32 = 400;
    pub const CANCELLED: u32 = 401;
    pub const NOT_FOUND: u32 = 404;
    pub const OUT_OF_MEMORY: u32 = 500;
    pub const INVALID_COMMAND: u32 = 501;
}

/// Byte length of a framed message header
pub const HEADER_LEN: usize = 8;

/// Capability word bit: size fields in this reply are 64-bit ("wide mode")
pub const CAP_WIDE_SIZES: u32 = 1 << 0;

/// Sentinel for "size unknown / not requested" in wide size fields
pub const SIZE_UNKNOWN: u64 = u64::MAX;

/// Sentinel for "size unknown" in narrow (32-bit) size fields
pub const SIZE_UNKNOWN_NARROW: u32 = u32::MAX;

/// Message header: response/request code plus payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub code: u32,
    pub length: u32,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.code.to_le_bytes());
        out[4..].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Self {
        Self {
            code: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// True for the two success codes that carry reply payload
    pub fn is_ok(&self) -> bool {
        self.code == response::MORE_DATA || self.code == response::OK
    }

    /// Map a non-ok response code to its error kind
    pub fn to_error(&self) -> Error {
        match self.code {
            response::BAD_REQUEST => Error::BadRequest,
            response::CANCELLED => Error::Cancelled,
            response::NOT_FOUND => Error::NotFound,
            response::OUT_OF_MEMORY => Error::OutOfMemory,
            response::INVALID_COMMAND => Error::InvalidCommand,
            code => Error::Server(code),
        }
    }
}
