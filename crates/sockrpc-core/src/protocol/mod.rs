//! Protocol module containing the JSON payload codec.

pub mod payload;

pub use payload::{
    decode_headers, decode_request, encode_response, ConnectionHeaders, PayloadError,
    RequestPayload, ResponsePayload,
};
