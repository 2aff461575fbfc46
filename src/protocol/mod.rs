//! Signed service-request protocol.
//!
//! A [`ServiceRequest`] names a service and its parameters. Its token is a
//! [`Signature`] over the key-sorted parameter set, so changing any parameter
//! invalidates it. Requests travel either as a query string or base64url
//! encoded into path segments, and repeated parameter sets can be replaced by
//! short [`TokenRefs`] references.

mod error;
mod request;
mod signature;
mod switches;
mod token_ref;

pub use error::ProtocolError;
pub use request::{
    REF_PARAM, SALT_PARAM, SERVICE_PARAM, SIGNATURE_PARAM, SRC_PARAM, ServiceRequest, strip_stem,
};
pub use signature::{Identity, SIGNATURE_WIDTH, Signature};
pub use switches::{SWITCH_PARAM, Switches, cookie_value};
pub use token_ref::{REF_WIDTH, TokenRefs};
