//! Machine control HTTP transport.
//!
//! Every request, whatever its path or method, lands in the
//! [`dispatch`](dispatch::dispatch) function, which asks the engine's
//! execution context for a handler and drives it through the REST protocol:
//! - CORS preflight short-circuit
//! - raw body vs. form input negotiation
//! - form field binding
//! - handler invocation and response writing
//!
//! Failures never escape a request; they are logged on the network
//! subsystem and turned into a `500`.

pub mod dispatch;
pub mod error;
pub mod form;
pub mod server;

pub use dispatch::dispatch;
pub use error::{DispatchError, FormError, TransportError};
pub use form::{FormData, MAX_FORM_MEMORY};
pub use server::{RestServer, TransportConfig, rest_router};
