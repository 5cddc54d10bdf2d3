//! Request and response shapes of the invoicing endpoint.

pub mod invoicing;

pub use invoicing::*;
