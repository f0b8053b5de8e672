//! Session credential management.
//!
//! The remote service authenticates with a browser session cookie that
//! expires within about an hour, shorter than a single large transfer can
//! take. This module holds the live credential ([`CredentialStore`]) and
//! parses replacement credentials out of pasted cURL commands ([`curl`]).

mod credential;
pub mod curl;

pub use credential::CredentialStore;
