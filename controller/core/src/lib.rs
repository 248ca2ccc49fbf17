#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod error;
pub mod identity;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod store;

pub use self::{
    auth::ShortlinkClientAuth,
    client::{Client, RedirectClient, ShortlinkClient},
    error::{Error, Operation, Result},
    identity::{bearer_token, IdentityProvider, User},
    store::{set_controller_reference, NamespaceResolver, Object, ObjectStore, StaticNamespace},
};
