#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod controller;
pub mod github;
pub mod http;
pub mod store;

pub use self::args::Args;
