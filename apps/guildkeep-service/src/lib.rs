#![forbid(unsafe_code)]

mod service;

pub use service::*;
