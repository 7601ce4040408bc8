#![warn(rust_2018_idioms)]

pub mod client;
pub mod proto;
