// src/models/mod.rs
pub mod driver;
pub mod messages;
pub mod metrics;
pub mod request;

pub use driver::*;
pub use messages::*;
pub use metrics::*;
pub use request::*;
