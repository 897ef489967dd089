pub mod config;
pub mod error;
pub mod fetch;
pub mod layers;
pub mod materialize;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod store;
pub mod target;
pub mod util;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
