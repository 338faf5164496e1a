//! Configuration of mock servers and loading of expectation fixture files.

pub mod error;
pub mod parser;
pub mod settings;

pub use error::ConfigError;
pub use settings::{ExpectationFixture, MockConfig};
