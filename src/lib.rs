pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sandbox;
pub mod validator;

pub use error::{CodereelError, Result};
