pub mod error;
pub mod io;
pub mod keypath;
pub mod launcher;
pub mod lock;
pub mod monitor;
pub mod paths;
pub mod prompts;
pub mod registry;
pub mod review;
pub mod runner;
pub mod settings;
pub mod state;
pub mod task;
pub mod workflow;

pub use error::{AgdtError, Result};
