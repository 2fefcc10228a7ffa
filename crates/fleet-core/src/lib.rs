pub mod cloud;
pub mod config;
pub mod confirm;
pub mod ensure;
pub mod error;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod payload;
pub mod provision;
pub mod readiness;
pub mod remote;
pub mod request;
pub mod teardown;
pub mod template;
pub mod types;

pub use error::{CloudError, FleetError, Result};
