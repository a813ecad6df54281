//! GaussDB instances.
//!
//! `opengauss` and `gaussdb` (GaussDB for MySQL) share the asynchronous job API in [job].

pub mod job;
pub mod mysql_instance;
pub mod opengauss_instance;

pub use mysql_instance::{MySqlInstance, MySqlInstanceConfig, MySqlInstanceState, MySqlWaits};
pub use opengauss_instance::{
    OpenGaussInstance, OpenGaussInstanceConfig, OpenGaussInstanceState, OpenGaussWaits,
};

/// Service name of the GaussDB for openGauss endpoint.
pub const OPENGAUSS_SERVICE: &str = "opengauss";
/// Service name of the GaussDB for MySQL endpoint.
pub const MYSQL_SERVICE: &str = "gaussdb";
