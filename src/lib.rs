// Library for tests to access modules

pub mod client;
pub mod config;
pub mod host_info;
pub mod kernel;
pub mod models;
pub mod routes;
pub mod sampler;
pub mod state_store;
pub mod supervisor;
pub mod version;
pub mod workspace;
