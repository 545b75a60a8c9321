pub mod client;
pub mod config;
pub mod connect_handler;
pub mod data_reader;
pub mod log_format;
pub mod metrics;
pub mod nav_server;
pub mod replay;
pub mod simconnect;
