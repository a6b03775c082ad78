pub mod coap;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod domain;
pub mod gateway;
pub mod telemetry;
