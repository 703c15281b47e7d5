pub mod connection;
pub mod registry;
