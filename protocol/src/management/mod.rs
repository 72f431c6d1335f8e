pub mod backup;
pub mod server;
