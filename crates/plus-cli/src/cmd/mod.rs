pub mod config;
pub mod cycle;
pub mod init;
