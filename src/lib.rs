pub mod blockchain;
pub mod cli;
pub mod config;
pub mod network;
