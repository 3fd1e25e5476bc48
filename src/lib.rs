pub mod app;
pub mod approval;
pub mod auth;
pub mod authz;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notification;
pub mod scheduler;
pub mod tenant;

#[cfg(test)]
pub mod testing;
