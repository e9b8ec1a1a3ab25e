//! PDT server library.
//!
//! Tracks the rollout of migrations and deployments across instances and
//! keeps the issue tracker informed through a transactional outbox.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod middleware;
pub mod migration;
pub mod models;
pub mod services;
