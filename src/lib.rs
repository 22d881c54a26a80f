// Library exports for the PMP proxy gateway

pub mod auth;
pub mod cache;
pub mod clients;
pub mod config;
pub mod env_interpolation;
pub mod handler;
pub mod health;
pub mod middleware;
pub mod rewriter;
pub mod routes;
pub mod tracer;
