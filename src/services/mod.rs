// Services module - provider API clients

pub mod tmdb;
pub mod youtube;

/// The provider answered, but has no such resource
#[derive(Debug, thiserror::Error)]
#[error("{0} not found")]
pub struct NotFound(pub String);
