//! Core domain types for requests, responses, resources and watch events.

pub mod request;
pub mod resource;
pub mod response;
pub mod watch;
