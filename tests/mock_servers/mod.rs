#![allow(dead_code)]
//! Shared test doubles: a scriptable mock player speaking the db-server
//! protocol and in-memory fakes for the discovery and status collaborators.

pub mod collaborators;
pub mod dbserver;
