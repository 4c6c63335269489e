//! Infrastructure layer: event store, command dispatch, read models,
//! projections.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;

#[cfg(test)]
mod integration_tests;
