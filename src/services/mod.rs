// src/services/mod.rs
pub mod api_client;
pub mod auth_service;
pub mod ride_channel;
pub mod ride_service;
pub mod ride_view;
pub mod token_store;

#[cfg(test)]
pub(crate) mod testing;
