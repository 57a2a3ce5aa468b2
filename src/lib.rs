//! Tideline: a two-party conversation synchronization engine.
//!
//! The core is the machinery that keeps conversations deduplicated, message
//! streams consistent between optimistic local sends and the authoritative
//! store, the inbox ordered by activity, and bot turn-taking sequenced.
//! Persistence and identity are collaborator boundaries behind [`store`] and
//! [`identity`].

pub mod api;
pub mod bot;
pub mod bus;
pub mod chat;
pub mod config;
pub mod directory;
pub mod entity;
pub mod error;
pub mod identity;
pub mod registry;
pub mod store;
pub mod stream;
pub mod view;
