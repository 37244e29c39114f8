//! Game-logic core: who is acting, what they may do, and which command runs.
//!
//! The server binary owns an [`engine::Engine`] and feeds it bridge requests;
//! everything the engine wants sent back to the portal accumulates in an
//! [`game::Outbox`] as `mudproto::bridge::ServerResp`s.

pub mod channel;
pub mod cmdset;
pub mod command;
pub mod continuation;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod game;
pub mod identity;
pub mod lock;
pub mod matcher;
pub mod perm;
pub mod sessions;
pub mod settings;
pub mod world;

#[cfg(test)]
pub(crate) mod testutil;
