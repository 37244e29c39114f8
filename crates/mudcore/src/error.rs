use mudproto::session::SessionId;
use thiserror::Error;

use crate::world::{AccountId, EntityId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("empty lock definition")]
    Empty,

    #[error("missing ':' in lock definition {0:?}")]
    MissingColon(String),

    #[error("invalid access type {0:?}")]
    BadAccessType(String),

    #[error("syntax error at offset {pos}: {msg}")]
    Syntax { pos: usize, msg: String },

    #[error("unknown lock function {0:?}")]
    UnknownFunc(String),

    #[error("unknown lock function module {0:?}")]
    UnknownModule(String),
}

/// Raised by a lock function; the evaluator logs it and treats the term as false.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{func}(): {msg}")]
pub struct FuncError {
    pub func: &'static str,
    pub msg: String,
}

impl FuncError {
    pub fn new(func: &'static str, msg: impl Into<String>) -> Self {
        Self {
            func,
            msg: msg.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("no such session {0}")]
    NoSession(SessionId),

    #[error("session {0} is not logged in")]
    NotLoggedIn(SessionId),

    #[error("no such account {0:?}")]
    NoAccount(AccountId),

    #[error("no such object {0}")]
    NoEntity(EntityId),

    #[error("{0} is already in use by someone else")]
    InUse(EntityId),

    #[error("not allowed to puppet {0}")]
    PuppetDenied(EntityId),

    #[error("account name {0:?} is taken")]
    NameTaken(String),

    #[error("invalid name {0:?}")]
    BadName(String),
}
