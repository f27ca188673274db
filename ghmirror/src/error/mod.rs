//! The process distinguishes three error kinds, matching `SPEC_FULL.md` §7:
//! [`init`] errors abort startup before a socket is bound, [`api`] (and
//! [`auth`]) errors are caught per-request and turned into HTTP responses,
//! and [`runtime`] errors end a background task and trigger shutdown.

pub mod api;
pub mod auth;
pub mod init;
pub mod runtime;
