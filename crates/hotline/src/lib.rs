#![forbid(unsafe_code)]
//! Core library for a Hotline 1.x transaction-protocol server.
//!
//! This crate provides a tokio-based implementation of the Hotline server
//! wire protocol: the handshake, the length-prefixed transaction framing
//! with chunked reassembly, the access-control bitmap, login obfuscation,
//! the flattened-file-object format used over the file-transfer port, and
//! the threaded-news/flat-news/private-chat data models. A binary crate
//! supplies the durable backings (accounts, news, files, bans) behind the
//! [`store`] traits and drives [`conn::handle_connection`] from its own
//! accept loop.
//!
//! # Getting started
//!
//! A binary crate builds a [`state::AppState`] from its chosen store
//! implementations and a [`dispatch::Dispatcher`] from
//! [`handlers::default_dispatcher`], then hands each accepted socket to
//! [`conn::handle_connection`]:
//!
//! ```no_run
//! use hotline::config::ServerConfig;
//! use hotline::state::AppState;
//! use hotline::handlers::default_dispatcher;
//! use std::sync::Arc;
//!
//! # async fn run(
//! #     accounts: Arc<dyn hotline::store::AccountStore>,
//! #     threaded_news: Arc<dyn hotline::store::ThreadedNewsStore>,
//! #     flat_news: Arc<dyn hotline::store::FlatNewsStore>,
//! #     bans: Arc<dyn hotline::store::BanList>,
//! #     files: Arc<dyn hotline::store::FileStore>,
//! # ) -> hotline::Result<()> {
//! let state = Arc::new(AppState::new(ServerConfig::default(), accounts, threaded_news, flat_news, bans, files));
//! let dispatcher = Arc::new(default_dispatcher());
//! # let _ = (state, dispatcher);
//! # Ok(())
//! # }
//! ```
//!
//! # Error handling
//!
//! Fallible operations return [`error::Error`] via this crate's [`Result`]
//! alias. Handler errors become a single error-flagged reply to the sender
//! rather than closing the connection; only handshake and framing failures
//! are fatal to a connection.
//!
//! # Logging
//!
//! The crate logs through the `log` facade at module granularity (connection
//! lifecycle at `info`, frame/codec problems at `warn`); a binary crate picks
//! the sink (`env_logger` is what the bundled server binary uses).
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`).
pub mod access;
pub mod chat;
pub mod conn;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filewrapper;
pub mod handlers;
pub mod keepalive;
pub mod models;
pub mod news;
pub mod protocol;
pub mod ratelimit;
pub mod registry;
pub mod serialize;
pub mod shutdown;
pub mod state;
pub mod stats;
pub mod store;
pub mod transfer;
pub mod transfer_session;
#[macro_use]
pub mod utils;

pub use crate::error::Error;
pub use crate::error::errno;
pub use crate::utils::Result;
