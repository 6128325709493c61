//! Connection-management core of a line-protocol server.
//!
//! Every accepted TCP connection becomes an independent session whose parsed
//! messages funnel into one serialized dispatcher. The dispatcher forwards them
//! to a downstream processor and broadcasts the processor's responses back to
//! every connected client.
//!
//! - [`listener`] binds the endpoint and spawns a session per connection.
//! - [`session`] runs the per-connection read and write loops.
//! - [`dispatcher`] is the single task that owns the client table.
//! - [`registry`] is that table, plus the greeting sent to new clients.
//! - [`codec`] tokenises bytes into lines and lines into [`codec::Message`]s.
//! - [`connector`] holds the channels to the downstream processor.
//! - [`cli`] and [`config`] describe how a server instance is configured.

pub mod cli;
pub mod codec;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod listener;
pub mod registry;
pub mod session;
