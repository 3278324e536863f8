//! # vesper-dev: in-process server test harness
//!
//! Integration tests across the workspace need a real `vesper-server`
//! listening on a real socket, not a mock of the event loop — commands
//! have to cross the actual RESP wire to catch framing bugs. This crate
//! binds one on an OS-assigned ephemeral port, runs its event loop on a
//! background thread, and tears it down on drop, so a test can write:
//!
//! ```no_run
//! # use vesper_dev::TestServer;
//! let server = TestServer::start(Default::default()).unwrap();
//! let mut client = server.connect().unwrap();
//! assert_eq!(client.command(&["SET", "foo", "bar"]).unwrap(), TestReply::Status("OK".into()));
//! # use vesper_dev::TestReply;
//! ```
//!
//! This is deliberately not a general-purpose client library (the CLI
//! client is out of this project's scope per spec §1) — `TestClient` only
//! implements enough of RESP to drive and assert on tests.

mod client;
mod harness;

pub use client::{TestClient, TestReply};
pub use harness::{DevError, TestServer};
