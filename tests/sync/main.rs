//! Tracker sync test suite.
//!
//! Exercises the outbox, the drain protocol, the notify sweep, task dispatch
//! and the FogBugz client against in-memory and in-process stand-ins. No
//! database is required.
//!
//! Run with: cargo test --test sync

mod mock_tracker_server;
mod stub_tracker;

mod test_dispatch;
mod test_drain;
mod test_fogbugz_client;
mod test_notify;
