//! Testing infrastructure for shiftlint integration tests.
//!
//! This crate provides utilities for writing robust integration tests:
//! - `TestWorld`: Fluent interface for declarative test setup
//! - `providers`: Scripted and blocking fake providers
//! - `fixtures`: Sample source trees and rule documents

pub mod fixtures;
pub mod providers;
pub mod world;

pub use providers::{BlockingProvider, FakeProvider, ReleaseHandle};
pub use world::TestWorld;
