#![allow(dead_code)]

pub mod mock_provider;

pub use mock_provider::{MockBehavior, MockProvider};
