pub mod fixtures;

pub use fixtures::{connect, connect_with, demo_api, init_test_logging};
