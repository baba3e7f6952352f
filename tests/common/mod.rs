#![allow(dead_code)]

pub use cycleflow_test_utils::init_tracing;
