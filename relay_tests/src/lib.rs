//! Integration test crate for the relay workspace; see `tests/` for scenarios.
