//! Integration test helpers for wagate session scenarios.

pub mod harness;
