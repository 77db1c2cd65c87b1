//! Cross-module tests: synthetic sensor data through the detectors and the
//! ingest manager.

mod pipeline_tests;
