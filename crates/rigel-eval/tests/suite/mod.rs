// Consolidated integration test suite. Every module runs against the mock
// JDWP server from `rigel-jdwp`; no real JVM is involved.
mod common;
mod context;
mod engine_protocol;
mod evaluation;
mod interpreter;
