// Consolidated integration test harness.
//
// Each `tests/*.rs` file becomes a separate Cargo integration test binary,
// so this crate uses a single harness file that `mod`s the rest of the suite.
mod suite;
