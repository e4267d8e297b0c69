// ABOUTME: Wired-in engine backends.
// ABOUTME: Each module owns its stream translator, resume syntax, and runner.

pub mod claude;
pub mod codex;
