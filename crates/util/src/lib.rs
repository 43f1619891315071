//! Shared helpers for tests across the workspace.

pub mod port_allocator;
