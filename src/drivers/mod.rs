//! Built-in drivers. The folder pair makes migrations runnable end-to-end
//! without any VCS; richer drivers live outside this crate behind the same
//! capability traits.

pub mod folder;
