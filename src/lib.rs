//! Workspace-level helpers for exercising the tray client end to end.

pub mod test_support;
