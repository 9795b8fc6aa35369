pub mod fixture_library;
pub mod fixture_workspace;
