//! Support code for the `streamkit` binary.

pub mod editor;
pub mod input;
pub mod logging;
pub mod output;
pub mod tables;
