//! Soundprint command line tools

pub mod output;
