//! A3S Copy CLI - resolve and apply COPY/ADD steps from the command line.

pub mod commands;
pub mod output;
