//! Seaquel CLI library
//!
//! Command-line front-end over `seaquel-builder`: render saved canvases,
//! read SQL files into models, check lesson challenges and list template
//! placeholders.

pub mod cli;
pub mod commands;
pub mod config;
