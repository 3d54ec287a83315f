// src/cli/handlers/mod.rs

// One module per command.

pub mod commons;
pub mod enable;
pub mod export;
pub mod import;
pub mod inspect;
pub mod new;
pub mod plists;
pub mod set;
