// src/core/mod.rs

pub mod conditions;
pub mod config;
pub mod context;
pub mod enablement;
pub mod events;
pub mod export;
pub mod import;
pub mod manifest;
pub mod manifest_loader;
pub mod paths;
pub mod persistence;
pub mod plist_export;
pub mod profile;
pub mod settings;
pub mod value;
pub mod value_processor;

#[cfg(test)]
pub(crate) mod test_support;
