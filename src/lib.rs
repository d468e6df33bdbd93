pub mod apt;
pub mod category;
pub mod commands;
pub mod config;
pub mod engine;
pub mod history;
pub mod http;
pub mod keystore;
pub mod plugin;
pub mod repository;
pub mod runtime;
pub mod source;
