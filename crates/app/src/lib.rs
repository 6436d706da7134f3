pub mod settings;
pub mod shell;
