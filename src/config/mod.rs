#[cfg(feature = "cli")]
pub mod cli;
pub mod ini;
pub mod settings;

#[cfg(feature = "cli")]
pub use cli::CliArgs;
pub use ini::IniDocument;
pub use settings::Settings;
