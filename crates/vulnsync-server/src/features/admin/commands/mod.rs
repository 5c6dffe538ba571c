pub mod import_script;

pub use import_script::ImportScriptCommand;
