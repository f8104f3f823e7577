pub mod discovery;
pub mod headers;
pub mod options;
