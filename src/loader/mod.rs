pub mod parser;
pub mod properties;
