// SQL script parsing: statement splitting, classification and exclusion
pub mod classifier;
pub mod filter;
pub mod tokenizer;


pub use classifier::classify;
pub use filter::{excludes, normalize, should_skip_statement};
pub use tokenizer::parse;
