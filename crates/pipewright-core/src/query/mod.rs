pub mod analyzer;
pub mod cycles;
pub mod unused;
