pub mod callgraph;
pub mod filesystem;
pub mod parser;
pub mod pipeline;
pub mod symbols;
