pub mod classify;
pub mod excel;
pub mod parser;
pub mod reference;
pub mod stats;
pub mod tam;
pub mod writer;
