//! Core types for the discovery kernel.

pub mod statement;
pub mod catalog;

pub use statement::{Term, Statement, Sample};
pub use catalog::{
    Application, ApplicationIndex, Catalog, ConfigurationTemplate, Dataset, Descriptor, Feature,
    Transformer, TransformerIndex,
};
