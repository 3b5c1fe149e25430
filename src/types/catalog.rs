//! Catalog types: applications, transformers and datasets.
//!
//! The catalog is loaded by an external collaborator and is immutable for
//! the lifetime of a discovery run. Applications and transformers are
//! addressed by their index in catalog order, which is also the order in
//! which they are evaluated.

use serde::{Deserialize, Serialize};

use super::statement::Sample;

/// A boolean query and the input it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Boolean query evaluated against a node's sample.
    pub query: String,
    /// Identifier of the input port this descriptor constrains.
    #[serde(default)]
    pub applies_to: String,
}

impl Descriptor {
    /// Create a descriptor.
    pub fn new(query: impl Into<String>, applies_to: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            applies_to: applies_to.into(),
        }
    }
}

/// A capability requirement: satisfied iff all descriptor queries hold.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Feature {
    /// Feature IRI.
    #[serde(default)]
    pub iri: String,
    /// Descriptors, all of which must hold.
    pub descriptors: Vec<Descriptor>,
}

impl Feature {
    /// Feature with a single descriptor.
    pub fn single(iri: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            iri: iri.into(),
            descriptors: vec![Descriptor::new(query, "")],
        }
    }
}

/// A consumer of data whose features, when satisfied, end a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Application IRI.
    pub iri: String,
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
    /// Features, all of which must be satisfied.
    pub features: Vec<Feature>,
}

impl Application {
    /// Create an application.
    pub fn new(iri: impl Into<String>, title: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            iri: iri.into(),
            title: title.into(),
            features,
        }
    }
}

/// Template holding the rewrite query of a transformer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigurationTemplate {
    /// Rewrite query with delete/insert semantics.
    pub query: String,
}

/// A graph-rewrite step with applicability conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformer {
    /// Transformer IRI.
    pub iri: String,
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
    /// Features, all of which must be satisfied for the transformer to apply.
    pub features: Vec<Feature>,
    /// Input port identifiers.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Output port identifiers.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Rewrite query template.
    pub configuration_template: ConfigurationTemplate,
}

impl Transformer {
    /// Create a transformer with a rewrite query.
    pub fn new(
        iri: impl Into<String>,
        title: impl Into<String>,
        features: Vec<Feature>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            iri: iri.into(),
            title: title.into(),
            features,
            inputs: Vec::new(),
            outputs: Vec::new(),
            configuration_template: ConfigurationTemplate {
                query: query.into(),
            },
        }
    }

    /// The rewrite query.
    pub fn query(&self) -> &str {
        &self.configuration_template.query
    }
}

/// The data source a discovery run starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset IRI.
    pub iri: String,
    /// Human-readable title.
    #[serde(default)]
    pub title: String,
    /// Representative sample of the dataset.
    pub sample: Sample,
}

impl Dataset {
    /// Create a dataset.
    pub fn new(iri: impl Into<String>, title: impl Into<String>, sample: Sample) -> Self {
        Self {
            iri: iri.into(),
            title: title.into(),
            sample,
        }
    }
}

/// Index of an application in catalog order.
pub type ApplicationIndex = usize;

/// Index of a transformer in catalog order.
pub type TransformerIndex = usize;

/// Fixed application and transformer catalogs for one run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Applications in evaluation order.
    pub applications: Vec<Application>,
    /// Transformers in evaluation order.
    pub transformers: Vec<Transformer>,
}

impl Catalog {
    /// Create a catalog.
    pub fn new(applications: Vec<Application>, transformers: Vec<Transformer>) -> Self {
        Self {
            applications,
            transformers,
        }
    }

    /// Application at `index`.
    pub fn application(&self, index: ApplicationIndex) -> Option<&Application> {
        self.applications.get(index)
    }

    /// Transformer at `index`.
    pub fn transformer(&self, index: TransformerIndex) -> Option<&Transformer> {
        self.transformers.get(index)
    }

    /// Index of the application with the given IRI.
    pub fn application_index(&self, iri: &str) -> Option<ApplicationIndex> {
        self.applications.iter().position(|a| a.iri == iri)
    }

    /// Index of the transformer with the given IRI.
    pub fn transformer_index(&self, iri: &str) -> Option<TransformerIndex> {
        self.transformers.iter().position(|t| t.iri == iri)
    }

    /// Check if the catalog has nothing to evaluate.
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty() && self.transformers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        let catalog = Catalog::new(
            vec![Application::new("app:a", "A", vec![])],
            vec![
                Transformer::new("tr:x", "X", vec![], "x"),
                Transformer::new("tr:y", "Y", vec![], "y"),
            ],
        );

        assert_eq!(catalog.application_index("app:a"), Some(0));
        assert_eq!(catalog.transformer_index("tr:y"), Some(1));
        assert_eq!(catalog.transformer_index("tr:z"), None);
        assert_eq!(catalog.transformer(1).map(Transformer::query), Some("y"));
    }

    #[test]
    fn test_transformer_deserializes_with_defaults() {
        let json = r#"{
            "iri": "tr:x",
            "features": [{"descriptors": [{"query": "ask-x"}]}],
            "configuration_template": {"query": "rewrite-x"}
        }"#;
        let t: Transformer = serde_json::from_str(json).unwrap();
        assert_eq!(t.query(), "rewrite-x");
        assert!(t.inputs.is_empty());
        assert_eq!(t.features[0].descriptors[0].applies_to, "");
    }
}
