use crate::error::{self, Result};
use serde::Serialize;
use snafu::ResultExt;

const DOCUMENT_SEPARATOR: &str = "---\n";

/// An ordered collection of kubernetes objects that are applied together with a single
/// `kubectl apply -f -`.
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    documents: Vec<serde_yaml::Value>,
}

impl ManifestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `object`. Objects are applied in insertion order, so namespaces, config maps and
    /// secrets should be pushed before the deployments that use them.
    pub fn push<T: Serialize>(&mut self, object: &T) -> Result<()> {
        let value = serde_yaml::to_value(object).context(error::SerdeYamlSnafu {
            action: "serialize manifest object",
        })?;
        self.documents.push(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Renders the set as a multi-document YAML stream.
    pub fn render(&self) -> Result<String> {
        render_documents(&self.documents)
    }
}

/// Renders each object as its own YAML document, separated by `---`.
pub fn render_documents<T: Serialize>(objects: &[T]) -> Result<String> {
    let mut out = String::new();
    for object in objects {
        let doc = serde_yaml::to_string(object).context(error::SerdeYamlSnafu {
            action: "render manifest",
        })?;
        out.push_str(DOCUMENT_SEPARATOR);
        // serde_yaml 0.8 starts every document with its own separator.
        out.push_str(doc.strip_prefix(DOCUMENT_SEPARATOR).unwrap_or(&doc));
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde::Deserialize;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn documents_are_separated() {
        let rendered = render_documents(&[namespace("a"), namespace("b")]).unwrap();
        assert_eq!(rendered.matches("---\n").count(), 2);
        let docs: Vec<serde_yaml::Value> = serde_yaml::Deserializer::from_str(&rendered)
            .map(|doc| serde_yaml::Value::deserialize(doc).unwrap())
            .collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["metadata"]["name"].as_str(), Some("b"));
        assert_eq!(docs[0]["kind"].as_str(), Some("Namespace"));
    }

    #[test]
    fn manifest_set_keeps_order() {
        let mut set = ManifestSet::new();
        set.push(&namespace("ns")).unwrap();
        set.push(&ConfigMap {
            metadata: ObjectMeta {
                name: Some("cfg".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        assert_eq!(set.len(), 2);
        let rendered = set.render().unwrap();
        let namespace_at = rendered.find("kind: Namespace").unwrap();
        let config_map_at = rendered.find("kind: ConfigMap").unwrap();
        assert!(namespace_at < config_map_at);
    }
}
