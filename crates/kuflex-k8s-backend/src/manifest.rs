use std::path::Path;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde::Deserialize;

use crate::error::{KuflexBackendError, Result};

/// Turns a file reference into the single object it describes.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<DynamicObject>;
}

/// Reads manifests from disk. `.json` files are parsed as JSON, anything
/// else as YAML. A file must hold exactly one non-empty document that
/// carries `apiVersion` and `kind`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileResourceLoader;

fn manifest_error(path: &Path, reason: impl Into<String>) -> KuflexBackendError {
    KuflexBackendError::Manifest {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn parse_yaml(path: &Path, raw: &str) -> Result<DynamicObject> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(raw) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| manifest_error(path, e.to_string()))?;
        if !value.is_null() {
            documents.push(value);
        }
    }

    match documents.len() {
        1 => serde_yaml::from_value(documents.remove(0)).map_err(|e| manifest_error(path, e.to_string())),
        0 => Err(manifest_error(path, "no documents")),
        n => Err(manifest_error(path, format!("expected one document, found {n}"))),
    }
}

pub fn parse_manifest(path: &Path, raw: &str) -> Result<DynamicObject> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let object: DynamicObject = if is_json {
        serde_json::from_str(raw).map_err(|e| manifest_error(path, e.to_string()))?
    } else {
        parse_yaml(path, raw)?
    };

    match &object.types {
        Some(types) if !types.kind.is_empty() && !types.api_version.is_empty() => Ok(object),
        _ => Err(manifest_error(path, "missing apiVersion or kind")),
    }
}

#[async_trait]
impl ResourceLoader for FileResourceLoader {
    async fn load(&self, path: &Path) -> Result<DynamicObject> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| manifest_error(path, e.to_string()))?;
        let object = parse_manifest(path, &raw)?;
        tracing::debug!(path = %path.display(), "manifest loaded");

        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;
    use std::io::Write;

    const CONTROL_PLANE: &str = r#"
apiVersion: servicemesh.cisco.com/v1alpha1
kind: IstioControlPlane
metadata:
  name: icp-v115x
  namespace: istio-system
spec:
  version: "1.15.3"
  mode: ACTIVE
  meshID: mesh1
  networkName: network1
"#;

    fn manifest(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loads_a_yaml_control_plane() {
        let file = manifest(".yaml", CONTROL_PLANE);

        let object = FileResourceLoader.load(file.path()).await.unwrap();
        assert_eq!(object.name_any(), "icp-v115x");
        assert_eq!(object.namespace().as_deref(), Some("istio-system"));
        assert_eq!(object.types.unwrap().kind, "IstioControlPlane");
        assert_eq!(object.data["spec"]["mode"], "ACTIVE");
    }

    #[tokio::test]
    async fn json_extension_uses_json() {
        let file = manifest(
            ".json",
            r#"{"apiVersion":"v1","kind":"Namespace","metadata":{"name":"scratch"}}"#,
        );

        let object = FileResourceLoader.load(file.path()).await.unwrap();
        assert_eq!(object.name_any(), "scratch");
    }

    #[test]
    fn separators_and_empty_documents_are_ignored() {
        let raw = format!("---\n{CONTROL_PLANE}\n---\n");
        let object = parse_manifest(Path::new("icp.yaml"), &raw).unwrap();
        assert_eq!(object.name_any(), "icp-v115x");
    }

    #[test]
    fn multiple_documents_are_rejected() {
        let raw = format!("{CONTROL_PLANE}\n---\n{CONTROL_PLANE}");
        let err = parse_manifest(Path::new("icp.yaml"), &raw).unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn untyped_objects_are_rejected() {
        let err = parse_manifest(Path::new("icp.yaml"), "metadata:\n  name: x\n").unwrap_err();
        assert!(matches!(err, KuflexBackendError::Manifest { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_a_manifest_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileResourceLoader
            .load(&dir.path().join("absent.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, KuflexBackendError::Manifest { .. }));
    }
}
