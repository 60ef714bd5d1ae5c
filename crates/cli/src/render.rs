use std::path::Path;

use anyhow::{Context, Result};
use istio_smi_api::{Dispatcher, SourceEvent, SourceObject};
use istio_smi_store::MemoryStore;
use istio_smi_translate::IstioTranslator;
use kube::core::DynamicObject;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::run::report;
use crate::Output;

const DEFAULT_NAMESPACE: &str = "default";

/// Result of translating a batch of manifests offline.
#[derive(Debug, Default)]
pub(crate) struct Rendered {
    pub objects: Vec<DynamicObject>,
    /// `namespace/name: reason` for sources that produced nothing.
    pub skipped: Vec<String>,
}

/// Split a multi-document YAML stream into JSON values, dropping empty documents.
fn documents(text: &str) -> Result<Vec<serde_json::Value>> {
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing document {}", i + 1))?;
        if value.is_null() {
            continue;
        }
        out.push(serde_json::to_value(value).with_context(|| format!("converting document {}", i + 1))?);
    }
    Ok(out)
}

fn with_namespace(mut obj: SourceObject, ns: &str) -> SourceObject {
    let meta = obj.meta_mut();
    if meta.namespace.is_none() {
        meta.namespace = Some(ns.to_string());
    }
    obj
}

pub(crate) async fn render_manifests(text: &str, namespace: Option<&str>) -> Result<Rendered> {
    let ns = namespace.unwrap_or(DEFAULT_NAMESPACE);
    let store = MemoryStore::new();
    let dispatcher = Dispatcher::new(IstioTranslator::new());
    let cancel = CancellationToken::new();
    let mut rendered = Rendered::default();

    for value in documents(text)? {
        let obj = with_namespace(SourceObject::from_json(value)?, ns);
        let event = SourceEvent::Upsert(obj);
        let res = dispatcher.dispatch(&event, &store, &cancel).await;
        report(&event, &res);
        match res {
            Ok(_) => {}
            Err(e) if e.is_not_implemented() => rendered.skipped.push(format!("{}: {}", event.object().object_ref(), e)),
            Err(e) => return Err(e).with_context(|| format!("translating {}", event.object().object_ref())),
        }
    }
    rendered.objects = store.objects();
    Ok(rendered)
}

pub async fn render_file(path: &Path, namespace: Option<&str>, output: Output) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rendered = render_manifests(&text, namespace).await?;
    for s in &rendered.skipped {
        eprintln!("skipped {}", s);
    }
    match output {
        Output::Human => {
            for obj in &rendered.objects {
                println!("---");
                print!("{}", serde_yaml::to_string(obj)?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rendered.objects)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFESTS: &str = r#"
apiVersion: split.smi-spec.io/v1alpha4
kind: TrafficSplit
metadata:
  name: web
  namespace: demo
spec:
  service: web
  backends:
    - service: v1
      weight: 25
    - service: v2
      weight: 75
---
apiVersion: access.smi-spec.io/v1alpha3
kind: TrafficTarget
metadata:
  name: api
spec:
  destination:
    kind: ServiceAccount
    name: api
    namespace: prod
  sources:
    - kind: ServiceAccount
      name: frontend
      namespace: prod
---
apiVersion: specs.smi-spec.io/v1alpha4
kind: TCPRoute
metadata:
  name: db
spec: {}
"#;

    #[tokio::test]
    async fn renders_virtual_service_and_reports_policy_gap() {
        let rendered = render_manifests(MANIFESTS, Some("prod")).await.unwrap();

        assert_eq!(rendered.objects.len(), 1);
        let vs = &rendered.objects[0];
        assert_eq!(vs.metadata.name.as_deref(), Some("web"));
        assert_eq!(vs.metadata.namespace.as_deref(), Some("demo"));
        assert_eq!(vs.data["spec"]["hosts"], serde_json::json!(["web"]));
        assert_eq!(vs.data["spec"]["http"][0]["route"][1]["destination"]["subset"], "v2");
        assert_eq!(vs.data["spec"]["http"][0]["route"][1]["weight"], 75);

        assert_eq!(rendered.skipped, vec!["prod/api: AuthorizationPolicy create: not implemented".to_string()]);
    }

    #[tokio::test]
    async fn unknown_kinds_abort_the_render() {
        let text = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n";
        let err = render_manifests(text, None).await.unwrap_err();
        assert!(err.to_string().contains("unsupported source kind v1/ConfigMap"), "{err}");
    }

    #[test]
    fn empty_documents_are_ignored() {
        let docs = documents("---\n---\nkind: X\n---\n").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["kind"], "X");
    }
}
