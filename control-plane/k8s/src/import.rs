use kite_control_plane_core::{Error, NewCluster, Repository, Result};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

/// Splits a multi-context kubeconfig into `(context name, single-context
/// blob)` pairs.
///
/// The split happens at the YAML level so credential material and unknown
/// fields survive byte-for-byte inside the referenced entries; each
/// produced blob carries exactly one context plus the cluster and user it
/// references, with `current-context` pointing at it.
pub fn split_contexts(blob: &str) -> Result<Vec<(String, String)>> {
    let doc: Value = serde_yaml::from_str(blob)
        .map_err(|e| Error::bad_input(format!("kubeconfig: {e}")))?;

    let contexts = doc
        .get("contexts")
        .and_then(Value::as_sequence)
        .ok_or_else(|| Error::bad_input("kubeconfig has no contexts"))?;

    let mut out = Vec::with_capacity(contexts.len());
    for entry in contexts {
        let name = str_at(entry, &["name"])
            .ok_or_else(|| Error::bad_input("kubeconfig context without a name"))?;
        let cluster = str_at(entry, &["context", "cluster"]).unwrap_or_default();
        let user = str_at(entry, &["context", "user"]).unwrap_or_default();

        let mut single = Mapping::new();
        single.insert("apiVersion".into(), "v1".into());
        single.insert("kind".into(), "Config".into());
        single.insert("current-context".into(), name.clone().into());
        single.insert("contexts".into(), Value::Sequence(vec![entry.clone()]));
        single.insert(
            "clusters".into(),
            named_entries(&doc, "clusters", &cluster),
        );
        single.insert("users".into(), named_entries(&doc, "users", &user));

        let blob = serde_yaml::to_string(&Value::Mapping(single))
            .map_err(|e| Error::Upstream(anyhow::anyhow!("serialize kubeconfig: {e}")))?;
        out.push((name, blob));
    }
    Ok(out)
}

/// Creates a cluster record per context, skipping names that already exist.
/// The blob's current context becomes the default when no enabled default
/// exists yet. Returns the number of records created.
pub(crate) async fn import_kubeconfig(repo: &dyn Repository, blob: &str) -> Result<usize> {
    let doc: Value = serde_yaml::from_str(blob)
        .map_err(|e| Error::bad_input(format!("kubeconfig: {e}")))?;
    let current_context = str_at(&doc, &["current-context"]).unwrap_or_default();

    let mut has_default = repo
        .list_clusters()
        .await?
        .iter()
        .any(|c| c.is_default && c.enabled);

    let mut created = 0;
    for (name, credential) in split_contexts(blob)? {
        if repo.get_cluster(&name).await?.is_some() {
            debug!(cluster = %name, "skipping import; record exists");
            continue;
        }
        let is_default = !has_default && name == current_context;
        has_default = has_default || is_default;
        repo.create_cluster(NewCluster {
            name: name.clone(),
            credential: credential.into(),
            in_cluster: false,
            is_default,
            enabled: true,
            metrics_endpoint: None,
        })
        .await?;
        info!(cluster = %name, is_default, "imported cluster from kubeconfig");
        created += 1;
    }
    Ok(created)
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(*key)?;
    }
    cursor.as_str().map(str::to_string)
}

/// The entries of a top-level named list (`clusters`, `users`) whose
/// `name` matches.
fn named_entries(doc: &Value, list: &str, name: &str) -> Value {
    let entries = doc
        .get(list)
        .and_then(Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter(|e| str_at(e, &["name"]).as_deref() == Some(name))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Value::Sequence(entries)
}
