//! CoreDNS integration for ECS service discovery.
//!
//! One `coredns-custom` ConfigMap in `kube-system` holds a server block per
//! service-discovery namespace, keyed `kecs-<namespaceId>.server`. The block
//! rewrites `*.<domain>` onto the cluster namespace and falls through to the
//! kubernetes plugin. The ConfigMap is a contested resource: every
//! read-modify-write happens under an advisory lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::client::Client;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

const CONFIGMAP_NAME: &str = "coredns-custom";
const CONFIGMAP_NAMESPACE: &str = "kube-system";
const COREDNS_POD_SELECTOR: &str = "k8s-app=kube-dns";

#[derive(Clone)]
pub struct DnsManager {
    client: Client,
    lock: Arc<Mutex<()>>,
}

impl DnsManager {
    pub fn new(client: Client) -> Self {
        DnsManager {
            client,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), CONFIGMAP_NAMESPACE)
    }

    /// Installs (or refreshes) the server block for one service-discovery
    /// namespace, evicting any older entry claiming the same domain.
    pub async fn ensure_entry(
        &self,
        namespace_id: &str,
        domain: &str,
        k8s_namespace: &str,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let api = self.api();
        let key = entry_key(namespace_id);
        let block = server_block(domain, k8s_namespace);

        match api.get(CONFIGMAP_NAME).await {
            Ok(mut cm) => {
                let mut data = cm.data.take().unwrap_or_default();
                for evicted in prune_conflicting(&mut data, &key, domain) {
                    tracing::warn!(
                        domain,
                        replaced = %evicted,
                        "service-discovery domain re-registered; earlier CoreDNS entry removed"
                    );
                }
                if data.get(&key).map(String::as_str) == Some(block.as_str()) {
                    return Ok(());
                }
                data.insert(key, block);
                cm.data = Some(data);
                api.replace(CONFIGMAP_NAME, &PostParams::default(), &cm)
                    .await?;
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let mut data = BTreeMap::new();
                data.insert(key, block);
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(CONFIGMAP_NAME.to_string()),
                        namespace: Some(CONFIGMAP_NAMESPACE.to_string()),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &cm).await?;
            }
            Err(e) => return Err(Error::from(e)),
        }

        self.restart_coredns().await;
        Ok(())
    }

    /// Drops the server block for a namespace once nothing references it.
    pub async fn remove_entry(&self, namespace_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let api = self.api();
        let key = entry_key(namespace_id);

        let mut cm = match api.get(CONFIGMAP_NAME).await {
            Ok(cm) => cm,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(Error::from(e)),
        };
        let mut data = cm.data.take().unwrap_or_default();
        if data.remove(&key).is_none() {
            return Ok(());
        }
        cm.data = Some(data);
        api.replace(CONFIGMAP_NAME, &PostParams::default(), &cm)
            .await?;

        self.restart_coredns().await;
        Ok(())
    }

    /// Deletes the CoreDNS pods so the custom config is picked up
    /// immediately. Failures are logged and swallowed; CoreDNS reloads on
    /// its own schedule anyway.
    async fn restart_coredns(&self) {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), CONFIGMAP_NAMESPACE);
        let list = match pods
            .list(&ListParams::default().labels(COREDNS_POD_SELECTOR))
            .await
        {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list CoreDNS pods for restart");
                return;
            }
        };
        for pod in list {
            let Some(name) = pod.metadata.name else { continue };
            match pods.delete(&name, &DeleteParams::default()).await {
                Ok(_) => tracing::debug!(pod = %name, "restarted CoreDNS pod"),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => tracing::warn!(pod = %name, error = %e, "failed to restart CoreDNS pod"),
            }
        }
    }
}

fn entry_key(namespace_id: &str) -> String {
    format!("kecs-{namespace_id}.server")
}

/// Removes entries (other than `keep`) whose body serves the same domain.
/// Returns the evicted keys.
fn prune_conflicting(
    data: &mut BTreeMap<String, String>,
    keep: &str,
    domain: &str,
) -> Vec<String> {
    let marker = format!("{domain}:53");
    let evicted: Vec<String> = data
        .iter()
        .filter(|(key, value)| key.as_str() != keep && value.contains(&marker))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &evicted {
        data.remove(key);
    }
    evicted
}

/// Renders the CoreDNS server block. The domain is regex-escaped before it
/// lands in the rewrite pattern so dots (or a hostile namespace name) cannot
/// change the match semantics.
fn server_block(domain: &str, k8s_namespace: &str) -> String {
    let escaped = regex::escape(domain);
    format!(
        "{domain}:53 {{\n    errors\n    rewrite name regex (.*)\\.{escaped} {{1}}.{k8s_namespace}.svc.cluster.local answer auto\n    kubernetes cluster.local in-addr.arpa ip6.arpa {{\n        pods insecure\n        fallthrough in-addr.arpa ip6.arpa\n    }}\n    cache 10\n}}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_block_escapes_the_domain() {
        let block = server_block("c1.local", "c1-us-east-1");
        assert!(block.starts_with("c1.local:53 {"));
        assert!(block.contains("(.*)\\.c1\\.local"));
        assert!(block.contains("{1}.c1-us-east-1.svc.cluster.local"));
        assert!(block.contains("fallthrough"));
    }

    #[test]
    fn entry_key_format() {
        assert_eq!(entry_key("srv-x"), "kecs-srv-x.server");
    }

    #[test]
    fn duplicate_domain_entries_are_pruned() {
        let mut data = BTreeMap::new();
        data.insert("kecs-old.server".to_string(), server_block("c1.local", "old-ns"));
        data.insert("kecs-other.server".to_string(), server_block("c2.local", "ns2"));

        let evicted = prune_conflicting(&mut data, "kecs-new.server", "c1.local");
        assert_eq!(evicted, vec!["kecs-old.server".to_string()]);
        assert!(data.contains_key("kecs-other.server"));
        assert!(!data.contains_key("kecs-old.server"));
    }

    #[test]
    fn prune_keeps_own_entry() {
        let mut data = BTreeMap::new();
        data.insert("kecs-x.server".to_string(), server_block("c1.local", "ns"));
        let evicted = prune_conflicting(&mut data, "kecs-x.server", "c1.local");
        assert!(evicted.is_empty());
        assert!(data.contains_key("kecs-x.server"));
    }
}
