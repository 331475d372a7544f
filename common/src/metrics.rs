use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder exactly once and returns the
/// render handle. Safe to call from multiple components; later calls reuse
/// the first installation.
pub fn install_recorder() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Renders the current metrics snapshot in Prometheus exposition format.
pub fn render() -> String {
    install_recorder().render()
}
