use deadpool_postgres::Pool;

use crate::error::Result;

/// Idempotent DDL, applied on startup.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS clusters (
    arn TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    settings JSONB NOT NULL DEFAULT '[]',
    configuration JSONB,
    tags JSONB NOT NULL DEFAULT '[]',
    capacity_providers JSONB NOT NULL DEFAULT '[]',
    default_capacity_provider_strategy JSONB NOT NULL DEFAULT '[]',
    registered_container_instances_count INT NOT NULL DEFAULT 0,
    running_tasks_count INT NOT NULL DEFAULT 0,
    pending_tasks_count INT NOT NULL DEFAULT 0,
    active_services_count INT NOT NULL DEFAULT 0,
    k3d_cluster TEXT,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_definition_families (
    family TEXT PRIMARY KEY,
    latest_revision BIGINT NOT NULL,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_definitions (
    arn TEXT PRIMARY KEY,
    family TEXT NOT NULL,
    revision BIGINT NOT NULL,
    status TEXT NOT NULL,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    container_definitions JSONB NOT NULL,
    volumes JSONB NOT NULL DEFAULT '[]',
    network_mode TEXT,
    requires_compatibilities JSONB NOT NULL DEFAULT '[]',
    cpu TEXT,
    memory TEXT,
    task_role_arn TEXT,
    execution_role_arn TEXT,
    placement_constraints JSONB NOT NULL DEFAULT '[]',
    tags JSONB NOT NULL DEFAULT '[]',
    created_at BIGINT NOT NULL,
    deregistered_at BIGINT,
    UNIQUE (family, revision)
);
CREATE INDEX IF NOT EXISTS idx_task_definitions_family
    ON task_definitions (family, revision);

CREATE TABLE IF NOT EXISTS services (
    arn TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    cluster_arn TEXT NOT NULL,
    task_definition_arn TEXT NOT NULL,
    desired_count INT NOT NULL DEFAULT 0,
    running_count INT NOT NULL DEFAULT 0,
    pending_count INT NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    launch_type TEXT NOT NULL,
    scheduling_strategy TEXT NOT NULL,
    deployment_controller_type TEXT NOT NULL,
    load_balancers JSONB NOT NULL DEFAULT '[]',
    service_registries JSONB NOT NULL DEFAULT '[]',
    network_configuration JSONB,
    deployment_configuration JSONB,
    placement_constraints JSONB NOT NULL DEFAULT '[]',
    placement_strategy JSONB NOT NULL DEFAULT '[]',
    tags JSONB NOT NULL DEFAULT '[]',
    enable_ecs_managed_tags BOOLEAN NOT NULL DEFAULT FALSE,
    propagate_tags TEXT,
    enable_execute_command BOOLEAN NOT NULL DEFAULT FALSE,
    primary_task_set_id TEXT,
    deployment_name TEXT NOT NULL,
    namespace TEXT NOT NULL,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    UNIQUE (cluster_arn, name)
);
CREATE INDEX IF NOT EXISTS idx_services_cluster ON services (cluster_arn, name);

CREATE TABLE IF NOT EXISTS tasks (
    arn TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    cluster_arn TEXT NOT NULL,
    task_definition_arn TEXT NOT NULL,
    container_instance_arn TEXT,
    overrides JSONB,
    last_status TEXT NOT NULL,
    desired_status TEXT NOT NULL,
    cpu TEXT,
    memory TEXT,
    containers JSONB NOT NULL DEFAULT '[]',
    version BIGINT NOT NULL DEFAULT 1,
    stop_code TEXT,
    stopped_reason TEXT,
    started_by TEXT,
    group_name TEXT,
    launch_type TEXT NOT NULL,
    health_status TEXT NOT NULL,
    attributes JSONB NOT NULL DEFAULT '[]',
    attachments JSONB NOT NULL DEFAULT '[]',
    capacity_provider_name TEXT,
    tags JSONB NOT NULL DEFAULT '[]',
    pod_name TEXT,
    pod_namespace TEXT,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    started_at BIGINT,
    stopping_at BIGINT,
    stopped_at BIGINT,
    pull_started_at BIGINT,
    pull_stopped_at BIGINT,
    execution_stopped_at BIGINT,
    updated_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_cluster_id ON tasks (cluster_arn, id);
CREATE INDEX IF NOT EXISTS idx_tasks_task_definition ON tasks (task_definition_arn);
CREATE INDEX IF NOT EXISTS idx_tasks_last_status ON tasks (last_status);
CREATE INDEX IF NOT EXISTS idx_tasks_started_by ON tasks (started_by);

CREATE TABLE IF NOT EXISTS task_sets (
    arn TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    service_arn TEXT NOT NULL,
    cluster_arn TEXT NOT NULL,
    status TEXT NOT NULL,
    task_definition_arn TEXT NOT NULL,
    external_id TEXT,
    launch_type TEXT NOT NULL,
    scale JSONB NOT NULL DEFAULT '{}',
    computed_desired_count INT NOT NULL DEFAULT 0,
    pending_count INT NOT NULL DEFAULT 0,
    running_count INT NOT NULL DEFAULT 0,
    stability_status TEXT NOT NULL,
    tags JSONB NOT NULL DEFAULT '[]',
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    UNIQUE (service_arn, id)
);

CREATE TABLE IF NOT EXISTS attributes (
    cluster_arn TEXT NOT NULL,
    name TEXT NOT NULL,
    value TEXT,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    PRIMARY KEY (cluster_arn, target_id, name)
);

CREATE TABLE IF NOT EXISTS account_settings (
    principal_arn TEXT NOT NULL,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (principal_arn, name)
);

CREATE TABLE IF NOT EXISTS service_events (
    id TEXT PRIMARY KEY,
    service_arn TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_service_events_service
    ON service_events (service_arn, created_at DESC);
"#;

pub async fn init(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client.batch_execute(DDL).await?;
    tracing::info!("database schema initialized");
    Ok(())
}
