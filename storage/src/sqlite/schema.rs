use rusqlite::Connection;

use crate::error::Result;

/// Idempotent DDL, applied on every open. JSON-typed fields live in TEXT
/// columns the store never inspects.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS clusters (
    arn TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    settings TEXT NOT NULL DEFAULT '[]',
    configuration TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    capacity_providers TEXT NOT NULL DEFAULT '[]',
    default_capacity_provider_strategy TEXT NOT NULL DEFAULT '[]',
    registered_container_instances_count INTEGER NOT NULL DEFAULT 0,
    running_tasks_count INTEGER NOT NULL DEFAULT 0,
    pending_tasks_count INTEGER NOT NULL DEFAULT 0,
    active_services_count INTEGER NOT NULL DEFAULT 0,
    k3d_cluster TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS task_definition_families (
    family TEXT PRIMARY KEY,
    latest_revision INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS task_definitions (
    arn TEXT PRIMARY KEY,
    family TEXT NOT NULL,
    revision INTEGER NOT NULL,
    status TEXT NOT NULL,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    container_definitions TEXT NOT NULL,
    volumes TEXT NOT NULL DEFAULT '[]',
    network_mode TEXT,
    requires_compatibilities TEXT NOT NULL DEFAULT '[]',
    cpu TEXT,
    memory TEXT,
    task_role_arn TEXT,
    execution_role_arn TEXT,
    placement_constraints TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    deregistered_at INTEGER,
    UNIQUE (family, revision)
);
CREATE INDEX IF NOT EXISTS idx_task_definitions_family
    ON task_definitions (family, revision);

CREATE TABLE IF NOT EXISTS services (
    arn TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    cluster_arn TEXT NOT NULL,
    task_definition_arn TEXT NOT NULL,
    desired_count INTEGER NOT NULL DEFAULT 0,
    running_count INTEGER NOT NULL DEFAULT 0,
    pending_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    launch_type TEXT NOT NULL,
    scheduling_strategy TEXT NOT NULL,
    deployment_controller_type TEXT NOT NULL,
    load_balancers TEXT NOT NULL DEFAULT '[]',
    service_registries TEXT NOT NULL DEFAULT '[]',
    network_configuration TEXT,
    deployment_configuration TEXT,
    placement_constraints TEXT NOT NULL DEFAULT '[]',
    placement_strategy TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    enable_ecs_managed_tags INTEGER NOT NULL DEFAULT 0,
    propagate_tags TEXT,
    enable_execute_command INTEGER NOT NULL DEFAULT 0,
    primary_task_set_id TEXT,
    deployment_name TEXT NOT NULL,
    namespace TEXT NOT NULL,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (cluster_arn, name)
);
CREATE INDEX IF NOT EXISTS idx_services_cluster ON services (cluster_arn, name);

CREATE TABLE IF NOT EXISTS tasks (
    arn TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    cluster_arn TEXT NOT NULL,
    task_definition_arn TEXT NOT NULL,
    container_instance_arn TEXT,
    overrides TEXT,
    last_status TEXT NOT NULL,
    desired_status TEXT NOT NULL,
    cpu TEXT,
    memory TEXT,
    containers TEXT NOT NULL DEFAULT '[]',
    version INTEGER NOT NULL DEFAULT 1,
    stop_code TEXT,
    stopped_reason TEXT,
    started_by TEXT,
    group_name TEXT,
    launch_type TEXT NOT NULL,
    health_status TEXT NOT NULL,
    attributes TEXT NOT NULL DEFAULT '[]',
    attachments TEXT NOT NULL DEFAULT '[]',
    capacity_provider_name TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    pod_name TEXT,
    pod_namespace TEXT,
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    stopping_at INTEGER,
    stopped_at INTEGER,
    pull_started_at INTEGER,
    pull_stopped_at INTEGER,
    execution_stopped_at INTEGER,
    updated_at INTEGER NOT NULL
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
    scale TEXT NOT NULL DEFAULT '{}',
    computed_desired_count INTEGER NOT NULL DEFAULT 0,
    pending_count INTEGER NOT NULL DEFAULT 0,
    running_count INTEGER NOT NULL DEFAULT 0,
    stability_status TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    region TEXT NOT NULL,
    account_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
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
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_service_events_service
    ON service_events (service_arn, created_at DESC);
"#;

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(DDL)?;
    Ok(())
}
