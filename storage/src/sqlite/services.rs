use async_trait::async_trait;
use rusqlite::{Row, ToSql, params};

use super::{SqliteStore, json_text, opt_json_text, parse_enum, parse_json, parse_opt_json};
use crate::error::{Result, StorageError};
use crate::model::{ServiceRow, now_ms};
use crate::repository::{ServiceFilter, ServiceRepository};
use kecs_types::{DeploymentControllerType, LaunchType, SchedulingStrategy, ServiceStatus};

const COLS: &str = "arn, name, cluster_arn, task_definition_arn, desired_count, running_count, \
     pending_count, status, launch_type, scheduling_strategy, deployment_controller_type, \
     load_balancers, service_registries, network_configuration, deployment_configuration, \
     placement_constraints, placement_strategy, tags, enable_ecs_managed_tags, propagate_tags, \
     enable_execute_command, primary_task_set_id, deployment_name, namespace, region, \
     account_id, created_at, updated_at";

fn from_row(row: &Row<'_>) -> Result<ServiceRow> {
    let status: String = row.get(7)?;
    let launch: String = row.get(8)?;
    let strategy: String = row.get(9)?;
    let controller: String = row.get(10)?;
    Ok(ServiceRow {
        arn: row.get(0)?,
        name: row.get(1)?,
        cluster_arn: row.get(2)?,
        task_definition_arn: row.get(3)?,
        desired_count: row.get(4)?,
        running_count: row.get(5)?,
        pending_count: row.get(6)?,
        status: parse_enum(&status, ServiceStatus::parse, "service status")?,
        launch_type: parse_enum(&launch, LaunchType::parse, "launch type")?,
        scheduling_strategy: parse_enum(&strategy, SchedulingStrategy::parse, "scheduling strategy")?,
        deployment_controller_type: parse_enum(
            &controller,
            DeploymentControllerType::parse,
            "deployment controller",
        )?,
        load_balancers: parse_json(row.get(11)?)?,
        service_registries: parse_json(row.get(12)?)?,
        network_configuration: parse_opt_json(row.get(13)?)?,
        deployment_configuration: parse_opt_json(row.get(14)?)?,
        placement_constraints: parse_json(row.get(15)?)?,
        placement_strategy: parse_json(row.get(16)?)?,
        tags: parse_json(row.get(17)?)?,
        enable_ecs_managed_tags: row.get::<_, i64>(18)? != 0,
        propagate_tags: row.get(19)?,
        enable_execute_command: row.get::<_, i64>(20)? != 0,
        primary_task_set_id: row.get(21)?,
        deployment_name: row.get(22)?,
        namespace: row.get(23)?,
        region: row.get(24)?,
        account_id: row.get(25)?,
        created_at: row.get(26)?,
        updated_at: row.get(27)?,
    })
}

fn query_one(
    conn: &rusqlite::Connection,
    sql: &str,
    args: &[&dyn ToSql],
) -> Result<Option<ServiceRow>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    match rows.next()? {
        Some(row) => Ok(Some(from_row(row)?)),
        None => Ok(None),
    }
}

fn query_many(
    conn: &rusqlite::Connection,
    sql: &str,
    args: &[&dyn ToSql],
) -> Result<Vec<ServiceRow>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(from_row(row)?);
    }
    Ok(out)
}

#[async_trait]
impl ServiceRepository for SqliteStore {
    async fn create(&self, row: &ServiceRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO services (arn, name, cluster_arn, task_definition_arn, desired_count, \
                 running_count, pending_count, status, launch_type, scheduling_strategy, \
                 deployment_controller_type, load_balancers, service_registries, \
                 network_configuration, deployment_configuration, placement_constraints, \
                 placement_strategy, tags, enable_ecs_managed_tags, propagate_tags, \
                 enable_execute_command, primary_task_set_id, deployment_name, namespace, region, \
                 account_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)",
                params![
                    row.arn,
                    row.name,
                    row.cluster_arn,
                    row.task_definition_arn,
                    row.desired_count,
                    row.running_count,
                    row.pending_count,
                    row.status.as_str(),
                    row.launch_type.as_str(),
                    row.scheduling_strategy.as_str(),
                    row.deployment_controller_type.as_str(),
                    json_text(&row.load_balancers),
                    json_text(&row.service_registries),
                    opt_json_text(&row.network_configuration),
                    opt_json_text(&row.deployment_configuration),
                    json_text(&row.placement_constraints),
                    json_text(&row.placement_strategy),
                    json_text(&row.tags),
                    row.enable_ecs_managed_tags as i64,
                    row.propagate_tags,
                    row.enable_execute_command as i64,
                    row.primary_task_set_id,
                    row.deployment_name,
                    row.namespace,
                    row.region,
                    row.account_id,
                    row.created_at,
                    row.updated_at,
                ],
            )
            .map_err(|e| StorageError::from(e).constraint_as_exists("service", row.name.clone()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<ServiceRow>> {
        let cluster_arn = cluster_arn.to_string();
        let name = name.to_string();
        let sql = format!("SELECT {COLS} FROM services WHERE cluster_arn = ?1 AND name = ?2");
        self.call(move |conn| query_one(conn, &sql, &[&cluster_arn, &name]))
            .await
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<ServiceRow>> {
        let arn = arn.to_string();
        let sql = format!("SELECT {COLS} FROM services WHERE arn = ?1");
        self.call(move |conn| query_one(conn, &sql, &[&arn])).await
    }

    async fn list(
        &self,
        cluster_arn: &str,
        filter: &ServiceFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ServiceRow>> {
        let cluster_arn = cluster_arn.to_string();
        let filter = filter.clone();
        self.call(move |conn| {
            let mut sql = format!("SELECT {COLS} FROM services WHERE cluster_arn = ?1");
            let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(cluster_arn)];
            if let Some(lt) = &filter.launch_type {
                args.push(Box::new(lt.clone()));
                sql.push_str(&format!(" AND launch_type = ?{}", args.len()));
            }
            if let Some(st) = &filter.scheduling_strategy {
                args.push(Box::new(st.clone()));
                sql.push_str(&format!(" AND scheduling_strategy = ?{}", args.len()));
            }
            args.push(Box::new(limit));
            sql.push_str(&format!(
                " ORDER BY created_at DESC, arn DESC LIMIT ?{}",
                args.len()
            ));
            args.push(Box::new(offset));
            sql.push_str(&format!(" OFFSET ?{}", args.len()));

            let params: Vec<&dyn ToSql> = args.iter().map(|b| b.as_ref()).collect();
            query_many(conn, &sql, params.as_slice())
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<ServiceRow>> {
        let sql = format!("SELECT {COLS} FROM services ORDER BY created_at DESC, arn DESC");
        self.call(move |conn| query_many(conn, &sql, &[])).await
    }

    async fn update(&self, row: &ServiceRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE services SET task_definition_arn = ?2, desired_count = ?3, \
                 running_count = ?4, pending_count = ?5, status = ?6, load_balancers = ?7, \
                 service_registries = ?8, network_configuration = ?9, \
                 deployment_configuration = ?10, placement_constraints = ?11, \
                 placement_strategy = ?12, tags = ?13, propagate_tags = ?14, \
                 primary_task_set_id = ?15, updated_at = ?16 WHERE arn = ?1",
                params![
                    row.arn,
                    row.task_definition_arn,
                    row.desired_count,
                    row.running_count,
                    row.pending_count,
                    row.status.as_str(),
                    json_text(&row.load_balancers),
                    json_text(&row.service_registries),
                    opt_json_text(&row.network_configuration),
                    opt_json_text(&row.deployment_configuration),
                    json_text(&row.placement_constraints),
                    json_text(&row.placement_strategy),
                    json_text(&row.tags),
                    row.propagate_tags,
                    row.primary_task_set_id,
                    now_ms(),
                ],
            )?;
            if n == 0 {
                return Err(StorageError::not_found("service", row.arn.clone()));
            }
            Ok(())
        })
        .await
    }

    async fn update_counters(&self, arn: &str, running: i32, pending: i32) -> Result<()> {
        let arn = arn.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE services SET running_count = ?2, pending_count = ?3, updated_at = ?4 \
                 WHERE arn = ?1",
                params![arn, running, pending, now_ms()],
            )?;
            if n == 0 {
                return Err(StorageError::not_found("service", arn));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, arn: &str) -> Result<bool> {
        let arn = arn.to_string();
        self.call(move |conn| {
            let n = conn.execute("DELETE FROM services WHERE arn = ?1", params![arn])?;
            Ok(n > 0)
        })
        .await
    }

    async fn count_active_by_cluster(&self, cluster_arn: &str) -> Result<i64> {
        let cluster_arn = cluster_arn.to_string();
        self.call(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM services WHERE cluster_arn = ?1 AND status = 'ACTIVE'",
                params![cluster_arn],
                |r| r.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}
