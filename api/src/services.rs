use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;
use crate::arn::{short_name, validate_name};
use crate::clusters::resolve_cluster;
use crate::error::{ApiError, Result};
use crate::settings::merge_tags;
use crate::task_definitions;
use crate::view;
use crate::pagination;
use kecs_operator::{ProjectionIntent, labels};
use kecs_storage::{ServiceFilter, ServiceRow, now_ms};
use kecs_types::{
    DeploymentConfiguration, DeploymentController, DeploymentControllerType, Failure, LaunchType,
    LoadBalancer, NetworkConfiguration, PlacementConstraint, PlacementStrategy, SchedulingStrategy,
    Service, ServiceRegistry, ServiceStatus, Tag,
};

fn parse_launch_type(input: &Option<String>) -> Result<LaunchType> {
    match input.as_deref() {
        None => Ok(LaunchType::Ec2),
        Some(raw) => LaunchType::parse(raw).ok_or_else(|| {
            ApiError::InvalidParameter(format!(
                "launchType must be one of EC2, FARGATE, EXTERNAL, got {raw}"
            ))
        }),
    }
}

fn parse_scheduling_strategy(input: &Option<String>) -> Result<SchedulingStrategy> {
    match input.as_deref() {
        None => Ok(SchedulingStrategy::Replica),
        Some(raw) => SchedulingStrategy::parse(raw).ok_or_else(|| {
            ApiError::InvalidParameter(format!(
                "schedulingStrategy must be REPLICA or DAEMON, got {raw}"
            ))
        }),
    }
}

pub(crate) async fn resolve_service(
    state: &AppState,
    cluster_arn: &str,
    reference: &str,
) -> Result<ServiceRow> {
    state
        .storage
        .services
        .get(cluster_arn, short_name(reference))
        .await?
        .ok_or(ApiError::ServiceNotFound)
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub cluster: Option<String>,
    pub service_name: Option<String>,
    pub task_definition: Option<String>,
    pub desired_count: Option<i32>,
    pub launch_type: Option<String>,
    pub scheduling_strategy: Option<String>,
    pub deployment_controller: Option<DeploymentController>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancer>,
    #[serde(default)]
    pub service_registries: Vec<ServiceRegistry>,
    pub network_configuration: Option<NetworkConfiguration>,
    pub deployment_configuration: Option<DeploymentConfiguration>,
    #[serde(default)]
    pub placement_constraints: Vec<PlacementConstraint>,
    #[serde(default)]
    pub placement_strategy: Vec<PlacementStrategy>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub enable_ecs_managed_tags: Option<bool>,
    pub propagate_tags: Option<String>,
    pub enable_execute_command: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub service: Service,
}

pub async fn create_service(state: AppState, req: CreateServiceRequest) -> Result<ServiceResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let name = req
        .service_name
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("serviceName must not be empty".to_string()))?;
    validate_name("serviceName", name)?;

    let desired = req.desired_count.unwrap_or(0);
    if desired < 0 {
        return Err(ApiError::InvalidParameter(
            "desiredCount must be >= 0".to_string(),
        ));
    }
    let launch_type = parse_launch_type(&req.launch_type)?;
    let scheduling_strategy = parse_scheduling_strategy(&req.scheduling_strategy)?;
    let controller = req
        .deployment_controller
        .map(|c| c.controller_type)
        .unwrap_or(DeploymentControllerType::Ecs);
    if scheduling_strategy == SchedulingStrategy::Daemon && req.desired_count.is_some() {
        return Err(ApiError::InvalidParameter(
            "desiredCount cannot be specified for DAEMON services".to_string(),
        ));
    }

    // EXTERNAL-controller services are scaled through task sets and start
    // at zero; their task definition may come later with the first task set.
    let (task_definition_arn, mut tags) = match (&req.task_definition, controller) {
        (Some(reference), _) => {
            let taskdef = task_definitions::resolve(&state, reference).await?;
            let mut tags = req.tags.clone();
            if req.propagate_tags.as_deref() == Some("TASK_DEFINITION") {
                let inherited: Vec<Tag> =
                    serde_json::from_value(taskdef.tags.clone()).unwrap_or_default();
                tags = merge_tags(tags, inherited);
            }
            (taskdef.arn, tags)
        }
        (None, DeploymentControllerType::External) => (String::new(), req.tags.clone()),
        (None, _) => {
            return Err(ApiError::InvalidParameter(
                "taskDefinition must not be empty".to_string(),
            ));
        }
    };
    let desired = if controller == DeploymentControllerType::External {
        0
    } else {
        desired
    };

    let now = now_ms();
    let row = ServiceRow {
        arn: state.arns.service(&cluster.name, name),
        name: name.to_string(),
        cluster_arn: cluster.arn.clone(),
        task_definition_arn,
        desired_count: desired,
        running_count: 0,
        pending_count: 0,
        status: ServiceStatus::Active,
        launch_type,
        scheduling_strategy,
        deployment_controller_type: controller,
        load_balancers: json!(req.load_balancers),
        service_registries: json!(req.service_registries),
        network_configuration: req.network_configuration.map(|n| json!(n)),
        deployment_configuration: req.deployment_configuration.map(|d| json!(d)),
        placement_constraints: json!(req.placement_constraints),
        placement_strategy: json!(req.placement_strategy),
        tags: json!(std::mem::take(&mut tags)),
        enable_ecs_managed_tags: req.enable_ecs_managed_tags.unwrap_or(false),
        propagate_tags: req.propagate_tags,
        enable_execute_command: req.enable_execute_command.unwrap_or(false),
        primary_task_set_id: None,
        deployment_name: labels::dns_safe(name),
        namespace: labels::cluster_namespace(&cluster.name, state.region()),
        region: state.region().to_string(),
        account_id: state.account_id().to_string(),
        created_at: now,
        updated_at: now,
    };

    match state.storage.services.create(&row).await {
        Ok(()) => {}
        Err(kecs_storage::StorageError::AlreadyExists { .. }) => {
            return Err(ApiError::InvalidParameter(format!(
                "Creation of service was not idempotent: {name} already exists"
            )));
        }
        Err(e) => return Err(e.into()),
    }
    state.intents.send(ProjectionIntent::SyncService {
        service_arn: row.arn.clone(),
        restart: false,
    });
    tracing::info!(service = %name, cluster = %cluster.name, "created service");
    Ok(ServiceResponse {
        service: view::service(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub desired_count: Option<i32>,
    pub task_definition: Option<String>,
    pub deployment_configuration: Option<DeploymentConfiguration>,
    pub network_configuration: Option<NetworkConfiguration>,
    #[serde(default)]
    pub placement_constraints: Vec<PlacementConstraint>,
    #[serde(default)]
    pub placement_strategy: Vec<PlacementStrategy>,
    #[serde(default)]
    pub force_new_deployment: bool,
}

pub async fn update_service(state: AppState, req: UpdateServiceRequest) -> Result<ServiceResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let reference = req
        .service
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("service must not be empty".to_string()))?;
    let mut row = resolve_service(&state, &cluster.arn, reference).await?;
    if row.status != ServiceStatus::Active {
        return Err(ApiError::ServiceNotActive);
    }

    if let Some(desired) = req.desired_count {
        if desired < 0 {
            return Err(ApiError::InvalidParameter(
                "desiredCount must be >= 0".to_string(),
            ));
        }
        if row.scheduling_strategy == SchedulingStrategy::Daemon {
            return Err(ApiError::InvalidParameter(
                "desiredCount cannot be updated for DAEMON services".to_string(),
            ));
        }
        row.desired_count = desired;
    }
    if let Some(reference) = &req.task_definition {
        let taskdef = task_definitions::resolve(&state, reference).await?;
        row.task_definition_arn = taskdef.arn;
    }
    if let Some(config) = req.deployment_configuration {
        row.deployment_configuration = Some(json!(config));
    }
    if let Some(config) = req.network_configuration {
        row.network_configuration = Some(json!(config));
    }
    if !req.placement_constraints.is_empty() {
        row.placement_constraints = json!(req.placement_constraints);
    }
    if !req.placement_strategy.is_empty() {
        row.placement_strategy = json!(req.placement_strategy);
    }

    state.storage.services.update(&row).await?;
    // forceNewDeployment only redeploys ECS-controller workloads; task-set
    // promotions in flight are untouched.
    let restart =
        req.force_new_deployment && row.deployment_controller_type == DeploymentControllerType::Ecs;
    state.intents.send(ProjectionIntent::SyncService {
        service_arn: row.arn.clone(),
        restart,
    });
    Ok(ServiceResponse {
        service: view::service(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteServiceRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    #[serde(default)]
    pub force: bool,
}

pub async fn delete_service(state: AppState, req: DeleteServiceRequest) -> Result<ServiceResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let reference = req
        .service
        .as_deref()
        .ok_or_else(|| ApiError::InvalidParameter("service must not be empty".to_string()))?;
    let mut row = resolve_service(&state, &cluster.arn, reference).await?;

    if row.desired_count > 0 && !req.force {
        return Err(ApiError::InvalidParameter(format!(
            "service {} has a desiredCount of {}; scale to zero or use force",
            row.name, row.desired_count
        )));
    }

    row.status = ServiceStatus::Draining;
    row.desired_count = 0;
    state.storage.services.update(&row).await?;
    state.intents.send(ProjectionIntent::DeleteService {
        service_arn: row.arn.clone(),
    });
    tracing::info!(service = %row.name, cluster = %cluster.name, "service draining for deletion");
    Ok(ServiceResponse {
        service: view::service(&row),
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DescribeServicesRequest {
    pub cluster: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeServicesResponse {
    pub services: Vec<Service>,
    pub failures: Vec<Failure>,
}

pub async fn describe_services(
    state: AppState,
    req: DescribeServicesRequest,
) -> Result<DescribeServicesResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    if req.services.is_empty() {
        return Err(ApiError::InvalidParameter(
            "services must not be empty".to_string(),
        ));
    }
    let mut services = Vec::new();
    let mut failures = Vec::new();
    for reference in &req.services {
        let name = short_name(reference);
        match state.storage.services.get(&cluster.arn, name).await? {
            Some(row) => {
                let mut service = view::service(&row);
                let events = state.storage.service_events.list(&row.arn, 100).await?;
                service.events = events.iter().map(view::service_event).collect();
                match row.deployment_controller_type {
                    DeploymentControllerType::External => {
                        let task_sets = state.storage.task_sets.list(&row.arn).await?;
                        service.task_sets = task_sets.iter().map(view::task_set).collect();
                    }
                    _ => service.deployments = vec![view::primary_deployment(&row)],
                }
                services.push(service);
            }
            // Deleted or never-created services come back as failures, not
            // as a top-level error.
            None => failures.push(Failure::missing(state.arns.service(&cluster.name, name))),
        }
    }
    Ok(DescribeServicesResponse { services, failures })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListServicesRequest {
    pub cluster: Option<String>,
    pub launch_type: Option<String>,
    pub scheduling_strategy: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListServicesResponse {
    pub service_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

pub async fn list_services(state: AppState, req: ListServicesRequest) -> Result<ListServicesResponse> {
    let cluster = resolve_cluster(&state, req.cluster.as_deref()).await?;
    let limit = pagination::page_size(req.max_results)?;
    let offset = pagination::offset(req.next_token.as_deref())?;
    let filter = ServiceFilter {
        launch_type: req
            .launch_type
            .as_deref()
            .map(|raw| {
                parse_launch_type(&Some(raw.to_string())).map(|lt| lt.as_str().to_string())
            })
            .transpose()?,
        scheduling_strategy: req
            .scheduling_strategy
            .as_deref()
            .map(|raw| {
                parse_scheduling_strategy(&Some(raw.to_string())).map(|s| s.as_str().to_string())
            })
            .transpose()?,
    };
    let rows = state
        .storage
        .services
        .list(&cluster.arn, &filter, limit, offset)
        .await?;
    let next_token = pagination::next_token(offset, rows.len(), limit);
    Ok(ListServicesResponse {
        service_arns: rows.into_iter().map(|r| r.arn).collect(),
        next_token,
    })
}
