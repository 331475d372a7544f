//! ARN construction and parsing. Every API input that names an entity may
//! use either the short name or the full ARN; these helpers normalize both.

use crate::error::{ApiError, Result};

#[derive(Clone, Debug)]
pub struct ArnBuilder {
    pub region: String,
    pub account_id: String,
}

impl ArnBuilder {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        ArnBuilder {
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    fn prefix(&self) -> String {
        format!("arn:aws:ecs:{}:{}", self.region, self.account_id)
    }

    pub fn cluster(&self, name: &str) -> String {
        format!("{}:cluster/{name}", self.prefix())
    }

    pub fn service(&self, cluster_name: &str, name: &str) -> String {
        format!("{}:service/{cluster_name}/{name}", self.prefix())
    }

    pub fn task(&self, cluster_name: &str, id: &str) -> String {
        format!("{}:task/{cluster_name}/{id}", self.prefix())
    }

    pub fn task_definition(&self, family: &str, revision: i64) -> String {
        format!("{}:task-definition/{family}:{revision}", self.prefix())
    }

    /// Prefix matching every revision of a family, for LIKE filters.
    pub fn task_definition_family_prefix(&self, family: &str) -> String {
        format!("{}:task-definition/{family}:", self.prefix())
    }

    pub fn task_set(&self, cluster_name: &str, service_name: &str, id: &str) -> String {
        format!("{}:task-set/{cluster_name}/{service_name}/{id}", self.prefix())
    }
}

pub fn is_arn(s: &str) -> bool {
    s.starts_with("arn:")
}

/// Short name from a name-or-ARN input (the qualifier after the last `/`).
pub fn short_name(input: &str) -> &str {
    if is_arn(input) {
        input.rsplit('/').next().unwrap_or(input)
    } else {
        input
    }
}

/// Splits a task-definition reference (`family`, `family:revision`, or full
/// ARN) into family and optional revision.
pub fn split_family_revision(input: &str) -> Result<(String, Option<i64>)> {
    let qualifier = if is_arn(input) {
        input
            .split_once("task-definition/")
            .map(|(_, q)| q)
            .ok_or_else(|| {
                ApiError::InvalidParameter(format!("invalid task definition ARN: {input}"))
            })?
    } else {
        input
    };
    match qualifier.rsplit_once(':') {
        Some((family, revision)) => {
            let revision: i64 = revision.parse().map_err(|_| {
                ApiError::InvalidParameter(format!("invalid task definition revision: {input}"))
            })?;
            if family.is_empty() {
                return Err(ApiError::InvalidParameter(format!(
                    "invalid task definition: {input}"
                )));
            }
            Ok((family.to_string(), Some(revision)))
        }
        None => Ok((qualifier.to_string(), None)),
    }
}

/// Validates names used as Kubernetes object name components.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ApiError::InvalidParameter(format!("{kind} must not be empty")));
    }
    if name.len() > 255 {
        return Err(ApiError::InvalidParameter(format!(
            "{kind} must be at most 255 characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::InvalidParameter(format!(
            "{kind} may only contain letters, numbers, hyphens and underscores"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arns() -> ArnBuilder {
        ArnBuilder::new("us-east-1", "000000000000")
    }

    #[test]
    fn arn_formats_are_stable() {
        let b = arns();
        assert_eq!(
            b.cluster("c1"),
            "arn:aws:ecs:us-east-1:000000000000:cluster/c1"
        );
        assert_eq!(
            b.service("c1", "web"),
            "arn:aws:ecs:us-east-1:000000000000:service/c1/web"
        );
        assert_eq!(
            b.task_definition("nginx", 1),
            "arn:aws:ecs:us-east-1:000000000000:task-definition/nginx:1"
        );
    }

    #[test]
    fn short_name_accepts_both_forms() {
        assert_eq!(short_name("c1"), "c1");
        assert_eq!(short_name("arn:aws:ecs:us-east-1:000000000000:cluster/c1"), "c1");
        assert_eq!(
            short_name("arn:aws:ecs:us-east-1:000000000000:service/c1/web"),
            "web"
        );
    }

    #[test]
    fn family_revision_parsing() {
        assert_eq!(
            split_family_revision("nginx").unwrap(),
            ("nginx".to_string(), None)
        );
        assert_eq!(
            split_family_revision("nginx:2").unwrap(),
            ("nginx".to_string(), Some(2))
        );
        assert_eq!(
            split_family_revision("arn:aws:ecs:us-east-1:000000000000:task-definition/nginx:7")
                .unwrap(),
            ("nginx".to_string(), Some(7))
        );
        assert!(split_family_revision("nginx:latest").is_err());
        assert!(split_family_revision(":3").is_err());
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("clusterName", "my-cluster_1").is_ok());
        assert!(validate_name("clusterName", "").is_err());
        assert!(validate_name("clusterName", "bad name").is_err());
        assert!(validate_name("clusterName", "bad/name").is_err());
    }
}
