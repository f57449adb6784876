//! Tag-filter driven resource discovery, fanned out across regions (§4.2).
//!
//! Grounded on the teacher's `filter_resources_by_tags.rs`, generalised from
//! a single tag key/value pair to the engine's full tag-filter map, and from
//! "query the host region" to fan-out across `Config.regions`.

use std::collections::BTreeMap;

use aws_sdk_resourcegroupstagging::types::TagFilter;
use aws_sdk_resourcegroupstagging::Client as TaggingClient;
use tracing::{debug, info};

use crate::model::{DiscoveredResource, ResourceType, DEFAULT_GROUP, DEFAULT_PRIORITY};

const PRIORITY_TAG: &str = "lights-out:priority";
const GROUP_TAG: &str = "lights-out:group";

/// Discover every resource across the given regions matching every tag
/// filter and any of the given resource-type filters.
///
/// If `regions` is empty, discovery runs once against the host region the
/// passed-in client is already configured for. Any single region's failure
/// aborts the whole discovery (§4.2: "this is a deliberate fail-fast
/// choice").
pub async fn discover_resources(
    client_for_region: impl Fn(&str) -> TaggingClient,
    host_client: &TaggingClient,
    host_region: &str,
    tag_filters: &BTreeMap<String, String>,
    resource_types: &[String],
    regions: &[String],
) -> anyhow::Result<Vec<DiscoveredResource>> {
    let mut all = Vec::new();

    if regions.is_empty() {
        let mut found = discover_in_region(host_client, host_region, tag_filters, resource_types).await?;
        all.append(&mut found);
        return Ok(all);
    }

    for region in regions {
        let client = client_for_region(region);
        let mut found = discover_in_region(&client, region, tag_filters, resource_types).await?;
        all.append(&mut found);
    }

    Ok(all)
}

/// Run one region's tag-filtered search, paging through the continuation
/// token until exhausted, and translate each result into a
/// [`DiscoveredResource`].
async fn discover_in_region(
    client: &TaggingClient,
    region: &str,
    tag_filters: &BTreeMap<String, String>,
    resource_types: &[String],
) -> anyhow::Result<Vec<DiscoveredResource>> {
    let filters: Vec<TagFilter> = tag_filters
        .iter()
        .map(|(key, value)| TagFilter::builder().key(key).values(value).build())
        .collect();

    let mut resources = Vec::new();
    let mut pagination_token: Option<String> = None;

    loop {
        let mut request = client.get_resources().set_tag_filters(Some(filters.clone()));
        for rt in resource_types {
            request = request.resource_type_filters(rt);
        }
        if let Some(ref token) = pagination_token {
            request = request.pagination_token(token);
        }

        let response = request.send().await.map_err(|e| {
            anyhow::anyhow!("tag search failed in region {region}: {e}")
        })?;

        for mapping in response.resource_tag_mapping_list() {
            let Some(arn) = mapping.resource_arn() else {
                continue;
            };

            let tags: BTreeMap<String, String> = mapping
                .tags()
                .iter()
                .filter_map(|t| match (t.key(), t.value()) {
                    (Some(k), Some(v)) => Some((k.to_string(), v.to_string())),
                    _ => None,
                })
                .collect();

            match resource_from_arn(arn, tags) {
                Some(resource) => resources.push(resource),
                None => debug!(arn = %arn, "Discovered ARN did not match any recognised resource type"),
            }
        }

        match response.pagination_token() {
            Some(token) if !token.is_empty() => pagination_token = Some(token.to_string()),
            _ => break,
        }
    }

    info!(region = %region, count = resources.len(), "Discovery complete for region");
    Ok(resources)
}

/// Translate one tagged ARN into a [`DiscoveredResource`], per the
/// ARN-kind rules in §4.2. Returns `None` for ARN shapes outside the
/// closed resource-type set.
fn resource_from_arn(arn: &str, tags: BTreeMap<String, String>) -> Option<DiscoveredResource> {
    let segments: Vec<&str> = arn.splitn(6, ':').collect();
    let service = segments.get(2).copied().unwrap_or_default();
    let resource_part = segments.get(5).copied().unwrap_or_default();

    let (resource_type, resource_id, cluster_name) = match service {
        "ecs" if resource_part.starts_with("service/") => {
            let (cluster, service_name) = extract_ecs_names(resource_part);
            (ResourceType::EcsService, format!("{cluster}/{service_name}"), Some(cluster))
        }
        "rds" if resource_part.starts_with("db:") => {
            (ResourceType::RdsDb, resource_part.trim_start_matches("db:").to_string(), None)
        }
        "rds" if resource_part.starts_with("cluster:") => (
            ResourceType::RdsCluster,
            resource_part.trim_start_matches("cluster:").to_string(),
            None,
        ),
        "autoscaling" if resource_part.starts_with("autoScalingGroupName/") => (
            ResourceType::AutoscalingGroup,
            resource_part.trim_start_matches("autoScalingGroupName/").to_string(),
            None,
        ),
        _ => return None,
    };

    let priority = tags
        .get(PRIORITY_TAG)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(DEFAULT_PRIORITY);

    let group = tags.get(GROUP_TAG).cloned().unwrap_or_else(|| DEFAULT_GROUP.to_string());

    let mut metadata = serde_json::Map::new();
    if let Some(cluster) = cluster_name {
        metadata.insert("cluster_name".to_string(), serde_json::Value::String(cluster));
    }

    Some(DiscoveredResource {
        resource_type,
        arn: arn.to_string(),
        resource_id,
        priority,
        group,
        tags,
        metadata,
    })
}

/// Pull `(cluster, service)` out of an ECS service ARN's resource part
/// (`service/cluster-name/service-name`), falling back to cluster
/// `"default"` when only the service segment is present (§4.2).
fn extract_ecs_names(resource_part: &str) -> (String, String) {
    let parts: Vec<&str> = resource_part.split('/').collect();
    match parts.as_slice() {
        ["service", cluster, service] => (cluster.to_string(), service.to_string()),
        ["service", service] => ("default".to_string(), service.to_string()),
        _ => ("default".to_string(), resource_part.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecs_service_arn_with_cluster_segment() {
        let r = resource_from_arn(
            "arn:aws:ecs:us-east-1:123456789012:service/my-cluster/my-service",
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(r.resource_type, ResourceType::EcsService);
        assert_eq!(r.resource_id, "my-cluster/my-service");
        assert_eq!(r.metadata.get("cluster_name").unwrap(), "my-cluster");
    }

    #[test]
    fn ecs_service_arn_without_cluster_segment_falls_back_to_default() {
        let r = resource_from_arn(
            "arn:aws:ecs:us-east-1:123456789012:service/my-service",
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(r.resource_id, "default/my-service");
    }

    #[test]
    fn rds_instance_arn() {
        let r = resource_from_arn("arn:aws:rds:us-east-1:123456789012:db:my-db", BTreeMap::new()).unwrap();
        assert_eq!(r.resource_type, ResourceType::RdsDb);
        assert_eq!(r.resource_id, "my-db");
    }

    #[test]
    fn rds_cluster_arn() {
        let r =
            resource_from_arn("arn:aws:rds:us-east-1:123456789012:cluster:my-cluster", BTreeMap::new()).unwrap();
        assert_eq!(r.resource_type, ResourceType::RdsCluster);
        assert_eq!(r.resource_id, "my-cluster");
    }

    #[test]
    fn asg_arn() {
        let r = resource_from_arn(
            "arn:aws:autoscaling:us-east-1:123456789012:autoScalingGroupName/my-asg",
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(r.resource_type, ResourceType::AutoscalingGroup);
        assert_eq!(r.resource_id, "my-asg");
    }

    #[test]
    fn unrecognised_arn_shape_yields_none() {
        assert!(resource_from_arn("arn:aws:s3:::my-bucket", BTreeMap::new()).is_none());
    }

    #[test]
    fn priority_tag_parses_or_defaults() {
        let mut tags = BTreeMap::new();
        tags.insert(PRIORITY_TAG.to_string(), "10".to_string());
        let r = resource_from_arn("arn:aws:rds:us-east-1:123456789012:db:my-db", tags).unwrap();
        assert_eq!(r.priority, 10);

        let mut bad_tags = BTreeMap::new();
        bad_tags.insert(PRIORITY_TAG.to_string(), "not-a-number".to_string());
        let r2 = resource_from_arn("arn:aws:rds:us-east-1:123456789012:db:my-db", bad_tags).unwrap();
        assert_eq!(r2.priority, DEFAULT_PRIORITY);
    }
}
