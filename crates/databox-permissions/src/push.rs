use databox_client::{BatchReport, PolicyEngine, best_effort};
use databox_manifest::PermissionGrant;
use tracing::{debug, warn};

/// Push every grant concurrently; returns once all pushes settled.
///
/// Grants are not retried. Failures are logged and reported.
pub async fn push_all(policy: &dyn PolicyEngine, grants: &[PermissionGrant]) -> BatchReport {
    let tasks = grants
        .iter()
        .map(|grant| (grant.to_string(), policy.grant_container_permissions(grant)))
        .collect();
    let report = best_effort(tasks).await;

    for (grant, error) in report.failures() {
        warn!(%grant, %error, "permission push failed");
    }
    debug!(pushed = report.succeeded(), total = grants.len(), "permissions pushed");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use databox_client::{PolicyCall, RecordingPolicyEngine};
    use databox_manifest::HttpMethod;

    #[tokio::test]
    async fn one_rejected_grant_does_not_stop_the_others() {
        let policy = RecordingPolicyEngine::new();
        policy.fail_when(|c| matches!(c, PolicyCall::Grant(g) if g.route.path == "/ws"));
        let grants = vec![
            PermissionGrant::new("app-a", "store", "/status", HttpMethod::Get),
            PermissionGrant::new("app-a", "store", "/ws", HttpMethod::Get),
            PermissionGrant::new("app-a", "store", "/*", HttpMethod::Post),
        ];

        let report = push_all(&policy, &grants).await;

        assert_eq!(policy.grants(), grants);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(
            report.failures().map(|(g, _)| g).collect::<Vec<_>>(),
            vec!["app-a -> GET store/ws"]
        );
    }
}
