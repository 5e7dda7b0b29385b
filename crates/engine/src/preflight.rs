//! Pre-flight check of organization properties and secrets a scenario expects.
//!
//! The report is advisory; callers decide whether missing items block a run.

use demoforge_api::ApiError;
use futures_util::future::try_join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::Platform;

/// Names only; secret values are never fetched into the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightReport {
    pub org_id: String,
    pub present_properties: Vec<String>,
    pub present_secrets: Vec<String>,
    pub missing_properties: Vec<String>,
    pub missing_secrets: Vec<String>,
}

impl PreflightReport {
    pub fn is_satisfied(&self) -> bool {
        self.missing_properties.is_empty() && self.missing_secrets.is_empty()
    }
}

/// Query every name at organization scope and partition into present and missing.
pub async fn check_preflight(platform: &dyn Platform, org_id: &str, properties: &[String], secrets: &[String]) -> Result<PreflightReport, ApiError> {
    let lookups = properties
        .iter()
        .map(|name| (name, false))
        .chain(secrets.iter().map(|name| (name, true)))
        .map(|(name, secret)| async move {
            let found = platform.get_organization_property(org_id, name).await?;
            Ok::<_, ApiError>((name.clone(), secret, found.is_some()))
        });
    let results = try_join_all(lookups).await?;

    let mut report = PreflightReport {
        org_id: org_id.to_string(),
        ..Default::default()
    };
    for (name, secret, present) in results {
        let bucket = match (secret, present) {
            (false, true) => &mut report.present_properties,
            (false, false) => &mut report.missing_properties,
            (true, true) => &mut report.present_secrets,
            (true, false) => &mut report.missing_secrets,
        };
        bucket.push(name);
    }
    debug!(
        org = %org_id,
        missing_properties = report.missing_properties.len(),
        missing_secrets = report.missing_secrets.len(),
        "pre-flight check finished"
    );
    Ok(report)
}

/// Create the missing items of `report` for which `values` supplies a value. Returns the names
/// created; missing items without a value are left alone.
pub async fn create_missing(platform: &dyn Platform, report: &PreflightReport, values: &IndexMap<String, String>) -> Result<Vec<String>, ApiError> {
    let pending: Vec<(&String, &String, bool)> = report
        .missing_properties
        .iter()
        .map(|name| (name, false))
        .chain(report.missing_secrets.iter().map(|name| (name, true)))
        .filter_map(|(name, secret)| values.get(name).map(|value| (name, value, secret)))
        .collect();

    try_join_all(pending.into_iter().map(|(name, value, secret)| async move {
        platform.create_organization_property(&report.org_id, name, value, secret).await?;
        Ok::<_, ApiError>(name.clone())
    }))
    .await
}
