use k8s_openapi::api::resource::v1beta1::DeviceRequestAllocationResult;
use k8s_openapi::api::resource::v1beta1::OpaqueDeviceConfiguration;
use k8s_openapi::api::resource::v1beta1::ResourceClaim;
use tracing::debug;
use tracing::warn;

use crate::index::ClaimIndex;
use crate::k8s::POD_RESOURCE;

/// View into the single allocation slot of a claim this driver handles.
pub struct OwnedClaim<'a> {
    pub result: &'a DeviceRequestAllocationResult,
    pub config: &'a OpaqueDeviceConfiguration,
}

/// Outcome of the ownership check. `NotMine` is a silent skip, never an
/// error: callers must not mistake it for "verified and empty".
pub enum ClaimOwnership<'a> {
    Owned(OwnedClaim<'a>),
    NotMine,
}

/// A claim belongs to this driver only when its allocation carries exactly
/// one device result and exactly one opaque device config, both under the
/// driver's name. Any other shape is someone else's claim.
pub fn evaluate_ownership<'a>(claim: &'a ResourceClaim, driver_name: &str) -> ClaimOwnership<'a> {
    let Some(devices) = claim
        .status
        .as_ref()
        .and_then(|status| status.allocation.as_ref())
        .and_then(|allocation| allocation.devices.as_ref())
    else {
        return ClaimOwnership::NotMine;
    };

    let results = devices.results.as_deref().unwrap_or_default();
    let [result] = results else {
        return ClaimOwnership::NotMine;
    };
    if result.driver != driver_name {
        return ClaimOwnership::NotMine;
    }

    let configs: Vec<&OpaqueDeviceConfiguration> = devices
        .config
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|config| config.opaque.as_ref())
        .collect();
    let [config] = configs[..] else {
        return ClaimOwnership::NotMine;
    };
    if config.driver != driver_name {
        return ClaimOwnership::NotMine;
    }

    ClaimOwnership::Owned(OwnedClaim { result, config })
}

/// Indexes an owned claim under every pod recorded in its `reservedFor`
/// list. Consumers of unsupported kinds are logged and skipped without
/// failing the claim. Returns false when the claim is not handled by this
/// driver (and nothing was indexed).
pub fn index_owned_claim(index: &ClaimIndex, driver_name: &str, claim: &ResourceClaim) -> bool {
    if let ClaimOwnership::NotMine = evaluate_ownership(claim, driver_name) {
        return false;
    }

    let reserved_for = claim
        .status
        .as_ref()
        .and_then(|status| status.reserved_for.as_deref())
        .unwrap_or_default();

    for consumer in reserved_for {
        let core_group = consumer.api_group.as_deref().unwrap_or_default().is_empty();
        if core_group && consumer.resource == POD_RESOURCE {
            if index.add(&consumer.uid, claim.clone()) {
                debug!(
                    claim = claim.metadata.name.as_deref().unwrap_or_default(),
                    owner_uid = %consumer.uid,
                    "indexed claim for pod"
                );
            }
        } else {
            warn!(
                claim = claim.metadata.name.as_deref().unwrap_or_default(),
                resource = %consumer.resource,
                api_group = consumer.api_group.as_deref().unwrap_or_default(),
                "skipping unsupported claim consumer kind"
            );
        }
    }

    true
}
