//! Shared index of resource claims prepared per pod sandbox.

use dashmap::DashMap;
use k8s_openapi::api::resource::v1beta1::ResourceClaim;

/// Concurrent map from pod UID to the claims prepared for it.
///
/// Written by the preparation handler (one insert per `reservedFor` consumer)
/// and read by the sandbox lifecycle bridge. Append order is preserved per
/// owner so the plugin chain runs in a reproducible order. Guards are never
/// held across awaits; readers get clones.
#[derive(Default)]
pub struct ClaimIndex {
    claims: DashMap<String, Vec<ResourceClaim>>,
}

impl ClaimIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `claim` under `owner_uid`. Re-preparing the same claim is a
    /// no-op; entries are never silently overwritten. Returns false when the
    /// claim was already present.
    pub fn add(&self, owner_uid: &str, claim: ResourceClaim) -> bool {
        let claim_uid = claim.metadata.uid.clone();
        let mut entry = self.claims.entry(owner_uid.to_string()).or_default();
        if entry
            .iter()
            .any(|existing| existing.metadata.uid == claim_uid)
        {
            return false;
        }
        entry.push(claim);
        true
    }

    /// Returns the claims currently indexed for `owner_uid`, in append order,
    /// without removing them.
    pub fn get(&self, owner_uid: &str) -> Vec<ResourceClaim> {
        self.claims
            .get(owner_uid)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// True when a claim with `claim_name` is already indexed for `owner_uid`.
    pub fn contains_claim_named(&self, owner_uid: &str, claim_name: &str) -> bool {
        self.claims.get(owner_uid).is_some_and(|entry| {
            entry
                .iter()
                .any(|claim| claim.metadata.name.as_deref() == Some(claim_name))
        })
    }

    /// Drops the whole entry for `owner_uid`.
    pub fn delete(&self, owner_uid: &str) {
        self.claims.remove(owner_uid);
    }

    /// Removes the claim with `claim_uid` from every owner's list, dropping
    /// owners left empty. Backs the unprepare path, where only the claim is
    /// known.
    pub fn remove_claim(&self, claim_uid: &str) {
        self.claims.retain(|_, claims| {
            claims.retain(|claim| claim.metadata.uid.as_deref() != Some(claim_uid));
            !claims.is_empty()
        });
    }
}
