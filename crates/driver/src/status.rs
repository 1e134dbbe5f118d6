//! Writes attachment results back into a claim's `status.devices[0]` slot.

use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use k8s_openapi::api::resource::v1beta1::AllocatedDeviceStatus;
use k8s_openapi::api::resource::v1beta1::NetworkDeviceData;
use k8s_openapi::api::resource::v1beta1::ResourceClaim;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::cni::CniResult;
use crate::k8s::report_err;
use crate::k8s::ClaimStore;

/// Accumulated raw plugin results, kept opaque in the claim status for
/// auditing.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ResultHistory {
    results: Vec<Value>,
}

/// Merges attachment results into the claim's persisted status.
pub struct StatusWriter {
    store: Arc<dyn ClaimStore>,
}

impl StatusWriter {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self { store }
    }

    /// Appends `result` to the claim's result history and network-data
    /// summary, then persists the status. The claim is re-fetched first so
    /// the merge applies to the latest object; a conflict reported by the
    /// API server is the caller's error.
    pub async fn update(&self, claim: &ResourceClaim, result: &Value) -> Result<()> {
        let name = claim.metadata.name.as_deref().context("claim has no name")?;
        let namespace = claim
            .metadata
            .namespace
            .as_deref()
            .context("claim has no namespace")?;

        let mut fresh = self
            .store
            .get_claim(namespace, name)
            .await
            .map_err(report_err)?;

        merge_result(&mut fresh, result)?;

        self.store
            .update_claim_status(&fresh)
            .await
            .map_err(report_err)?;
        Ok(())
    }
}

/// Folds one raw plugin result into the claim's device status slot.
pub(crate) fn merge_result(claim: &mut ResourceClaim, result: &Value) -> Result<()> {
    let parsed: CniResult =
        serde_json::from_value(result.clone()).context("failed to decode CNI result")?;

    let status = claim.status.as_mut().context("claim has no status")?;
    let identity = status
        .allocation
        .as_ref()
        .and_then(|allocation| allocation.devices.as_ref())
        .and_then(|devices| devices.results.as_ref())
        .and_then(|results| results.first())
        .context("claim has no allocation device result")?
        .clone();

    let devices = status.devices.get_or_insert_with(Vec::new);

    let mut history = ResultHistory::default();
    if let Some(data) = devices.first().and_then(|device| device.data.as_ref()) {
        match serde_json::from_value::<ResultHistory>(data.0.clone()) {
            Ok(previous) => history = previous,
            Err(err) => info!("failed to decode previous result history, starting fresh: {err}"),
        }
    }
    history.results.push(result.clone());
    let payload = RawExtension(
        serde_json::to_value(&history).context("failed to serialize result history")?,
    );

    let summary = network_data(&parsed);
    match devices.first_mut() {
        Some(device) => {
            device.data = Some(payload);
            merge_network_data(
                device.network_data.get_or_insert_with(Default::default),
                summary,
            );
        }
        None => {
            devices.push(AllocatedDeviceStatus {
                driver: identity.driver,
                pool: identity.pool,
                device: identity.device,
                data: Some(payload),
                network_data: Some(summary),
                ..Default::default()
            });
        }
    }

    Ok(())
}

/// Summarizes one parsed result: every address, plus name/MAC of the
/// sandbox-side interface (interfaces without a sandbox marker are host
/// ends).
fn network_data(result: &CniResult) -> NetworkDeviceData {
    let mut data = NetworkDeviceData::default();

    for ip in result.ips.as_deref().unwrap_or_default() {
        data.ips
            .get_or_insert_with(Vec::new)
            .push(ip.address.clone());
    }

    for interface in result.interfaces.as_deref().unwrap_or_default() {
        if interface.sandbox.is_some() {
            data.interface_name = Some(interface.name.clone());
            data.hardware_address = interface.mac.clone();
        }
    }

    data
}

fn merge_network_data(existing: &mut NetworkDeviceData, addition: NetworkDeviceData) {
    if let Some(ips) = addition.ips {
        existing.ips.get_or_insert_with(Vec::new).extend(ips);
    }
    if let Some(name) = addition.interface_name.as_deref() {
        merge_joined(&mut existing.interface_name, name);
    }
    if let Some(mac) = addition.hardware_address.as_deref() {
        merge_joined(&mut existing.hardware_address, mac);
    }
}

/// Appends `addition` to a comma-joined accumulator unless an element equals
/// it exactly. Element-wise comparison, so one interface name being a
/// substring of another never suppresses the append.
fn merge_joined(existing: &mut Option<String>, addition: &str) {
    if addition.is_empty() {
        return;
    }
    match existing {
        Some(joined) if !joined.is_empty() => {
            if !joined.split(',').any(|element| element == addition) {
                joined.push(',');
                joined.push_str(addition);
            }
        }
        _ => *existing = Some(addition.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::testing::allocated_claim;
    use crate::testing::attachment_parameters;
    use crate::testing::cni_result;
    use crate::testing::MemoryStore;
    use crate::testing::TEST_NAMESPACE;

    const DRIVER: &str = "net.example";

    fn device(claim: &ResourceClaim) -> &AllocatedDeviceStatus {
        &claim.status.as_ref().unwrap().devices.as_ref().unwrap()[0]
    }

    #[test]
    fn first_merge_creates_the_device_status_slot() {
        let mut claim =
            allocated_claim("c", "u", DRIVER, "pod-u", attachment_parameters("net1"));
        merge_result(
            &mut claim,
            &cni_result("10.0.0.5/24", "net1", "aa:bb:cc:dd:ee:ff"),
        )
        .unwrap();

        let device = device(&claim);
        assert_eq!(device.driver, DRIVER);
        assert_eq!(device.pool, "p0");
        assert_eq!(device.device, "eth0");

        let network_data = device.network_data.as_ref().unwrap();
        assert_eq!(network_data.ips.as_deref(), Some(&["10.0.0.5/24".to_string()][..]));
        assert_eq!(network_data.interface_name.as_deref(), Some("net1"));
        assert_eq!(
            network_data.hardware_address.as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn consecutive_merges_accumulate_history_and_addresses() {
        let mut claim =
            allocated_claim("c", "u", DRIVER, "pod-u", attachment_parameters("net1"));
        let r1 = cni_result("10.0.0.5/24", "net1", "aa:bb:cc:dd:ee:01");
        let r2 = cni_result("10.0.1.9/24", "net2", "aa:bb:cc:dd:ee:02");

        merge_result(&mut claim, &r1).unwrap();
        merge_result(&mut claim, &r2).unwrap();

        let device = device(&claim);
        let history: ResultHistory =
            serde_json::from_value(device.data.as_ref().unwrap().0.clone()).unwrap();
        assert_eq!(history.results, vec![r1, r2]);

        let network_data = device.network_data.as_ref().unwrap();
        assert_eq!(
            network_data.ips.as_deref(),
            Some(&["10.0.0.5/24".to_string(), "10.0.1.9/24".to_string()][..])
        );
        assert_eq!(network_data.interface_name.as_deref(), Some("net1,net2"));
    }

    #[test]
    fn repeated_interface_name_is_not_duplicated() {
        let mut claim =
            allocated_claim("c", "u", DRIVER, "pod-u", attachment_parameters("net1"));
        let result = cni_result("10.0.0.5/24", "net1", "aa:bb:cc:dd:ee:ff");

        merge_result(&mut claim, &result).unwrap();
        merge_result(&mut claim, &result).unwrap();

        let network_data = device(&claim).network_data.as_ref().unwrap();
        assert_eq!(network_data.interface_name.as_deref(), Some("net1"));
        assert_eq!(
            network_data.hardware_address.as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn substring_interface_name_is_still_appended() {
        // "net1" is a substring of "net10"; element-wise comparison must not
        // suppress it.
        let mut claim =
            allocated_claim("c", "u", DRIVER, "pod-u", attachment_parameters("net1"));
        merge_result(
            &mut claim,
            &cni_result("10.0.0.5/24", "net10", "aa:bb:cc:dd:ee:01"),
        )
        .unwrap();
        merge_result(
            &mut claim,
            &cni_result("10.0.1.9/24", "net1", "aa:bb:cc:dd:ee:02"),
        )
        .unwrap();

        let network_data = device(&claim).network_data.as_ref().unwrap();
        assert_eq!(network_data.interface_name.as_deref(), Some("net10,net1"));
    }

    #[test]
    fn corrupt_history_starts_fresh_instead_of_failing() {
        let mut claim =
            allocated_claim("c", "u", DRIVER, "pod-u", attachment_parameters("net1"));
        let r1 = cni_result("10.0.0.5/24", "net1", "aa:bb:cc:dd:ee:ff");
        merge_result(&mut claim, &r1).unwrap();

        claim.status.as_mut().unwrap().devices.as_mut().unwrap()[0].data =
            Some(RawExtension(json!("not a history")));

        let r2 = cni_result("10.0.1.9/24", "net2", "aa:bb:cc:dd:ee:02");
        merge_result(&mut claim, &r2).unwrap();

        let history: ResultHistory =
            serde_json::from_value(device(&claim).data.as_ref().unwrap().0.clone()).unwrap();
        assert_eq!(history.results, vec![r2]);
    }

    #[tokio::test]
    async fn update_persists_against_the_freshly_fetched_claim() {
        let store = Arc::new(MemoryStore::new());
        let claim =
            allocated_claim("c", "u", DRIVER, "pod-u", attachment_parameters("net1"));
        store.insert_claim(claim.clone());

        let writer = StatusWriter::new(store.clone());
        writer
            .update(&claim, &cni_result("10.0.0.5/24", "net1", "aa:bb:cc:dd:ee:ff"))
            .await
            .unwrap();

        let stored = store.claim(TEST_NAMESPACE, "c").unwrap();
        let network_data = device(&stored).network_data.as_ref().unwrap();
        assert_eq!(
            network_data.ips.as_deref(),
            Some(&["10.0.0.5/24".to_string()][..])
        );
    }

    #[tokio::test]
    async fn update_fails_when_the_claim_is_gone() {
        let store = Arc::new(MemoryStore::new());
        let claim =
            allocated_claim("c", "u", DRIVER, "pod-u", attachment_parameters("net1"));

        let writer = StatusWriter::new(store);
        let err = writer
            .update(&claim, &cni_result("10.0.0.5/24", "net1", "aa:bb:cc:dd:ee:ff"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("resource claim 'c'"));
    }
}
