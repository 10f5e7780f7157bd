//! Storage Management REST Adapter
//!
//! Talks to the ONTAP-style JSON management API of an appliance: LUN,
//! volume, aggregate and snapshot queries, size patches, snapshot deletion
//! and cluster job status. All list queries follow `_links.next`.

use crate::config::ApplianceConfig;
use crate::domain::ports::{
    JobHandle, JobStatus, LunUsage, Provisioning, SnapshotRecord, VolumeUsage, MIB,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const LUN_FIELDS: &str = "uuid,name,location.logical_unit,location.volume.name,location.volume.uuid,space.size,space.used,space.guarantee.reserved";
const VOLUME_FIELDS: &str = "uuid,name,space.size,space.available,guarantee.type,clone.is_flexclone,clone.parent_snapshot.name";
const SNAPSHOT_FIELDS: &str = "uuid,name,create_time,size";
const AGGREGATE_FIELDS: &str = "name,uuid,space.block_storage.size";

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for one management endpoint
#[derive(Debug, Clone)]
pub struct OntapConfig {
    /// Appliance name used in errors and logs
    pub appliance: String,
    /// `https://host[:port]`
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Aggregate whose block storage bounds the volumes
    pub aggregate_name: String,
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
}

impl OntapConfig {
    /// Build from appliance settings, resolving the password from the environment
    pub fn from_appliance(config: &ApplianceConfig) -> Result<Self> {
        let endpoint = config.management_endpoint.trim_end_matches('/');
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        };

        Ok(Self {
            appliance: config.name.clone(),
            base_url,
            username: config.username.clone(),
            password: config.password()?,
            aggregate_name: config.aggregate_name.clone(),
            accept_invalid_certs: config.accept_invalid_certs,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    records: Vec<T>,
    #[serde(rename = "_links", default)]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    next: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

#[derive(Debug, Default, Deserialize)]
struct NamedRef {
    uuid: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggregateWire {
    name: String,
    space: Option<AggregateSpaceWire>,
}

#[derive(Debug, Deserialize)]
struct AggregateSpaceWire {
    block_storage: Option<BlockStorageWire>,
}

#[derive(Debug, Deserialize)]
struct BlockStorageWire {
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LunWire {
    uuid: String,
    name: String,
    location: Option<LunLocationWire>,
    space: Option<LunSpaceWire>,
}

#[derive(Debug, Deserialize)]
struct LunLocationWire {
    logical_unit: Option<String>,
    volume: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct LunSpaceWire {
    size: Option<u64>,
    used: Option<u64>,
    guarantee: Option<LunGuaranteeWire>,
}

#[derive(Debug, Deserialize)]
struct LunGuaranteeWire {
    reserved: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct VolumeWire {
    uuid: String,
    name: String,
    space: Option<VolumeSpaceWire>,
    guarantee: Option<VolumeGuaranteeWire>,
    #[serde(rename = "clone")]
    clone_info: Option<VolumeCloneWire>,
}

#[derive(Debug, Deserialize)]
struct VolumeSpaceWire {
    size: Option<u64>,
    available: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VolumeGuaranteeWire {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VolumeCloneWire {
    is_flexclone: Option<bool>,
    parent_snapshot: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct SnapshotWire {
    uuid: String,
    name: String,
    create_time: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JobAccepted {
    job: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct JobWire {
    state: String,
    message: Option<String>,
    error: Option<JobErrorWire>,
}

#[derive(Debug, Deserialize)]
struct JobErrorWire {
    message: Option<String>,
}

// =============================================================================
// Record Conversion
// =============================================================================

fn lun_usage(wire: LunWire) -> Result<LunUsage> {
    let space = wire
        .space
        .ok_or_else(|| Error::precondition(&wire.name, "space figures missing"))?;
    let size_bytes = space
        .size
        .ok_or_else(|| Error::precondition(&wire.name, "space.size missing"))?;
    let (logical_unit, volume) = match wire.location {
        Some(location) => (location.logical_unit, location.volume.unwrap_or_default()),
        None => (None, NamedRef::default()),
    };
    let volume_id = volume
        .uuid
        .ok_or_else(|| Error::precondition(&wire.name, "owning volume missing"))?;
    let reserved = space.guarantee.and_then(|g| g.reserved).unwrap_or(false);

    Ok(LunUsage {
        id: wire.uuid,
        // Reported by logical unit; the full path only when that is absent
        name: logical_unit.unwrap_or(wire.name),
        volume_name: volume.name.unwrap_or_else(|| volume_id.clone()),
        volume_id,
        size_bytes,
        used_bytes: space.used.unwrap_or(0),
        provisioning: Provisioning::from_reserved(reserved),
    })
}

fn volume_usage(wire: VolumeWire) -> Result<VolumeUsage> {
    let space = wire
        .space
        .ok_or_else(|| Error::precondition(&wire.name, "space figures missing"))?;
    let size_bytes = space
        .size
        .ok_or_else(|| Error::precondition(&wire.name, "space.size missing"))?;
    let guarantee = wire
        .guarantee
        .and_then(|g| g.kind)
        .unwrap_or_else(|| "none".to_string());
    let (is_clone, parent_snapshot) = match wire.clone_info {
        Some(clone) => (
            clone.is_flexclone.unwrap_or(false),
            clone.parent_snapshot.and_then(|s| s.name),
        ),
        None => (false, None),
    };

    Ok(VolumeUsage {
        id: wire.uuid,
        name: wire.name,
        size_bytes,
        available_bytes: space.available.unwrap_or(0),
        provisioning: Provisioning::from_volume_guarantee(&guarantee),
        is_clone,
        parent_snapshot: if is_clone { parent_snapshot } else { None },
    })
}

fn snapshot_record(wire: SnapshotWire, volume: &VolumeUsage) -> Result<SnapshotRecord> {
    let create_time = wire
        .create_time
        .ok_or_else(|| Error::precondition(&wire.name, "create_time missing"))?;
    let create_time = DateTime::parse_from_rfc3339(&create_time)?.with_timezone(&Utc);

    Ok(SnapshotRecord {
        id: wire.uuid,
        name: wire.name,
        volume_id: volume.id.clone(),
        volume_name: volume.name.clone(),
        create_time,
        size_bytes: wire.size.unwrap_or(0),
    })
}

fn job_status(wire: JobWire) -> JobStatus {
    match wire.state.as_str() {
        "success" => JobStatus::Success,
        "failure" => JobStatus::Failure(
            wire.error
                .and_then(|e| e.message)
                .or(wire.message)
                .unwrap_or_else(|| "job failed without a message".to_string()),
        ),
        _ => JobStatus::Pending,
    }
}

fn aggregate_size(aggregates: &[AggregateWire], name: &str) -> Option<u64> {
    aggregates
        .iter()
        .find(|a| a.name == name)
        .and_then(|a| a.space.as_ref())
        .and_then(|s| s.block_storage.as_ref())
        .and_then(|b| b.size)
}

/// Keep the records that convert; log and drop the rest
fn convert_all<W, T>(appliance: &str, records: Vec<W>, convert: impl Fn(W) -> Result<T>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| match convert(record) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(appliance = %appliance, "Skipping record: {}", e);
                None
            }
        })
        .collect()
}

// =============================================================================
// Client
// =============================================================================

/// Client for one appliance's management API
pub struct OntapClient {
    config: OntapConfig,
    http: reqwest::Client,
}

impl OntapClient {
    pub fn new(config: OntapConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn appliance(&self) -> &str {
        &self.config.appliance
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.config.base_url, path))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                appliance: self.config.appliance.clone(),
            });
        }
        if !status.is_success() {
            return Err(Error::api_status(endpoint, status.as_u16(), body));
        }
        Ok(body)
    }

    /// GET every page of a collection
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let mut next = Some(path.to_string());

        while let Some(path) = next.take() {
            let body = self.send(self.request(Method::GET, &path), &path).await?;
            let page: Page<T> = serde_json::from_str(&body)?;
            records.extend(page.records);
            next = page.links.and_then(|l| l.next).map(|h| h.href);
        }

        debug!(
            appliance = %self.config.appliance,
            "Fetched {} records from {}",
            records.len(),
            path
        );
        Ok(records)
    }

    /// Raw block-storage size of the configured aggregate; 0 when absent
    pub async fn aggregate_total_bytes(&self) -> Result<u64> {
        let aggregates: Vec<AggregateWire> = self
            .get_all(&format!("/api/storage/aggregates?fields={}", AGGREGATE_FIELDS))
            .await?;

        match aggregate_size(&aggregates, &self.config.aggregate_name) {
            Some(size) => Ok(size),
            None => {
                warn!(
                    appliance = %self.config.appliance,
                    aggregate = %self.config.aggregate_name,
                    "Aggregate not reported; pool checks will be skipped"
                );
                Ok(0)
            }
        }
    }

    pub async fn list_luns(&self) -> Result<Vec<LunUsage>> {
        let records: Vec<LunWire> = self
            .get_all(&format!("/api/storage/luns?fields={}", LUN_FIELDS))
            .await?;
        Ok(convert_all(&self.config.appliance, records, lun_usage))
    }

    pub async fn list_volumes(&self) -> Result<Vec<VolumeUsage>> {
        let records: Vec<VolumeWire> = self
            .get_all(&format!("/api/storage/volumes?fields={}", VOLUME_FIELDS))
            .await?;
        Ok(convert_all(&self.config.appliance, records, volume_usage))
    }

    pub async fn list_snapshots(&self, volume: &VolumeUsage) -> Result<Vec<SnapshotRecord>> {
        let records: Vec<SnapshotWire> = self
            .get_all(&format!(
                "/api/storage/volumes/{}/snapshots?fields={}",
                volume.id, SNAPSHOT_FIELDS
            ))
            .await?;
        Ok(convert_all(&self.config.appliance, records, |wire| {
            snapshot_record(wire, volume)
        }))
    }

    /// PATCH a LUN's size; completes synchronously
    pub async fn patch_lun_size(&self, lun_id: &str, new_size_bytes: u64) -> Result<()> {
        let path = format!("/api/storage/luns/{}", lun_id);
        let request = self
            .request(Method::PATCH, &path)
            .json(&json!({ "space": { "size": new_size_bytes } }));
        self.send(request, &path).await?;
        Ok(())
    }

    /// PATCH a volume's size, returning the resize job
    pub async fn patch_volume_size(&self, volume_id: &str, new_size_mib: u64) -> Result<JobHandle> {
        let path = format!("/api/storage/volumes/{}", volume_id);
        let request = self
            .request(Method::PATCH, &path)
            .json(&json!({ "space": { "size": new_size_mib * MIB } }));
        let body = self.send(request, &path).await?;
        Ok(accepted_job(&body, &path))
    }

    /// DELETE a snapshot, returning the deletion job
    pub async fn delete_snapshot(&self, volume_id: &str, snapshot_id: &str) -> Result<JobHandle> {
        let path = format!("/api/storage/volumes/{}/snapshots/{}", volume_id, snapshot_id);
        let body = self.send(self.request(Method::DELETE, &path), &path).await?;
        Ok(accepted_job(&body, &path))
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let path = format!("/api/cluster/jobs/{}?fields=uuid,state,message,error", job_id);
        let body = self.send(self.request(Method::GET, &path), &path).await?;
        let job: JobWire = serde_json::from_str(&body)?;
        Ok(job_status(job))
    }
}

/// Job handle from a 202 body; an empty body means the change was synchronous
fn accepted_job(body: &str, path: &str) -> JobHandle {
    serde_json::from_str::<JobAccepted>(body)
        .ok()
        .and_then(|accepted| accepted.job)
        .and_then(|job| job.uuid)
        .map(JobHandle::cluster)
        .unwrap_or_else(|| JobHandle::completed(path))
}
