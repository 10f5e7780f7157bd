//! File-System Capacity Adapter
//!
//! Reads and raises the logical storage-capacity quota of a managed file
//! system through its regional JSON control API (AWS JSON 1.1, SigV4).
//! A quota update is tracked through the file system's administrative
//! actions; the job handle carries the file-system id and requested size.

use crate::config::ApplianceConfig;
use crate::controlplane::backends::sigv4::{self, Credentials, SignableRequest};
use crate::domain::ports::{JobHandle, JobStatus};
use crate::error::{Error, Result};
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "fsx";
const TARGET_PREFIX: &str = "AWSSimbaAPIService_v20180301";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const UPDATE_ACTION: &str = "FILE_SYSTEM_UPDATE";

// =============================================================================
// Configuration
// =============================================================================

/// Settings for one file system
#[derive(Debug, Clone)]
pub struct FsxConfig {
    pub appliance: String,
    pub file_system_id: String,
    pub region: String,
    /// Override of `fsx.{region}.amazonaws.com`
    pub endpoint_host: Option<String>,
    pub request_timeout: Duration,
}

impl FsxConfig {
    pub fn from_appliance(config: &ApplianceConfig) -> Self {
        Self {
            appliance: config.name.clone(),
            file_system_id: config.file_system_id.clone(),
            region: config.region.clone(),
            endpoint_host: None,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn host(&self) -> String {
        self.endpoint_host
            .clone()
            .unwrap_or_else(|| format!("fsx.{}.amazonaws.com", self.region))
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeFileSystemsResponse {
    #[serde(default)]
    file_systems: Vec<FileSystemWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileSystemWire {
    file_system_id: String,
    storage_capacity: u64,
    #[serde(default)]
    administrative_actions: Vec<AdministrativeActionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AdministrativeActionWire {
    administrative_action_type: String,
    status: Option<String>,
    target_file_system_values: Option<TargetValuesWire>,
    failure_details: Option<FailureDetailsWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetValuesWire {
    storage_capacity: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FailureDetailsWire {
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateFileSystemRequest<'a> {
    file_system_id: &'a str,
    storage_capacity: u64,
}

/// Status of the quota update targeting `requested` GiB
fn update_status(file_system: &FileSystemWire, requested: u64) -> JobStatus {
    let action = file_system.administrative_actions.iter().find(|a| {
        a.administrative_action_type == UPDATE_ACTION
            && a
                .target_file_system_values
                .as_ref()
                .and_then(|t| t.storage_capacity)
                == Some(requested)
    });

    match action {
        Some(action) => match action.status.as_deref() {
            Some("COMPLETED") | Some("UPDATED_OPTIMIZING") | Some("OPTIMIZING") => JobStatus::Success,
            Some("FAILED") => JobStatus::Failure(
                action
                    .failure_details
                    .as_ref()
                    .and_then(|d| d.message.clone())
                    .unwrap_or_else(|| "storage capacity update failed".to_string()),
            ),
            _ => JobStatus::Pending,
        },
        // Actions age out of the history once finished
        None if file_system.storage_capacity >= requested => JobStatus::Success,
        None => JobStatus::Pending,
    }
}

/// Split a `file-system-id:GiB` job id
fn parse_job_id(id: &str) -> Result<(&str, u64)> {
    id.rsplit_once(':')
        .and_then(|(fs, gib)| gib.parse().ok().map(|gib| (fs, gib)))
        .ok_or_else(|| Error::Internal(format!("malformed storage capacity job id: {}", id)))
}

// =============================================================================
// Client
// =============================================================================

/// Client for one file system's capacity settings
pub struct FsxClient {
    config: FsxConfig,
    credentials: Credentials,
    http: reqwest::Client,
}

impl FsxClient {
    pub fn new(config: FsxConfig, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            credentials,
            http,
        })
    }

    async fn call(&self, operation: &str, payload: serde_json::Value) -> Result<String> {
        let host = self.config.host();
        let target = format!("{}.{}", TARGET_PREFIX, operation);
        let body = serde_json::to_vec(&payload)?;

        let signed = sigv4::sign(
            &SignableRequest {
                method: "POST",
                host: &host,
                path: "/",
                headers: &[("content-type", CONTENT_TYPE), ("x-amz-target", target.as_str())],
                payload: &body,
            },
            &self.credentials,
            &self.config.region,
            SERVICE,
            Utc::now(),
        )?;

        let mut request = self
            .http
            .post(format!("https://{}/", host))
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", &target)
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization);
        if let Some(token) = &signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                appliance: self.config.appliance.clone(),
            });
        }
        if !status.is_success() {
            return Err(Error::api_status(target, status.as_u16(), text));
        }
        Ok(text)
    }

    async fn describe(&self, file_system_id: &str) -> Result<FileSystemWire> {
        let text = self
            .call(
                "DescribeFileSystems",
                json!({ "FileSystemIds": [file_system_id] }),
            )
            .await?;
        let response: DescribeFileSystemsResponse = serde_json::from_str(&text)?;
        response
            .file_systems
            .into_iter()
            .find(|fs| fs.file_system_id == file_system_id)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "file-system".into(),
                name: file_system_id.to_string(),
            })
    }

    /// Current storage-capacity quota in GiB
    pub async fn storage_capacity_gib(&self) -> Result<u64> {
        let file_system = self.describe(&self.config.file_system_id).await?;
        debug!(
            appliance = %self.config.appliance,
            "Storage capacity quota is {} GiB",
            file_system.storage_capacity
        );
        Ok(file_system.storage_capacity)
    }

    /// Request a new quota; the returned handle is polled with [`Self::update_status`]
    pub async fn update_storage_capacity(&self, new_capacity_gib: u64) -> Result<JobHandle> {
        let payload = serde_json::to_value(UpdateFileSystemRequest {
            file_system_id: &self.config.file_system_id,
            storage_capacity: new_capacity_gib,
        })?;
        self.call("UpdateFileSystem", payload).await?;
        Ok(JobHandle::file_system(format!(
            "{}:{}",
            self.config.file_system_id, new_capacity_gib
        )))
    }

    pub async fn update_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        let (file_system_id, requested) = parse_job_id(&handle.id)?;
        let file_system = self.describe(file_system_id).await?;
        Ok(update_status(&file_system, requested))
    }
}
