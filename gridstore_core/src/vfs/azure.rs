//! Azure Blob storage backend.
//!
//! Paths follow `az://<container>@<account>.blob.core.windows.net/<path>`.
//! Credentials come from `AZURE_STORAGE_ACCOUNT` / `AZURE_STORAGE_KEY`
//! (shared-key request signing); `AZURE_BLOB_ENDPOINT` overrides the service
//! endpoint, e.g. for an emulator. Without a key, requests go out unsigned.
//!
//! Writes are staged as blocks of at most
//! [`MAX_UPLOAD_BLOCK_SIZE`](crate::MAX_UPLOAD_BLOCK_SIZE) bytes, uploaded in
//! parallel with deterministic block ids; `commit` issues the block-list
//! commit, before which the blob is not visible. Reads below the download
//! buffer size use one range GET, larger reads fan out into parallel range
//! GETs over disjoint regions.

use super::{VirtualFileSystem, uri};
use crate::{Blob, ByteRange, Config, ConcurrencyLimits, Error, Result, bail_invalid, bail_unsupported, join_bounded};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use reqwest::{Client, Method, StatusCode};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const API_VERSION: &str = "2019-12-12";
const DIR_MARKER: &str = ".dir.marker";

/// Filesystem backend for `az://` paths.
pub struct AzureBlobFs {
	client: Client,
	account: String,
	key: Option<Vec<u8>>,
	endpoint: Option<String>,
	config: Arc<Config>,
	limits: ConcurrencyLimits,
	staged: Mutex<HashMap<String, StagedUpload>>,
}

#[derive(Default)]
struct StagedUpload {
	buffer: Vec<u8>,
	block_ids: Vec<String>,
}

struct BlobAddress {
	host: String,
	container: String,
	blob: String,
}

impl std::fmt::Debug for AzureBlobFs {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AzureBlobFs")
			.field("account", &self.account)
			.field("signed", &self.key.is_some())
			.finish()
	}
}

impl AzureBlobFs {
	/// Creates the backend from the `AZURE_*` environment variables.
	pub fn from_env(client: Client, config: Arc<Config>) -> Result<Self> {
		let account = std::env::var("AZURE_STORAGE_ACCOUNT")
			.map_err(|_| Error::InvalidArgument("AZURE_STORAGE_ACCOUNT is not set".to_string()))?;
		let key = match std::env::var("AZURE_STORAGE_KEY") {
			Ok(encoded) => Some(
				BASE64
					.decode(encoded.trim())
					.map_err(|e| Error::InvalidArgument(format!("AZURE_STORAGE_KEY is not valid base64: {e}")))?,
			),
			Err(_) => None,
		};
		let endpoint = std::env::var("AZURE_BLOB_ENDPOINT")
			.ok()
			.map(|e| e.trim_end_matches('/').to_string());
		Ok(Self {
			client,
			account,
			key,
			endpoint,
			config,
			limits: ConcurrencyLimits::default(),
			staged: Mutex::new(HashMap::new()),
		})
	}

	fn parse(&self, path: &str) -> Result<BlobAddress> {
		let Some(rest) = path.strip_prefix("az://") else {
			bail_invalid!("'{path}' is not an az:// path");
		};
		let Some((container, location)) = rest.split_once('@') else {
			bail_invalid!("'{path}' is missing the '<container>@<account>' part");
		};
		let (host, blob) = location.split_once('/').unwrap_or((location, ""));
		if container.is_empty() || host.is_empty() {
			bail_invalid!("'{path}' has an empty container or account host");
		}
		Ok(BlobAddress {
			host: host.to_string(),
			container: container.to_string(),
			blob: blob.trim_start_matches('/').to_string(),
		})
	}

	fn url_of(&self, address: &BlobAddress) -> String {
		let base = match &self.endpoint {
			Some(endpoint) => endpoint.clone(),
			None => format!("https://{}", address.host),
		};
		if address.blob.is_empty() {
			format!("{base}/{}", address.container)
		} else {
			format!("{base}/{}/{}", address.container, address.blob)
		}
	}

	fn unparse(&self, address: &BlobAddress, blob: &str) -> String {
		format!("az://{}@{}/{blob}", address.container, address.host)
	}

	/// Computes the `SharedKey` authorization header for one request.
	fn signature(
		&self,
		verb: &str,
		address: &BlobAddress,
		query: &BTreeMap<String, String>,
		ms_headers: &BTreeMap<String, String>,
		content_length: u64,
		range: Option<&str>,
	) -> Option<String> {
		let key = self.key.as_ref()?;

		let canonical_headers: String = ms_headers.iter().map(|(name, value)| format!("{name}:{value}\n")).collect();
		let mut canonical_resource = format!("/{}/{}", self.account, address.container);
		if !address.blob.is_empty() {
			canonical_resource.push('/');
			canonical_resource.push_str(&address.blob);
		}
		for (name, value) in query {
			canonical_resource.push_str(&format!("\n{name}:{value}"));
		}

		let content_length = if content_length == 0 {
			String::new()
		} else {
			content_length.to_string()
		};
		let string_to_sign = format!(
			"{verb}\n\n\n{content_length}\n\n\n\n\n\n\n\n{}\n{canonical_headers}{canonical_resource}",
			range.unwrap_or("")
		);

		let mut mac = Hmac::<Sha256>::new_from_slice(key).ok()?;
		mac.update(string_to_sign.as_bytes());
		let signature = BASE64.encode(mac.finalize().into_bytes());
		Some(format!("SharedKey {}:{signature}", self.account))
	}

	/// Issues one signed request and returns the response, mapping transport
	/// failures and error statuses into [`Error::Io`].
	async fn request(
		&self,
		method: Method,
		path: &str,
		address: &BlobAddress,
		query: BTreeMap<String, String>,
		range: Option<String>,
		mut ms_headers: BTreeMap<String, String>,
		body: Option<Vec<u8>>,
		accept_statuses: &[StatusCode],
	) -> Result<reqwest::Response> {
		ms_headers.insert("x-ms-date".to_string(), http_date(SystemTime::now()));
		ms_headers.insert("x-ms-version".to_string(), API_VERSION.to_string());

		let content_length = body.as_ref().map_or(0, |b| b.len() as u64);
		let authorization = self.signature(
			method.as_str(),
			address,
			&query,
			&ms_headers,
			content_length,
			range.as_deref(),
		);

		let mut request = self.client.request(method, self.url_of(address));
		let query_pairs: Vec<(&str, &str)> = query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
		if !query_pairs.is_empty() {
			request = request.query(&query_pairs);
		}
		for (name, value) in &ms_headers {
			request = request.header(name.as_str(), value.as_str());
		}
		if let Some(range) = &range {
			request = request.header("Range", range.as_str());
		}
		if let Some(authorization) = authorization {
			request = request.header("Authorization", authorization);
		}
		if let Some(body) = body {
			request = request.body(body);
		}

		let response = request.send().await.map_err(|e| Error::io_other(path, e))?;
		let status = response.status();
		if !status.is_success() && !accept_statuses.contains(&status) {
			let detail = response.text().await.unwrap_or_default();
			let snippet: String = detail.chars().take(200).collect();
			return Err(Error::io_other(path, format!("azure returned {status}: {snippet}")));
		}
		Ok(response)
	}

	async fn put_block(&self, path: &str, address: &BlobAddress, block_id: &str, block: Vec<u8>) -> Result<()> {
		let mut query = BTreeMap::new();
		query.insert("comp".to_string(), "block".to_string());
		query.insert("blockid".to_string(), block_id.to_string());
		self
			.request(Method::PUT, path, address, query, None, BTreeMap::new(), Some(block), &[])
			.await?;
		Ok(())
	}

	/// Drains full blocks out of the staging buffer and uploads them in
	/// parallel; the first failure wins and aborts the rest.
	async fn flush_blocks(&self, path: &str, address: &BlobAddress, include_partial: bool) -> Result<()> {
		let block_size = self.config.upload_buffer_size.min(crate::MAX_UPLOAD_BLOCK_SIZE) as usize;
		let mut uploads: Vec<(String, Vec<u8>)> = Vec::new();
		{
			let mut staged = self.staged.lock();
			let upload = staged.entry(path.to_string()).or_default();
			while upload.buffer.len() >= block_size || (include_partial && !upload.buffer.is_empty()) {
				let take = upload.buffer.len().min(block_size);
				let block: Vec<u8> = upload.buffer.drain(..take).collect();
				let block_id = BASE64.encode(format!("{:06}", upload.block_ids.len()));
				upload.block_ids.push(block_id.clone());
				uploads.push((block_id, block));
			}
		}
		if uploads.is_empty() {
			return Ok(());
		}
		log::trace!("uploading {} staged block(s) of {path}", uploads.len());
		let tasks: Vec<_> = uploads
			.into_iter()
			.map(|(block_id, block)| async move { self.put_block(path, address, &block_id, block).await })
			.collect();
		join_bounded(self.limits.upload, tasks).await?;
		Ok(())
	}

	async fn list_prefix(&self, path: &str, address: &BlobAddress, delimiter: bool) -> Result<Vec<String>> {
		let container = BlobAddress {
			host: address.host.clone(),
			container: address.container.clone(),
			blob: String::new(),
		};
		let mut prefix = address.blob.trim_end_matches('/').to_string();
		if !prefix.is_empty() {
			prefix.push('/');
		}

		let mut query = BTreeMap::new();
		query.insert("restype".to_string(), "container".to_string());
		query.insert("comp".to_string(), "list".to_string());
		if !prefix.is_empty() {
			query.insert("prefix".to_string(), prefix.clone());
		}
		if delimiter {
			query.insert("delimiter".to_string(), "/".to_string());
		}

		let response = self
			.request(Method::GET, path, &container, query, None, BTreeMap::new(), None, &[])
			.await?;
		let text = response.text().await.map_err(|e| Error::io_other(path, e))?;

		// The listing is small, flat XML; the blob and prefix names are the
		// only <Name> elements.
		let mut children = Vec::new();
		let mut rest = text.as_str();
		while let Some(start) = rest.find("<Name>") {
			rest = &rest[start + 6..];
			let Some(end) = rest.find("</Name>") else { break };
			let name = rest[..end].trim_end_matches('/');
			rest = &rest[end + 7..];
			if name.is_empty() || name.ends_with(DIR_MARKER) {
				continue;
			}
			children.push(self.unparse(address, name));
		}
		children.sort();
		children.dedup();
		Ok(children)
	}
}

#[async_trait]
impl VirtualFileSystem for AzureBlobFs {
	fn name(&self) -> &str {
		"azure"
	}

	async fn is_dir(&self, path: &str) -> Result<bool> {
		let address = self.parse(path)?;
		let marker = uri::join(path, DIR_MARKER);
		if self.is_file(&marker).await? {
			return Ok(true);
		}
		Ok(!self.list_prefix(path, &address, true).await?.is_empty())
	}

	async fn is_file(&self, path: &str) -> Result<bool> {
		let address = self.parse(path)?;
		let response = self
			.request(
				Method::HEAD,
				path,
				&address,
				BTreeMap::new(),
				None,
				BTreeMap::new(),
				None,
				&[StatusCode::NOT_FOUND],
			)
			.await?;
		Ok(response.status().is_success())
	}

	async fn list(&self, path: &str) -> Result<Vec<String>> {
		let address = self.parse(path)?;
		self.list_prefix(path, &address, true).await
	}

	async fn create_dir(&self, path: &str) -> Result<()> {
		let marker = uri::join(path, DIR_MARKER);
		let address = self.parse(&marker)?;
		let mut ms_headers = BTreeMap::new();
		ms_headers.insert("x-ms-blob-type".to_string(), "BlockBlob".to_string());
		self
			.request(Method::PUT, &marker, &address, BTreeMap::new(), None, ms_headers, Some(Vec::new()), &[])
			.await?;
		Ok(())
	}

	async fn delete_dir(&self, path: &str) -> Result<()> {
		let address = self.parse(path)?;
		// Flat listing: every object under the prefix, markers included.
		let mut children = self.list_prefix(path, &address, false).await?;
		children.push(uri::join(path, DIR_MARKER));
		for child in children {
			let child_address = self.parse(&child)?;
			self
				.request(
					Method::DELETE,
					&child,
					&child_address,
					BTreeMap::new(),
					None,
					BTreeMap::new(),
					None,
					&[StatusCode::NOT_FOUND],
				)
				.await?;
		}
		Ok(())
	}

	async fn file_size(&self, path: &str) -> Result<u64> {
		let address = self.parse(path)?;
		let response = self
			.request(Method::HEAD, path, &address, BTreeMap::new(), None, BTreeMap::new(), None, &[])
			.await?;
		response
			.headers()
			.get("content-length")
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.parse::<u64>().ok())
			.ok_or_else(|| Error::io_other(path, "response is missing a content-length"))
	}

	async fn read(&self, path: &str, range: &ByteRange) -> Result<Blob> {
		if range.length == 0 {
			return Ok(Blob::new_empty());
		}
		let chunk_size = self.config.download_buffer_size.max(1);
		if range.length <= chunk_size {
			let address = self.parse(path)?;
			let header = format!("bytes={}-{}", range.offset, range.end() - 1);
			let response = self
				.request(Method::GET, path, &address, BTreeMap::new(), Some(header), BTreeMap::new(), None, &[])
				.await?;
			let bytes = response.bytes().await.map_err(|e| Error::io_other(path, e))?;
			if bytes.len() as u64 != range.length {
				return Err(Error::io_other(
					path,
					format!("range GET returned {} bytes instead of {}", bytes.len(), range.length),
				));
			}
			return Ok(Blob::from(bytes.to_vec()));
		}

		// Large read: parallel range GETs into disjoint regions.
		let mut parts = Vec::new();
		let mut offset = range.offset;
		while offset < range.end() {
			let length = chunk_size.min(range.end() - offset);
			parts.push(ByteRange::new(offset, length));
			offset += length;
		}
		let tasks: Vec<_> = parts.iter().map(|part| self.read(path, part)).collect();
		let blobs = join_bounded(self.limits.io_bound, tasks).await?;

		let mut out = Vec::with_capacity(range.length as usize);
		for blob in blobs {
			out.extend_from_slice(blob.as_slice());
		}
		Ok(Blob::from(out))
	}

	async fn append(&self, path: &str, data: &Blob) -> Result<()> {
		let address = self.parse(path)?;
		self
			.staged
			.lock()
			.entry(path.to_string())
			.or_default()
			.buffer
			.extend_from_slice(data.as_slice());
		self.flush_blocks(path, &address, false).await
	}

	async fn commit(&self, path: &str) -> Result<()> {
		let address = self.parse(path)?;
		self.flush_blocks(path, &address, true).await?;

		let block_ids = match self.staged.lock().remove(path) {
			Some(upload) => upload.block_ids,
			None => return Ok(()),
		};
		if block_ids.is_empty() {
			// Zero-byte files (sentinels) still have to exist after commit.
			let mut ms_headers = BTreeMap::new();
			ms_headers.insert("x-ms-blob-type".to_string(), "BlockBlob".to_string());
			self
				.request(Method::PUT, path, &address, BTreeMap::new(), None, ms_headers, Some(Vec::new()), &[])
				.await?;
			return Ok(());
		}

		let mut body = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
		for block_id in &block_ids {
			body.push_str("<Latest>");
			body.push_str(block_id);
			body.push_str("</Latest>");
		}
		body.push_str("</BlockList>");

		let mut query = BTreeMap::new();
		query.insert("comp".to_string(), "blocklist".to_string());
		self
			.request(Method::PUT, path, &address, query, None, BTreeMap::new(), Some(body.into_bytes()), &[])
			.await?;
		Ok(())
	}

	async fn delete_file(&self, path: &str) -> Result<()> {
		let address = self.parse(path)?;
		self
			.request(Method::DELETE, path, &address, BTreeMap::new(), None, BTreeMap::new(), None, &[])
			.await?;
		Ok(())
	}

	async fn move_path(&self, _from: &str, _to: &str) -> Result<()> {
		bail_unsupported!("object stores cannot rename; copy into a new array instead")
	}
}

/// Formats a `SystemTime` as an RFC 1123 date, e.g.
/// `Mon, 02 Jan 2006 15:04:05 GMT`.
fn http_date(now: SystemTime) -> String {
	const WEEKDAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
	const MONTHS: [&str; 12] = [
		"Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
	];

	let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
	let days = secs.div_euclid(86_400);
	let time = secs.rem_euclid(86_400);
	let weekday = WEEKDAYS[days.rem_euclid(7) as usize];

	// Civil-from-days conversion over 400 year eras.
	let z = days + 719_468;
	let era = z.div_euclid(146_097);
	let doe = z.rem_euclid(146_097);
	let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let day = doy - (153 * mp + 2) / 5 + 1;
	let month = if mp < 10 { mp + 3 } else { mp - 9 };
	let year = yoe + era * 400 + i64::from(month <= 2);

	format!(
		"{weekday}, {day:02} {} {year} {:02}:{:02}:{:02} GMT",
		MONTHS[(month - 1) as usize],
		time / 3_600,
		(time / 60) % 60,
		time % 60
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_fs() -> AzureBlobFs {
		AzureBlobFs {
			client: Client::new(),
			account: "acct".to_string(),
			key: Some(vec![1, 2, 3, 4]),
			endpoint: None,
			config: Config::default().arc(),
			limits: ConcurrencyLimits::default(),
			staged: Mutex::new(HashMap::new()),
		}
	}

	#[test]
	fn test_parse_paths() -> Result<()> {
		let fs = test_fs();
		let address = fs.parse("az://box@acct.blob.core.windows.net/arrays/a/file.tdb")?;
		assert_eq!(address.container, "box");
		assert_eq!(address.host, "acct.blob.core.windows.net");
		assert_eq!(address.blob, "arrays/a/file.tdb");

		assert!(fs.parse("az://no-at-sign/path").is_err());
		assert!(fs.parse("gs://bucket/path").is_err());
		Ok(())
	}

	#[test]
	fn test_url_and_unparse_round_trip() -> Result<()> {
		let fs = test_fs();
		let address = fs.parse("az://box@acct.blob.core.windows.net/a/b")?;
		assert_eq!(fs.url_of(&address), "https://acct.blob.core.windows.net/box/a/b");
		assert_eq!(fs.unparse(&address, "a/c"), "az://box@acct.blob.core.windows.net/a/c");
		Ok(())
	}

	#[test]
	fn test_http_date_format() {
		// 2006-01-02 15:04:05 UTC was a Monday.
		let time = UNIX_EPOCH + std::time::Duration::from_secs(1_136_214_245);
		assert_eq!(http_date(time), "Mon, 02 Jan 2006 15:04:05 GMT");

		let epoch = http_date(UNIX_EPOCH);
		assert_eq!(epoch, "Thu, 01 Jan 1970 00:00:00 GMT");
	}

	#[test]
	fn test_signature_is_deterministic() -> Result<()> {
		let fs = test_fs();
		let address = fs.parse("az://box@acct.blob.core.windows.net/a/b")?;
		let mut ms_headers = BTreeMap::new();
		ms_headers.insert("x-ms-date".to_string(), "Thu, 01 Jan 1970 00:00:00 GMT".to_string());
		ms_headers.insert("x-ms-version".to_string(), API_VERSION.to_string());
		let first = fs.signature("GET", &address, &BTreeMap::new(), &ms_headers, 0, None);
		let second = fs.signature("GET", &address, &BTreeMap::new(), &ms_headers, 0, None);
		assert!(first.is_some());
		assert_eq!(first, second);
		assert!(first.unwrap().starts_with("SharedKey acct:"));
		Ok(())
	}

	#[test]
	fn test_unsigned_without_key() -> Result<()> {
		let mut fs = test_fs();
		fs.key = None;
		let address = fs.parse("az://box@acct.blob.core.windows.net/a")?;
		assert!(fs.signature("GET", &address, &BTreeMap::new(), &BTreeMap::new(), 0, None).is_none());
		Ok(())
	}

	#[test]
	fn test_block_ids_are_deterministic() {
		assert_eq!(BASE64.encode(format!("{:06}", 0)), "MDAwMDAw");
		assert_eq!(BASE64.encode(format!("{:06}", 41)), "MDAwMDQx");
	}
}
