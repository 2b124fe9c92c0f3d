//! HDFS backend speaking the WebHDFS REST protocol.
//!
//! Paths follow `hdfs://<namenode>:<port>/<path>`; requests go to the
//! namenode's WebHDFS endpoint (`/webhdfs/v1`). Data operations (`CREATE`,
//! `APPEND`) use the two-step redirect handshake: the namenode answers with
//! the datanode location and only the second request carries the payload.
//! Appends write through, so `commit` is a no-op on this backend.

use super::VirtualFileSystem;
use crate::{Blob, ByteRange, Error, Result, bail_invalid};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, redirect};

/// Filesystem backend for `hdfs://` paths.
#[derive(Debug)]
pub struct WebHdfsFs {
	/// Follows redirects; used for metadata and reads.
	client: Client,
	/// Never follows redirects; used for the two-step write handshake.
	write_client: Client,
	user: Option<String>,
}

struct HdfsAddress {
	namenode: String,
	path: String,
}

impl WebHdfsFs {
	pub fn new(client: Client) -> Result<Self> {
		let write_client = Client::builder()
			.redirect(redirect::Policy::none())
			.build()
			.map_err(|e| Error::io_other("<hdfs client>", e))?;
		Ok(Self {
			client,
			write_client,
			user: std::env::var("HADOOP_USER_NAME").ok(),
		})
	}

	fn parse(&self, path: &str) -> Result<HdfsAddress> {
		let Some(rest) = path.strip_prefix("hdfs://") else {
			bail_invalid!("'{path}' is not an hdfs:// path");
		};
		let (namenode, file_path) = rest.split_once('/').unwrap_or((rest, ""));
		if namenode.is_empty() {
			bail_invalid!("'{path}' is missing the namenode host");
		}
		Ok(HdfsAddress {
			namenode: namenode.to_string(),
			path: format!("/{file_path}"),
		})
	}

	fn url_of(&self, address: &HdfsAddress, op: &str, params: &[(&str, String)]) -> String {
		let mut url = format!("http://{}/webhdfs/v1{}?op={op}", address.namenode, address.path);
		for (name, value) in params {
			url.push_str(&format!("&{name}={value}"));
		}
		if let Some(user) = &self.user {
			url.push_str(&format!("&user.name={user}"));
		}
		url
	}

	/// Fetches the `FileStatus` of a path, or `None` when it does not exist.
	async fn status(&self, path: &str) -> Result<Option<serde_json::Value>> {
		let address = self.parse(path)?;
		let url = self.url_of(&address, "GETFILESTATUS", &[]);
		let response = self.client.get(&url).send().await.map_err(|e| Error::io_other(path, e))?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !response.status().is_success() {
			return Err(Error::io_other(path, format!("namenode returned {}", response.status())));
		}
		let body: serde_json::Value = response.json().await.map_err(|e| Error::io_other(path, e))?;
		Ok(body.get("FileStatus").cloned())
	}

	/// Two-step write: ask the namenode, follow its `Location` to a datanode.
	async fn write_op(&self, path: &str, method: Method, op: &str, params: &[(&str, String)], body: Vec<u8>) -> Result<()> {
		let address = self.parse(path)?;
		let url = self.url_of(&address, op, params);
		let handshake = self
			.write_client
			.request(method.clone(), &url)
			.send()
			.await
			.map_err(|e| Error::io_other(path, e))?;
		if !handshake.status().is_redirection() {
			return Err(Error::io_other(
				path,
				format!("namenode did not redirect {op}: {}", handshake.status()),
			));
		}
		let location = handshake
			.headers()
			.get("location")
			.and_then(|value| value.to_str().ok())
			.ok_or_else(|| Error::io_other(path, "redirect is missing its location header"))?
			.to_string();

		let response = self
			.write_client
			.request(method, &location)
			.body(body)
			.send()
			.await
			.map_err(|e| Error::io_other(path, e))?;
		if !response.status().is_success() {
			return Err(Error::io_other(path, format!("datanode returned {}", response.status())));
		}
		Ok(())
	}
}

#[async_trait]
impl VirtualFileSystem for WebHdfsFs {
	fn name(&self) -> &str {
		"hdfs"
	}

	async fn is_dir(&self, path: &str) -> Result<bool> {
		Ok(self
			.status(path)
			.await?
			.and_then(|status| status.get("type").and_then(|t| t.as_str()).map(|t| t == "DIRECTORY"))
			.unwrap_or(false))
	}

	async fn is_file(&self, path: &str) -> Result<bool> {
		Ok(self
			.status(path)
			.await?
			.and_then(|status| status.get("type").and_then(|t| t.as_str()).map(|t| t == "FILE"))
			.unwrap_or(false))
	}

	async fn list(&self, path: &str) -> Result<Vec<String>> {
		let address = self.parse(path)?;
		let url = self.url_of(&address, "LISTSTATUS", &[]);
		let response = self.client.get(&url).send().await.map_err(|e| Error::io_other(path, e))?;
		if !response.status().is_success() {
			return Err(Error::io_other(path, format!("namenode returned {}", response.status())));
		}
		let body: serde_json::Value = response.json().await.map_err(|e| Error::io_other(path, e))?;

		let mut children = Vec::new();
		if let Some(entries) = body
			.get("FileStatuses")
			.and_then(|statuses| statuses.get("FileStatus"))
			.and_then(|entries| entries.as_array())
		{
			for entry in entries {
				if let Some(name) = entry.get("pathSuffix").and_then(|name| name.as_str()) {
					if !name.is_empty() {
						children.push(super::uri::join(path, name));
					}
				}
			}
		}
		children.sort();
		Ok(children)
	}

	async fn create_dir(&self, path: &str) -> Result<()> {
		let address = self.parse(path)?;
		let url = self.url_of(&address, "MKDIRS", &[]);
		let response = self
			.client
			.put(&url)
			.send()
			.await
			.map_err(|e| Error::io_other(path, e))?;
		if !response.status().is_success() {
			return Err(Error::io_other(path, format!("namenode returned {}", response.status())));
		}
		Ok(())
	}

	async fn delete_dir(&self, path: &str) -> Result<()> {
		let address = self.parse(path)?;
		let url = self.url_of(&address, "DELETE", &[("recursive", "true".to_string())]);
		let response = self
			.client
			.delete(&url)
			.send()
			.await
			.map_err(|e| Error::io_other(path, e))?;
		if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
			return Err(Error::io_other(path, format!("namenode returned {}", response.status())));
		}
		Ok(())
	}

	async fn file_size(&self, path: &str) -> Result<u64> {
		self
			.status(path)
			.await?
			.and_then(|status| status.get("length").and_then(|length| length.as_u64()))
			.ok_or_else(|| Error::io(path, std::io::Error::from(std::io::ErrorKind::NotFound)))
	}

	async fn read(&self, path: &str, range: &ByteRange) -> Result<Blob> {
		if range.length == 0 {
			return Ok(Blob::new_empty());
		}
		let address = self.parse(path)?;
		let url = self.url_of(
			&address,
			"OPEN",
			&[
				("offset", range.offset.to_string()),
				("length", range.length.to_string()),
			],
		);
		let response = self.client.get(&url).send().await.map_err(|e| Error::io_other(path, e))?;
		if !response.status().is_success() {
			return Err(Error::io_other(path, format!("read failed with {}", response.status())));
		}
		let bytes = response.bytes().await.map_err(|e| Error::io_other(path, e))?;
		if bytes.len() as u64 != range.length {
			return Err(Error::io_other(
				path,
				format!("positional read returned {} bytes instead of {}", bytes.len(), range.length),
			));
		}
		Ok(Blob::from(bytes.to_vec()))
	}

	async fn append(&self, path: &str, data: &Blob) -> Result<()> {
		if self.is_file(path).await? {
			self
				.write_op(path, Method::POST, "APPEND", &[], data.as_slice().to_vec())
				.await
		} else {
			self
				.write_op(
					path,
					Method::PUT,
					"CREATE",
					&[("overwrite", "false".to_string())],
					data.as_slice().to_vec(),
				)
				.await
		}
	}

	async fn commit(&self, _path: &str) -> Result<()> {
		// Appends write through to the datanodes; there is nothing staged.
		Ok(())
	}

	async fn delete_file(&self, path: &str) -> Result<()> {
		let address = self.parse(path)?;
		let url = self.url_of(&address, "DELETE", &[]);
		let response = self
			.client
			.delete(&url)
			.send()
			.await
			.map_err(|e| Error::io_other(path, e))?;
		if !response.status().is_success() {
			return Err(Error::io_other(path, format!("namenode returned {}", response.status())));
		}
		Ok(())
	}

	async fn move_path(&self, from: &str, to: &str) -> Result<()> {
		let from_address = self.parse(from)?;
		let to_address = self.parse(to)?;
		if from_address.namenode != to_address.namenode {
			crate::bail_unsupported!("rename across namenodes is not available");
		}
		let url = self.url_of(&from_address, "RENAME", &[("destination", to_address.path.clone())]);
		let response = self.client.put(&url).send().await.map_err(|e| Error::io_other(from, e))?;
		if !response.status().is_success() {
			return Err(Error::io_other(from, format!("namenode returned {}", response.status())));
		}
		Ok(())
	}
}
