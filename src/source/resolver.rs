//! Source resolution for input bytes
//!
//! Inputs arrive as file paths, base64 blobs, URLs, or cache references.
//! Resolution produces raw bytes only; content validation belongs to the
//! consumer (PDF header check in the pdf layer, JSON parse in the dataset
//! layer), since a source may be a fillable PDF or a JSON dataset.

use crate::error::{Error, Result};
use crate::source::DocumentCache;
use base64::Engine;
use futures_util::StreamExt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bytes resolved from a source, with a display name for result reporting
pub struct ResolvedSource {
    pub data: Vec<u8>,
    pub source_name: String,
}

impl ResolvedSource {
    fn new(data: Vec<u8>, source_name: impl Into<String>) -> Self {
        Self {
            data,
            source_name: source_name.into(),
        }
    }
}

/// Read a source from the filesystem
pub fn resolve_path<P: AsRef<Path>>(path: P) -> Result<ResolvedSource> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(Error::SourceNotFound {
            path: path.display().to_string(),
        });
    }

    let data = std::fs::read(path)?;
    Ok(ResolvedSource::new(data, path.display().to_string()))
}

/// Decode an inline base64 source
pub fn resolve_base64(encoded: &str) -> Result<ResolvedSource> {
    let data = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    Ok(ResolvedSource::new(data, "<base64>"))
}

/// Reserved IPv4 ranges, including the link-local block cloud metadata
/// services sit in (169.254/16) and CGNAT (100.64/10), which plain
/// `is_private()` does not cover
fn v4_is_reserved(addr: &Ipv4Addr) -> bool {
    let octets = addr.octets();
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_broadcast()
        || addr.is_unspecified()
        || (octets[0] == 100 && (64..128).contains(&octets[1]))
}

/// Reserved IPv6: loopback, unspecified, unique-local fc00::/7, and
/// link-local fe80::/10
fn v6_is_reserved(addr: &Ipv6Addr) -> bool {
    let head = addr.segments()[0];
    addr.is_loopback()
        || addr.is_unspecified()
        || (head & 0xFE00) == 0xFC00
        || (head & 0xFFC0) == 0xFE80
}

fn is_reserved_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4_is_reserved(v4),
        IpAddr::V6(v6) => v6_is_reserved(v6),
    }
}

/// Refuse URLs whose host resolves to a non-public address.
///
/// Resolution goes through DNS so hostnames pointing at internal services
/// are caught, not just literal IPs.
async fn ensure_public_host(raw_url: &str) -> Result<()> {
    let parsed = url::Url::parse(raw_url).map_err(|e| Error::SourceResolution {
        reason: format!("Invalid URL: {}", e),
    })?;

    let host = parsed.host_str().ok_or_else(|| Error::SourceResolution {
        reason: "URL has no host".to_string(),
    })?;
    let port = parsed.port_or_known_default().unwrap_or(443);

    let mut resolved =
        tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::SourceResolution {
                reason: format!("DNS resolution failed for {}: {}", host, e),
            })?;

    if resolved.any(|addr| is_reserved_ip(&addr.ip())) {
        return Err(Error::SsrfBlocked {
            url: raw_url.to_string(),
        });
    }

    Ok(())
}

/// Download a source over HTTP(S), subject to SSRF protection and a size cap
pub async fn resolve_url(
    url: &str,
    allow_private_urls: bool,
    max_download_bytes: u64,
) -> Result<ResolvedSource> {
    if !allow_private_urls {
        ensure_public_host(url).await?;
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::SourceResolution {
            reason: format!("HTTP request failed with status: {}", status),
        });
    }

    // A declared Content-Length over the cap fails fast; the streaming
    // check below still guards servers that omit or understate it
    if let Some(declared) = response.content_length() {
        if declared > max_download_bytes {
            return Err(Error::DownloadTooLarge {
                size: declared,
                max_size: max_download_bytes,
            });
        }
    }

    let mut body: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let downloaded = (body.len() + chunk.len()) as u64;
        if downloaded > max_download_bytes {
            return Err(Error::DownloadTooLarge {
                size: downloaded,
                max_size: max_download_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(ResolvedSource::new(body, url))
}

/// Look up bytes a previous operation left in the cache
pub async fn resolve_cache(
    cache_key: &str,
    cache: &Arc<RwLock<DocumentCache>>,
) -> Result<ResolvedSource> {
    let data = cache
        .read()
        .await
        .get(cache_key)
        .ok_or_else(|| Error::CacheKeyNotFound {
            key: cache_key.to_string(),
        })?;

    Ok(ResolvedSource::new(data, format!("<cache:{}>", cache_key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_roundtrip() {
        let resolved = resolve_base64("SGVsbG8gV29ybGQ=").unwrap();
        assert_eq!(resolved.data, b"Hello World");
        assert_eq!(resolved.source_name, "<base64>");
    }

    #[test]
    fn test_base64_garbage_rejected() {
        let result = resolve_base64("not valid base64!!!");
        assert!(matches!(result, Err(Error::Base64Decode(_))));
    }

    #[test]
    fn test_missing_path_reported() {
        let result = resolve_path("/nonexistent/path/records.json");
        assert!(matches!(result, Err(Error::SourceNotFound { .. })));
    }

    #[test]
    fn test_reserved_addresses_blocked() {
        let blocked = [
            "127.0.0.1",       // loopback
            "127.0.0.2",
            "10.0.0.1",        // RFC 1918
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.169.254", // cloud metadata
            "169.254.0.1",
            "100.64.0.1",      // CGNAT
            "100.127.255.255",
            "0.0.0.0",
            "255.255.255.255",
            "::1",
            "::",
            "fc00::1",
            "fd00::1",
            "fe80::1",
        ];
        for ip in blocked {
            assert!(
                is_reserved_ip(&ip.parse().unwrap()),
                "{} should be blocked",
                ip
            );
        }
    }

    #[test]
    fn test_public_addresses_allowed() {
        let public = [
            "8.8.8.8",
            "1.1.1.1",
            "100.128.0.1", // just past the CGNAT block
            "203.0.113.1",
            "2001:db8::1",
            "2607:f8b0:4004:800::200e",
        ];
        for ip in public {
            assert!(
                !is_reserved_ip(&ip.parse().unwrap()),
                "{} should be allowed",
                ip
            );
        }
    }
}
