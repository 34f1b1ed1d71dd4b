//! AWS Signature V4 request signing.
//!
//! Payloads are never hashed: every request is signed with
//! `UNSIGNED-PAYLOAD`, so bodies can be streamed without buffering.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

#[derive(Clone)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Headers to attach to the outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

impl SignedHeaders {
    pub fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("authorization", &self.authorization)
            .header("x-amz-date", &self.amz_date)
            .header("x-amz-content-sha256", &self.content_sha256)
    }
}

/// Sign a request. `headers` are the caller's extra headers; only
/// `content-type` and `x-amz-*` take part in the signature.
pub fn sign(
    creds: &SigningCredentials,
    method: &str,
    url: &Url,
    headers: &[(String, String)],
    now: DateTime<Utc>,
) -> SignedHeaders {
    let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut signed: BTreeMap<String, String> = BTreeMap::new();
    signed.insert("host".to_string(), url_host(url));
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        if name == "content-type" || name.starts_with("x-amz-") {
            signed.insert(name, value.trim().to_string());
        }
    }
    signed.insert("x-amz-content-sha256".to_string(), UNSIGNED_PAYLOAD.to_string());
    signed.insert("x-amz-date".to_string(), date_time.clone());

    let canonical_headers: String = signed
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = signed.keys().cloned().collect::<Vec<_>>().join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        canonical_uri(url.path()),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        UNSIGNED_PAYLOAD
    );

    let cr_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let credential_scope = format!("{}/{}/s3/aws4_request", date, creds.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        date_time, credential_scope, cr_hash
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date, &creds.region);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
        amz_date: date_time,
        content_sha256: UNSIGNED_PAYLOAD.to_string(),
    }
}

/// Re-encode each path segment so already-escaped and raw keys sign alike.
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            urlencoding::encode(&decoded).into_owned()
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length ok");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// host[:port] as it appears in the request's Host header.
fn url_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds() -> SigningCredentials {
        SigningCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            region: "us-east-1".into(),
        }
    }

    #[test]
    fn test_signature_is_stable() {
        let url = Url::parse("https://s3.example.com/bucket/photos/a b.jpg?uploads").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let headers = vec![("Content-Type".to_string(), "image/jpeg".to_string())];

        let a = sign(&creds(), "POST", &url, &headers, now);
        let b = sign(&creds(), "POST", &url, &headers, now);
        assert_eq!(a, b);
        assert_eq!(a.amz_date, "20240501T120000Z");
        assert_eq!(a.content_sha256, UNSIGNED_PAYLOAD);
        assert!(a.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/us-east-1/s3/aws4_request, \
             SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date, Signature="
        ));

        let later = sign(&creds(), "POST", &url, &headers, now + chrono::Duration::seconds(1));
        assert_ne!(a.authorization, later.authorization);
    }

    #[test]
    fn test_unrelated_headers_not_signed() {
        let url = Url::parse("https://s3.example.com/bucket/key").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let plain = sign(&creds(), "GET", &url, &[], now);
        let extra = sign(
            &creds(),
            "GET",
            &url,
            &[("content-length".to_string(), "10".to_string())],
            now,
        );
        assert_eq!(plain, extra);
    }

    #[test]
    fn test_canonical_uri_normalizes_escaping() {
        assert_eq!(canonical_uri("/bucket/a%20b/c+d"), "/bucket/a%20b/c%2Bd");
        assert_eq!(canonical_uri("/bucket/a b"), "/bucket/a%20b");
        assert_eq!(canonical_uri("/bucket/%e4%b8%ad"), "/bucket/%E4%B8%AD");
        assert_eq!(canonical_uri(""), "/");
    }

    #[test]
    fn test_canonical_query_sorted() {
        let url = Url::parse("https://h/b?uploadId=x%2By&partNumber=2&a=1&a=0").unwrap();
        assert_eq!(canonical_query(&url), "a=0&a=1&partNumber=2&uploadId=x%2By");

        let bare = Url::parse("https://h/b/k?uploads").unwrap();
        assert_eq!(canonical_query(&bare), "uploads=");
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host(&Url::parse("https://s3.example.com/b").unwrap()), "s3.example.com");
        assert_eq!(url_host(&Url::parse("http://127.0.0.1:9000/b").unwrap()), "127.0.0.1:9000");
    }

    #[test]
    fn test_hmac_sha256() {
        let result = hmac_sha256(b"secret", b"data");
        assert_eq!(result.len(), 32);
    }
}
