//! Raw CardDAV/CalDAV client over reqwest.
//!
//! REPORT and PROPFIND bodies are hand-built XML; multistatus responses are
//! parsed with quick-xml matching on local names, since servers disagree on
//! namespace prefixes.

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;

use crate::sync::error::SyncError;

const TIMEOUT: Duration = Duration::from_secs(30);

const ADDRESSBOOK_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<C:addressbook-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
  <D:prop>
    <D:getetag/>
    <C:address-data/>
  </D:prop>
</C:addressbook-query>"#;

const CALENDAR_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <D:getetag/>
    <C:calendar-data/>
  </D:prop>
  <C:filter>
    <C:comp-filter name="VCALENDAR"/>
  </C:filter>
</C:calendar-query>"#;

const COLLECTION_PROPFIND: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop><D:resourcetype/></D:prop>
</D:propfind>"#;

/// One entry of a multistatus listing.
#[derive(Debug, Clone)]
pub struct DavEntry {
    pub href: String,
    pub etag: Option<String>,
    pub data: Option<String>,
}

/// Collections discovered on a server.
#[derive(Debug, Clone, Default)]
pub struct DavCollections {
    pub carddav_path: Option<String>,
    pub caldav_path: Option<String>,
}

pub struct DavClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl DavClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let http = Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    /// Resolve a possibly-relative href against the server base URL.
    pub fn resolve_url(&self, href: &str) -> String {
        resolve_href(&self.base_url, href)
    }

    /// List all vCards in an addressbook collection.
    pub async fn list_addressbook(&self, path: &str) -> Result<Vec<DavEntry>, SyncError> {
        self.report(path, ADDRESSBOOK_QUERY).await
    }

    /// List all calendar objects in a calendar collection.
    pub async fn list_calendar(&self, path: &str) -> Result<Vec<DavEntry>, SyncError> {
        self.report(path, CALENDAR_QUERY).await
    }

    async fn report(&self, path: &str, body: &'static str) -> Result<Vec<DavEntry>, SyncError> {
        let method = Method::from_bytes(b"REPORT").expect("valid method");
        let response = self
            .http
            .request(method, self.resolve_url(path))
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", "1")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Remote(format!(
                "REPORT on {} returned {}",
                path, status
            )));
        }
        parse_multistatus(&text)
    }

    /// Create or update a resource. Returns the new ETag when the server
    /// sends one.
    pub async fn put(
        &self,
        href: &str,
        content_type: &str,
        body: String,
        etag: Option<&str>,
    ) -> Result<Option<String>, SyncError> {
        let mut request = self
            .http
            .put(self.resolve_url(href))
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", content_type)
            .body(body);
        if let Some(etag) = etag {
            request = request.header("If-Match", quote_etag(etag));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Remote(format!(
                "PUT on {} returned {}",
                href, status
            )));
        }
        Ok(response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string()))
    }

    pub async fn delete(&self, href: &str, etag: Option<&str>) -> Result<(), SyncError> {
        let mut request = self
            .http
            .delete(self.resolve_url(href))
            .basic_auth(&self.username, Some(&self.password));
        if let Some(etag) = etag {
            request = request.header("If-Match", quote_etag(etag));
        }

        let response = request.send().await?;
        let status = response.status();
        // Already gone counts as deleted.
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(SyncError::Remote(format!(
                "DELETE on {} returned {}",
                href, status
            )));
        }
        Ok(())
    }

    /// Probe the server and discover addressbook/calendar collections.
    pub async fn discover(&self) -> Result<DavCollections, SyncError> {
        let method = Method::from_bytes(b"PROPFIND").expect("valid method");
        let response = self
            .http
            .request(method, &self.base_url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", "1")
            .body(COLLECTION_PROPFIND)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Remote(format!(
                "PROPFIND returned {}",
                status
            )));
        }
        Ok(parse_collections(&text))
    }
}

fn quote_etag(etag: &str) -> String {
    if etag.starts_with('"') {
        etag.to_string()
    } else {
        format!("\"{}\"", etag)
    }
}

/// Join a server base URL and a possibly-relative href.
pub fn resolve_href(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if href.starts_with('/') {
        // scheme://host[:port] + absolute path
        let origin_end = base
            .find("://")
            .map(|i| i + 3)
            .and_then(|start| base[start..].find('/').map(|i| start + i))
            .unwrap_or(base.len());
        return format!("{}{}", &base[..origin_end], href);
    }
    format!("{}/{}", base.trim_end_matches('/'), href)
}

/// Parse a WebDAV multistatus body into `(href, etag, data)` entries.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>, SyncError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut field: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => {
                    current = Some(DavEntry {
                        href: String::new(),
                        etag: None,
                        data: None,
                    });
                }
                b"href" => field = Some("href"),
                b"getetag" => field = Some("etag"),
                b"address-data" | b"calendar-data" => field = Some("data"),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let (Some(entry), Some(name)) = (current.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| SyncError::Remote(format!("bad multistatus XML: {}", e)))?
                        .into_owned();
                    match name {
                        "href" => entry.href = text,
                        "etag" => entry.etag = Some(text.trim_matches('"').to_string()),
                        "data" => entry.data = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let (Some(entry), Some("data")) = (current.as_mut(), field) {
                    entry.data = Some(String::from_utf8_lossy(&t.into_inner()).into_owned());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                b"href" | b"getetag" | b"address-data" | b"calendar-data" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(SyncError::Remote(format!("bad multistatus XML: {}", e)));
            }
        }
    }

    Ok(entries)
}

/// Pull addressbook/calendar hrefs out of a PROPFIND resourcetype listing.
fn parse_collections(xml: &str) -> DavCollections {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut collections = DavCollections::default();
    let mut href = String::new();
    let mut in_href = false;
    let mut is_addressbook = false;
    let mut is_calendar = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => {
                    href.clear();
                    is_addressbook = false;
                    is_calendar = false;
                }
                b"href" => in_href = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"addressbook" => is_addressbook = true,
                b"calendar" => is_calendar = true,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_href {
                    if let Ok(text) = t.unescape() {
                        href = text.into_owned();
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"href" => in_href = false,
                b"response" => {
                    if is_addressbook && collections.carddav_path.is_none() && !href.is_empty() {
                        collections.carddav_path = Some(href.clone());
                    }
                    if is_calendar && collections.caldav_path.is_none() && !href.is_empty() {
                        collections.caldav_path = Some(href.clone());
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    collections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_href() {
        let base = "https://dav.example.org/remote.php/dav";
        assert_eq!(
            resolve_href(base, "https://other.example.org/x"),
            "https://other.example.org/x"
        );
        assert_eq!(
            resolve_href(base, "/remote.php/dav/addressbooks/ada/"),
            "https://dav.example.org/remote.php/dav/addressbooks/ada/"
        );
        assert_eq!(
            resolve_href(base, "contacts/u1.vcf"),
            "https://dav.example.org/remote.php/dav/contacts/u1.vcf"
        );
    }

    #[test]
    fn test_parse_multistatus() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav">
  <d:response>
    <d:href>/addressbooks/ada/u1.vcf</d:href>
    <d:propstat>
      <d:prop>
        <d:getetag>"etag-1"</d:getetag>
        <card:address-data>BEGIN:VCARD
VERSION:3.0
UID:u1
FN:Ada Lovelace
END:VCARD</card:address-data>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/addressbooks/ada/empty.vcf</d:href>
  </d:response>
</d:multistatus>"#;

        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].href, "/addressbooks/ada/u1.vcf");
        assert_eq!(entries[0].etag.as_deref(), Some("etag-1"));
        assert!(entries[0].data.as_deref().unwrap().contains("FN:Ada Lovelace"));
        assert!(entries[1].data.is_none());
    }

    #[test]
    fn test_parse_multistatus_rejects_garbage() {
        assert!(parse_multistatus("<unclosed").is_err());
    }

    #[test]
    fn test_parse_collections() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:card="urn:ietf:params:xml:ns:carddav" xmlns:cal="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/dav/addressbooks/ada/contacts/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/><card:addressbook/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/calendars/ada/personal/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/><cal:calendar/></d:resourcetype></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

        let collections = parse_collections(xml);
        assert_eq!(
            collections.carddav_path.as_deref(),
            Some("/dav/addressbooks/ada/contacts/")
        );
        assert_eq!(
            collections.caldav_path.as_deref(),
            Some("/dav/calendars/ada/personal/")
        );
    }

    #[test]
    fn test_quote_etag() {
        assert_eq!(quote_etag("abc"), "\"abc\"");
        assert_eq!(quote_etag("\"abc\""), "\"abc\"");
    }
}
