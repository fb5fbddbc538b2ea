//! A small WebDAV server for tests. It keeps its files in a
//! `MemoryProvider` and answers one request per connection from a
//! background thread on a loopback port.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use mystorage::provider::webdav::DavClient;
use mystorage::provider::{normalize, parent, FileInfo};
use mystorage::{ErrorKind, MemoryProvider, Provider, ResourceType, WebdavProvider};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use url::Url;

pub const USER: &str = "admin";
pub const PASSWORD: &str = "admin";
pub const QUOTA_AVAILABLE: u64 = 1_073_741_824;

/// `Basic` credentials for `admin:admin`.
const AUTHORIZATION: &str = "Basic YWRtaW46YWRtaW4=";
const BASE: &str = "/remote.php/dav/files/admin";

pub struct DavServer {
    addr: SocketAddr,
    store: MemoryProvider,
    requests: Arc<Mutex<Vec<String>>>,
}

impl DavServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let store = MemoryProvider::named("dav-store");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (served, log) = (store.clone(), requests.clone());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                if let Err(e) = serve(stream, &served, &log) {
                    eprintln!("dav stub: {e}");
                }
            }
        });

        Self {
            addr,
            store,
            requests,
        }
    }

    pub fn endpoint(&self) -> Url {
        Url::parse(&format!("http://{}{}/", self.addr, BASE)).unwrap()
    }

    pub fn provider(&self) -> WebdavProvider {
        self.provider_as(USER, PASSWORD)
    }

    pub fn provider_as(&self, user: &str, password: &str) -> WebdavProvider {
        let client = DavClient::new(self.endpoint(), user, password, true).unwrap();
        WebdavProvider::new(client).unwrap()
    }

    /// Backing files, for seeding and inspection.
    pub fn store(&self) -> &MemoryProvider {
        &self.store
    }

    /// `"METHOD path"` for every authorized request, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

struct Response {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Response {
    fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn body(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    fn write_to(&self, mut stream: TcpStream) -> io::Result<()> {
        let reason = match self.status {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            207 => "Multi-Status",
            401 => "Unauthorized",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            412 => "Precondition Failed",
            _ => "Error",
        };
        write!(stream, "HTTP/1.1 {} {}\r\n", self.status, reason)?;
        write!(stream, "Content-Length: {}\r\n", self.body.len())?;
        write!(stream, "Connection: close\r\n")?;
        for (name, value) in &self.headers {
            write!(stream, "{name}: {value}\r\n")?;
        }
        write!(stream, "\r\n")?;
        stream.write_all(&self.body)?;
        stream.flush()
    }
}

fn serve(stream: TcpStream, store: &MemoryProvider, log: &Mutex<Vec<String>>) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body)?;

    let response = if headers.get("authorization").map(String::as_str) != Some(AUTHORIZATION) {
        Response::status(401)
    } else {
        match to_path(&target) {
            Some(path) => {
                log.lock().unwrap().push(format!("{method} {path}"));
                handle(&method, &path, &headers, &body, store)
            }
            None => Response::status(404),
        }
    };
    response.write_to(stream)
}

/// Provider path of a request target below [`BASE`].
fn to_path(target: &str) -> Option<String> {
    let decoded = percent_decode_str(target).decode_utf8().ok()?;
    let rest = decoded.strip_prefix(BASE)?;
    normalize(rest).ok()
}

fn is_dir(store: &MemoryProvider, path: &str) -> bool {
    matches!(
        store.resource_type(path),
        Ok(ResourceType::Directory | ResourceType::StorageRoot)
    )
}

fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::NotFound => 404,
        ErrorKind::AlreadyExists | ErrorKind::InvalidTarget => 405,
        _ => 500,
    }
}

fn handle(
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
    store: &MemoryProvider,
) -> Response {
    match method {
        "OPTIONS" => {
            let mut response = Response::status(200);
            response.headers.push(("DAV", "1, 2".to_string()));
            response.headers.push((
                "Allow",
                "OPTIONS, GET, PUT, DELETE, MKCOL, MOVE, COPY, PROPFIND".to_string(),
            ));
            response
        }
        "PROPFIND" => {
            let depth = headers.get("depth").map(String::as_str).unwrap_or("1");
            let with_quota = String::from_utf8_lossy(body).contains("quota-available-bytes");
            propfind(store, path, depth == "1", with_quota)
        }
        "GET" => match store.read_bytes(path) {
            Ok(content) => Response::body(200, content),
            Err(e) => Response::status(status_for(e.kind())),
        },
        "PUT" => {
            if is_dir(store, path) {
                return Response::status(405);
            }
            if !is_dir(store, parent(path)) {
                return Response::status(409);
            }
            match store.put_bytes(path, body) {
                Ok(_) => Response::status(201),
                Err(e) => Response::status(status_for(e.kind())),
            }
        }
        "MKCOL" => {
            if store.exists(path).unwrap_or(false) {
                return Response::status(405);
            }
            if !is_dir(store, parent(path)) {
                return Response::status(409);
            }
            match store.mkdir(path) {
                Ok(_) => Response::status(201),
                Err(e) => Response::status(status_for(e.kind())),
            }
        }
        "DELETE" => match store.delete(path) {
            Ok(()) => Response::status(204),
            Err(e) if e.kind() == ErrorKind::NotFound => Response::status(404),
            Err(_) => Response::status(403),
        },
        "MOVE" | "COPY" => transfer(method, path, headers, store),
        _ => Response::status(405),
    }
}

fn transfer(
    method: &str,
    src: &str,
    headers: &HashMap<String, String>,
    store: &MemoryProvider,
) -> Response {
    let Some(dest) = headers
        .get("destination")
        .and_then(|d| Url::parse(d).ok())
        .and_then(|url| to_path(url.path()))
    else {
        return Response::status(400);
    };
    let overwrite = headers.get("overwrite").map(String::as_str) != Some("F");

    if !store.exists(src).unwrap_or(false) {
        return Response::status(404);
    }
    if !is_dir(store, parent(&dest)) {
        return Response::status(409);
    }
    let replaced = store.exists(&dest).unwrap_or(false);
    if replaced {
        if !overwrite {
            return Response::status(412);
        }
        if store.delete(&dest).is_err() {
            return Response::status(403);
        }
    }

    let result = if method == "MOVE" {
        store.move_to(src, &dest)
    } else {
        store.copy(src, &dest)
    };
    match result {
        Ok(()) if replaced => Response::status(204),
        Ok(()) => Response::status(201),
        Err(e) => Response::status(status_for(e.kind())),
    }
}

fn href(info: &FileInfo) -> String {
    let mut href = BASE.to_string();
    for segment in info.path.split('/').filter(|s| !s.is_empty()) {
        href.push('/');
        href.extend(utf8_percent_encode(segment, NON_ALPHANUMERIC));
    }
    if info.is_dir {
        href.push('/');
    }
    href
}

fn propfind(store: &MemoryProvider, path: &str, with_children: bool, with_quota: bool) -> Response {
    let Ok(info) = store.info(path) else {
        return Response::status(404);
    };
    let mut entries = vec![info];
    if with_children && entries[0].is_dir {
        match store.ll(path) {
            Ok(children) => entries.extend(children),
            Err(_) => return Response::status(500),
        }
    }

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<d:multistatus xmlns:d=\"DAV:\">\n",
    );
    for entry in &entries {
        xml.push_str("  <d:response>\n");
        xml.push_str(&format!("    <d:href>{}</d:href>\n", href(entry)));
        xml.push_str("    <d:propstat>\n      <d:prop>\n");
        xml.push_str(&format!(
            "        <d:getlastmodified>{}</d:getlastmodified>\n",
            entry.modified.format("%a, %d %b %Y %H:%M:%S GMT")
        ));
        if entry.is_dir {
            xml.push_str("        <d:resourcetype><d:collection/></d:resourcetype>\n");
        } else {
            xml.push_str("        <d:resourcetype/>\n");
            xml.push_str(&format!(
                "        <d:getcontentlength>{}</d:getcontentlength>\n",
                entry.size
            ));
        }
        if !entry.etag.is_empty() {
            xml.push_str(&format!("        <d:getetag>\"{}\"</d:getetag>\n", entry.etag));
        }
        if with_quota && entry.path == path {
            xml.push_str(&format!(
                "        <d:quota-available-bytes>{QUOTA_AVAILABLE}</d:quota-available-bytes>\n"
            ));
        }
        xml.push_str("      </d:prop>\n      <d:status>HTTP/1.1 200 OK</d:status>\n");
        xml.push_str("    </d:propstat>\n  </d:response>\n");
    }
    xml.push_str("</d:multistatus>\n");

    let mut response = Response::body(207, xml.into_bytes());
    response
        .headers
        .push(("Content-Type", "application/xml; charset=utf-8".to_string()));
    response
}
