//! Remote synchronization tests against a local HTTP server.
//!
//! The server serves a real SQLite index from memory, honors
//! `If-None-Match` with a 304, and can be swapped to serve garbage to
//! exercise import atomicity.

use cobble_package::{add_remote, remove_remote, PackageDb, PkgRemote};
use rusqlite::Connection;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct ServedIndex {
    body: Vec<u8>,
    etag: String,
}

#[derive(Clone)]
struct IndexServer {
    url: String,
    state: Arc<Mutex<ServedIndex>>,
}

impl IndexServer {
    fn start(body: Vec<u8>, etag: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(Mutex::new(ServedIndex {
            body,
            etag: etag.to_string(),
        }));
        let server_state = Arc::clone(&state);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut if_none_match = None;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        break;
                    }
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some(value) = line
                        .to_ascii_lowercase()
                        .strip_prefix("if-none-match:")
                        .map(str::trim)
                    {
                        if_none_match = Some(value.to_string());
                    }
                }
                let index = server_state.lock().unwrap();
                let response = if if_none_match.as_deref() == Some(index.etag.as_str()) {
                    b"HTTP/1.1 304 Not Modified\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_vec()
                } else {
                    let mut head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nETag: {}\r\n\
                         Last-Modified: Thu, 01 Jan 2026 00:00:00 GMT\r\nConnection: close\r\n\r\n",
                        index.body.len(),
                        index.etag
                    )
                    .into_bytes();
                    head.extend_from_slice(&index.body);
                    head
                };
                let _ = stream.write_all(&response);
                let _ = stream.flush();
            }
        });
        IndexServer { url, state }
    }

    fn set_body(&self, body: Vec<u8>, etag: &str) {
        let mut state = self.state.lock().unwrap();
        state.body = body;
        state.etag = etag.to_string();
    }
}

/// Build a remote index database and return its raw bytes.
fn make_index(name: &str, packages: &[(&str, &str, &str)], deps: &[(i64, &str, &str, &str)]) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repo.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE repo_meta (name TEXT NOT NULL);
             CREATE TABLE repo_packages (
                package_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                description TEXT NOT NULL,
                url TEXT NOT NULL
             );
             CREATE TABLE repo_package_deps (
                package_id INTEGER NOT NULL,
                dep_name TEXT NOT NULL,
                low TEXT NOT NULL,
                high TEXT NOT NULL
             );",
        )
        .unwrap();
        conn.execute("INSERT INTO repo_meta (name) VALUES (?1)", [name])
            .unwrap();
        for (pkg_name, version, url) in packages {
            conn.execute(
                "INSERT INTO repo_packages (name, version, description, url)
                 VALUES (?1, ?2, 'test package', ?3)",
                [pkg_name, version, url],
            )
            .unwrap();
        }
        for (package_id, dep_name, low, high) in deps {
            conn.execute(
                "INSERT INTO repo_package_deps (package_id, dep_name, low, high)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![package_id, dep_name, low, high],
            )
            .unwrap();
        }
    }
    std::fs::read(&path).unwrap()
}

fn standard_index(name: &str) -> Vec<u8> {
    make_index(
        name,
        &[
            ("foo", "1.0.0", "dds:foo@1.0.0"),
            ("bar", "1.2.0", "git+https://example.com/bar.git#v1.2.0"),
        ],
        &[(1, "bar", "1.0.0", "2.0.0")],
    )
}

#[test]
fn test_connect_reads_remote_name() {
    let server = IndexServer::start(standard_index("test-repo"), "\"e1\"");
    let remote = PkgRemote::connect(&server.url).unwrap();
    assert_eq!(remote.name(), "test-repo");
}

#[test]
fn test_update_imports_and_rewrites_urls() {
    let server = IndexServer::start(standard_index("test-repo"), "\"e1\"");
    let db = PackageDb::open_in_memory().unwrap();
    let remote = add_remote(&db, &server.url).unwrap();
    remote.update(&db, None, None).unwrap();

    let all = db.all().unwrap();
    assert_eq!(all.len(), 2);

    let foo = db.get(&"foo@1.0.0".parse().unwrap()).unwrap();
    // The dds: shorthand expands against the remote's own base URL.
    assert_eq!(
        foo.remote_pkg.to_url_string(),
        format!("{}/pkg/foo/1.0.0/sdist.tar.gz", server.url)
    );
    assert_eq!(foo.deps.len(), 1);
    assert_eq!(foo.deps[0].name.as_str(), "bar");

    let bar = db.get(&"bar@1.2.0".parse().unwrap()).unwrap();
    assert_eq!(
        bar.remote_pkg.to_url_string(),
        "git+https://example.com/bar.git#v1.2.0"
    );
}

#[test]
fn test_second_update_hits_304_and_keeps_rows() {
    let server = IndexServer::start(standard_index("test-repo"), "\"e1\"");
    let db = PackageDb::open_in_memory().unwrap();
    let remote = add_remote(&db, &server.url).unwrap();
    remote.update(&db, None, None).unwrap();
    assert_eq!(db.all().unwrap().len(), 2);

    // The second sync presents the stored ETag; the server answers 304 and
    // the database is left untouched.
    remote.update(&db, Some("\"e1\""), None).unwrap();
    assert_eq!(db.all().unwrap().len(), 2);
}

#[test]
fn test_update_replaces_prior_contents() {
    let server = IndexServer::start(standard_index("test-repo"), "\"e1\"");
    let db = PackageDb::open_in_memory().unwrap();
    let remote = add_remote(&db, &server.url).unwrap();
    remote.update(&db, None, None).unwrap();

    server.set_body(
        make_index("test-repo", &[("foo", "2.0.0", "dds:foo@2.0.0")], &[]),
        "\"e2\"",
    );
    remote.update(&db, Some("\"e1\""), None).unwrap();

    let all = db.all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].to_string(), "foo@2.0.0");
}

#[test]
fn test_broken_index_leaves_database_intact() {
    let server = IndexServer::start(standard_index("test-repo"), "\"e1\"");
    let db = PackageDb::open_in_memory().unwrap();
    let remote = add_remote(&db, &server.url).unwrap();
    remote.update(&db, None, None).unwrap();
    assert_eq!(db.all().unwrap().len(), 2);

    // Serve a database that is missing the repo_packages table entirely.
    // The import fails mid-transaction and must roll back in full.
    let broken = {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE repo_meta (name TEXT NOT NULL);")
            .unwrap();
        drop(conn);
        std::fs::read(&path).unwrap()
    };
    server.set_body(broken, "\"e3\"");

    assert!(remote.update(&db, Some("\"e1\""), None).is_err());
    assert_eq!(db.all().unwrap().len(), 2, "prior contents must survive");
}

#[test]
fn test_remove_remote_cascades() {
    let server = IndexServer::start(standard_index("test-repo"), "\"e1\"");
    let db = PackageDb::open_in_memory().unwrap();
    let remote = add_remote(&db, &server.url).unwrap();
    remote.update(&db, None, None).unwrap();
    assert_eq!(db.all().unwrap().len(), 2);

    remove_remote(&db, "test-repo").unwrap();
    assert!(db.all().unwrap().is_empty());
}
