//! Remote package acquisition.
//!
//! A package listing's URL names where its source distribution lives. The
//! scheme selects the acquisition method: `git+...#ref` clones a repository,
//! `dds+<base>/<name>@<version>` resolves against a package repository,
//! plain `http(s)://...` downloads a gzipped tarball, and `file://` copies a
//! local directory.

use crate::{cache::copy_dir_recursive, PackageError, PkgId, Result};
use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Shared blocking HTTP client. Initialized lazily on first use and torn
/// down at process exit.
pub(crate) static HTTP: Lazy<Client> = Lazy::new(Client::new);

/// Where and how to obtain a package's source distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemotePkg {
    /// A git repository checked out at a branch, tag, or revision.
    Git { url: String, refspec: String },
    /// A gzipped tar archive fetched over HTTP.
    HttpTar { url: String },
    /// A directory on the local filesystem.
    Filesystem { path: PathBuf },
}

impl RemotePkg {
    /// Parse a remote package URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let invalid = |reason: &str| PackageError::RemoteUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        if let Some(rest) = url.strip_prefix("git+") {
            let (repo, refspec) = rest
                .split_once('#')
                .ok_or_else(|| invalid("missing '#<ref>' fragment"))?;
            if repo.is_empty() || refspec.is_empty() {
                return Err(invalid("empty repository URL or ref"));
            }
            return Ok(RemotePkg::Git {
                url: repo.to_string(),
                refspec: refspec.to_string(),
            });
        }
        if let Some(rest) = url.strip_prefix("dds+") {
            // dds+<base-repo-url>/<name>@<version>
            let (base, id_str) = rest
                .rsplit_once('/')
                .ok_or_else(|| invalid("missing '<name>@<version>' suffix"))?;
            let id = PkgId::parse(id_str)
                .map_err(|_| invalid("missing '<name>@<version>' suffix"))?;
            return Ok(RemotePkg::HttpTar {
                url: format!("{base}/pkg/{}/{}/sdist.tar.gz", id.name, id.version),
            });
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(RemotePkg::Filesystem {
                path: PathBuf::from(path),
            });
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(RemotePkg::HttpTar {
                url: url.to_string(),
            });
        }
        Err(invalid("unknown URL scheme"))
    }

    /// The round-trippable URL form of this remote.
    pub fn to_url_string(&self) -> String {
        match self {
            RemotePkg::Git { url, refspec } => format!("git+{url}#{refspec}"),
            RemotePkg::HttpTar { url } => url.clone(),
            RemotePkg::Filesystem { path } => format!("file://{}", path.display()),
        }
    }

    /// Materialize the source distribution into `dest`.
    pub fn materialize_into(&self, dest: &Path) -> Result<()> {
        match self {
            RemotePkg::Git { url, refspec } => {
                info!("cloning {url} at {refspec}");
                let status = Command::new("git")
                    .args(["clone", "--quiet", "--depth", "1", "--branch", refspec])
                    .arg(url)
                    .arg(dest)
                    .status()
                    .map_err(|e| PackageError::Fetch {
                        url: self.to_url_string(),
                        reason: format!("failed to run git: {e}"),
                    })?;
                if !status.success() {
                    return Err(PackageError::Fetch {
                        url: self.to_url_string(),
                        reason: format!("git clone exited with {status}"),
                    });
                }
                Ok(())
            }
            RemotePkg::HttpTar { url } => {
                info!("downloading {url}");
                let resp = HTTP
                    .get(url)
                    .send()
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| PackageError::Http {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                let bytes = resp.bytes().map_err(|e| PackageError::Http {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
                fs::create_dir_all(dest).map_err(|e| PackageError::io(dest, e))?;
                let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_ref()));
                archive
                    .unpack(dest)
                    .map_err(|e| PackageError::io(dest, e))?;
                debug!("extracted archive into {}", dest.display());
                Ok(())
            }
            RemotePkg::Filesystem { path } => copy_dir_recursive(path, dest),
        }
    }
}

impl fmt::Display for RemotePkg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_url_round_trip() {
        let url = "git+https://example.com/acme/widgets.git#v1.2.0";
        let pkg = RemotePkg::from_url(url).unwrap();
        assert_eq!(
            pkg,
            RemotePkg::Git {
                url: "https://example.com/acme/widgets.git".into(),
                refspec: "v1.2.0".into(),
            }
        );
        assert_eq!(pkg.to_url_string(), url);
    }

    #[test]
    fn test_git_url_requires_ref() {
        assert!(RemotePkg::from_url("git+https://example.com/repo.git").is_err());
    }

    #[test]
    fn test_registry_shorthand_resolves_to_tarball() {
        let pkg = RemotePkg::from_url("dds+https://repo.example.com/widgets@1.0.0").unwrap();
        assert_eq!(
            pkg,
            RemotePkg::HttpTar {
                url: "https://repo.example.com/pkg/widgets/1.0.0/sdist.tar.gz".into()
            }
        );
    }

    #[test]
    fn test_plain_http_and_file_urls() {
        assert_eq!(
            RemotePkg::from_url("https://example.com/dl/x.tar.gz").unwrap(),
            RemotePkg::HttpTar {
                url: "https://example.com/dl/x.tar.gz".into()
            }
        );
        assert_eq!(
            RemotePkg::from_url("file:///srv/pkgs/foo").unwrap(),
            RemotePkg::Filesystem {
                path: PathBuf::from("/srv/pkgs/foo")
            }
        );
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        assert!(RemotePkg::from_url("ftp://example.com/x").is_err());
    }

    #[test]
    fn test_materialize_filesystem_copies_tree() {
        let src = tempfile::TempDir::new().unwrap();
        fs::create_dir(src.path().join("src")).unwrap();
        fs::write(src.path().join("src/a.cpp"), "int a;\n").unwrap();

        let dest = tempfile::TempDir::new().unwrap();
        let target = dest.path().join("out");
        let pkg = RemotePkg::Filesystem {
            path: src.path().to_path_buf(),
        };
        pkg.materialize_into(&target).unwrap();
        assert_eq!(
            fs::read_to_string(target.join("src/a.cpp")).unwrap(),
            "int a;\n"
        );
    }
}
