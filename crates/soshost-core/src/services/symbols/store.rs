//! Local symbol store chain.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, trace, warn};

use super::image::pe_metadata;
use super::keys::{pe_identity_key, SymbolStoreKey};
use super::{SymbolReader, SymbolReaderRequest, SymbolServer, SymbolService, DEFAULT_TIMEOUT_MINUTES};
use crate::error::{HostError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Store
{
    Server
    {
        uri: String,
        timeout_minutes: u32,
        authenticated: bool,
    },
    Cache(PathBuf),
    Directory(PathBuf),
}

impl fmt::Display for Store
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Server {
                uri,
                timeout_minutes,
                authenticated,
            } => {
                write!(f, "Server: {uri} Timeout: {timeout_minutes}")?;
                if *authenticated {
                    write!(f, " Authenticated")?;
                }
                Ok(())
            }
            Self::Cache(path) => write!(f, "Cache: {}", path.display()),
            Self::Directory(path) => write!(f, "Directory: {}", path.display()),
        }
    }
}

/// [`SymbolService`] over local caches and directories
///
/// Stores form a chain searched newest first. Symbol servers are recorded
/// and reported but never contacted: a file is found only when a cache or
/// directory already holds it.
pub struct LocalSymbolStore
{
    stores: Mutex<Vec<Store>>,
    default_cache: PathBuf,
}

impl LocalSymbolStore
{
    /// Empty (disabled) store with the platform default cache
    pub fn new() -> Self
    {
        Self::with_default_cache(platform_default_cache())
    }

    pub fn with_default_cache(default_cache: impl Into<PathBuf>) -> Self
    {
        Self {
            stores: Mutex::new(Vec::new()),
            default_cache: default_cache.into(),
        }
    }

    fn stores(&self) -> std::sync::MutexGuard<'_, Vec<Store>>
    {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(store: &Store, key: &SymbolStoreKey) -> Option<PathBuf>
    {
        let candidate = match store {
            Store::Server { uri, .. } => {
                trace!(%uri, index = %key.index, "skipping symbol server");
                return None;
            }
            Store::Cache(cache) => key.index.split('/').fold(cache.clone(), |path, part| path.join(part)),
            Store::Directory(directory) => directory.join(key.module_file_name()),
        };
        candidate.is_file().then_some(candidate)
    }
}

impl Default for LocalSymbolStore
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl fmt::Debug for LocalSymbolStore
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("LocalSymbolStore")
            .field("stores", &*self.stores())
            .field("default_cache", &self.default_cache)
            .finish()
    }
}

/// `%TEMP%\SymbolCache` on Windows, `~/.dotnet/symbolcache` elsewhere
fn platform_default_cache() -> PathBuf
{
    if cfg!(windows) {
        std::env::temp_dir().join("SymbolCache")
    } else {
        let home = std::env::var_os("HOME").map_or_else(std::env::temp_dir, PathBuf::from);
        home.join(".dotnet").join("symbolcache")
    }
}

fn full_path(path: &str) -> PathBuf
{
    std::path::absolute(path).unwrap_or_else(|_| PathBuf::from(path))
}

/// Whether `path` names a file system location rather than a URL
fn is_file_path(path: &str) -> bool
{
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    path.starts_with('/') || path.starts_with("\\\\") || path.starts_with("file://") || drive
}

impl SymbolService for LocalSymbolStore
{
    fn is_symbol_store_enabled(&self) -> bool
    {
        !self.stores().is_empty()
    }

    fn default_symbol_cache(&self) -> PathBuf
    {
        self.default_cache.clone()
    }

    fn add_symbol_server(&self, server: &SymbolServer) -> Result<()>
    {
        let url = server.resolved_url().trim();
        if is_file_path(url) {
            self.add_cache_path(url.trim_start_matches("file://"));
            return Ok(());
        }
        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(HostError::InvalidArgument(format!("symbol server '{url}'")));
        };
        if !matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https") || rest.is_empty() {
            return Err(HostError::InvalidArgument(format!("symbol server '{url}'")));
        }
        let uri = format!("{}/", url.trim_end_matches('/'));

        let mut stores = self.stores();
        if stores.iter().any(|store| matches!(store, Store::Server { uri: existing, .. } if existing.eq_ignore_ascii_case(&uri))) {
            debug!(%uri, "symbol server already present");
            return Ok(());
        }
        debug!(%uri, "adding symbol server");
        stores.insert(
            0,
            Store::Server {
                uri,
                timeout_minutes: server.timeout_minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES),
                authenticated: server.symweb || server.auth_token.is_some(),
            },
        );
        Ok(())
    }

    fn add_cache_path(&self, path: &str)
    {
        let path = full_path(path);
        let mut stores = self.stores();
        if matches!(stores.first(), Some(Store::Cache(head)) if *head == path) {
            return;
        }
        debug!(path = %path.display(), "adding symbol cache");
        stores.insert(0, Store::Cache(path));
    }

    fn add_directory_path(&self, path: &str)
    {
        let path = full_path(path);
        let mut stores = self.stores();
        if stores.iter().any(|store| matches!(store, Store::Directory(existing) if *existing == path)) {
            return;
        }
        debug!(path = %path.display(), "adding symbol directory");
        stores.insert(0, Store::Directory(path));
    }

    fn disable_symbol_store(&self)
    {
        self.stores().clear();
    }

    fn describe(&self) -> String
    {
        let mut text = String::from("Current symbol store settings:\n");
        for store in self.stores().iter() {
            text.push_str(&format!("-> {store}\n"));
        }
        text
    }

    fn download_file(&self, key: &SymbolStoreKey) -> Option<PathBuf>
    {
        let stores = self.stores().clone();
        let found = stores.iter().find_map(|store| Self::lookup(store, key));
        match &found {
            Some(path) => debug!(index = %key.index, path = %path.display(), "symbol file found"),
            None => trace!(index = %key.index, "symbol file not found"),
        }
        found
    }

    fn get_metadata(&self, image_path: &str, timestamp: u32, size_of_image: u32) -> Option<Vec<u8>>
    {
        let local = Path::new(image_path);
        let path = if local.is_file() {
            local.to_path_buf()
        } else if self.is_symbol_store_enabled() {
            self.download_file(&pe_identity_key(image_path, timestamp, size_of_image))?
        } else {
            return None;
        };
        match std::fs::read(&path) {
            Ok(image) => pe_metadata(&image),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read image for metadata");
                None
            }
        }
    }

    fn open_symbol_reader(&self, request: SymbolReaderRequest) -> Result<Box<dyn SymbolReader>>
    {
        Err(HostError::NotSupported(format!(
            "portable PDB reader for {}",
            request.assembly_path.as_deref().unwrap_or("<in-memory module>")
        )))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::services::symbols::MSDL_SYMBOL_SERVER;

    fn store() -> LocalSymbolStore
    {
        LocalSymbolStore::with_default_cache("/var/cache/symbols")
    }

    fn lines(store: &LocalSymbolStore) -> Vec<String>
    {
        store.describe().lines().skip(1).map(str::to_string).collect()
    }

    #[test]
    fn test_empty_store_is_disabled()
    {
        let store = store();
        assert!(!store.is_symbol_store_enabled());
        assert_eq!(store.describe(), "Current symbol store settings:\n");
    }

    #[test]
    fn test_parse_srv_with_default_cache()
    {
        let store = store();
        assert!(store.parse_symbol_path(&format!("srv**{MSDL_SYMBOL_SERVER}")));
        assert_eq!(
            lines(&store),
            vec![
                "-> Cache: /var/cache/symbols".to_string(),
                format!("-> Server: {MSDL_SYMBOL_SERVER} Timeout: 4"),
            ]
        );
    }

    #[test]
    fn test_parse_elements_right_to_left()
    {
        let store = store();
        assert!(store.parse_symbol_path("/opt/symbols;cache*/tmp/cache1*/tmp/cache2;srv*https://example.com/syms"));
        assert_eq!(
            lines(&store),
            vec![
                "-> Directory: /opt/symbols",
                "-> Cache: /tmp/cache1",
                "-> Cache: /tmp/cache2",
                "-> Server: https://example.com/syms/ Timeout: 4",
            ]
        );
    }

    #[test]
    fn test_parse_symsrv_and_empty_cache()
    {
        let store = store();
        assert!(store.parse_symbol_path("symsrv*symsrv.dll*/tmp/c*https://example.com"));
        assert!(store.parse_symbol_path("cache*"));
        assert_eq!(
            lines(&store),
            vec![
                "-> Cache: /var/cache/symbols",
                "-> Cache: /tmp/c",
                "-> Server: https://example.com/ Timeout: 4",
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed_elements()
    {
        let store = store();
        assert!(!store.parse_symbol_path("srv"));
        assert!(!store.parse_symbol_path("symsrv*x"));
        assert!(!store.parse_symbol_path("cache"));
        assert!(!store.parse_symbol_path("foo*bar"));
        assert!(!store.parse_symbol_path("srv*ftp:/nope"));
        assert!(!store.is_symbol_store_enabled());
    }

    #[test]
    fn test_duplicates_are_skipped()
    {
        let store = store();
        store.add_directory_path("/tmp/dir");
        store.add_cache_path("/tmp/cache");
        store.add_directory_path("/tmp/dir");
        store.add_cache_path("/tmp/cache");
        assert!(store.add_symbol_server(&SymbolServer::default()).is_ok());
        assert!(store.add_symbol_server(&SymbolServer::url(MSDL_SYMBOL_SERVER)).is_ok());
        assert_eq!(lines(&store).len(), 3);

        store.disable_symbol_store();
        assert!(!store.is_symbol_store_enabled());
    }

    #[test]
    fn test_file_server_becomes_cache()
    {
        let store = store();
        assert!(store.add_symbol_server(&SymbolServer::url("/srv/symbols")).is_ok());
        assert_eq!(lines(&store), vec!["-> Cache: /srv/symbols"]);
    }

    #[test]
    fn test_download_from_cache_and_directory()
    {
        let root = std::env::temp_dir().join(format!("soshost-store-{}", std::process::id()));
        let key = pe_identity_key("/app/coreclr.dll", 0x5f3e_1a2b, 0x4b_0000);
        let cached = root.join("cache").join(key.index.replace('/', std::path::MAIN_SEPARATOR_STR));
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"MZ").unwrap();
        std::fs::create_dir_all(root.join("dir")).unwrap();
        std::fs::write(root.join("dir").join("libfoo.so"), b"\x7fELF").unwrap();

        let store = store();
        assert_eq!(store.download_file(&key), None);
        store.add_cache_path(root.join("cache").to_str().unwrap());
        store.add_directory_path(root.join("dir").to_str().unwrap());
        assert_eq!(store.download_file(&key), Some(cached));

        let elf = SymbolStoreKey {
            index: "libfoo.so/elf-buildid-00/libfoo.so".to_string(),
            full_path: "/usr/lib/libfoo.so".to_string(),
            clr_special_file: false,
        };
        assert_eq!(store.download_file(&elf), Some(root.join("dir").join("libfoo.so")));

        // Not a PE image, so no metadata
        assert_eq!(store.get_metadata("/app/coreclr.dll", 0x5f3e_1a2b, 0x4b_0000), None);
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_symbol_reader_unsupported()
    {
        let result = store().open_symbol_reader(SymbolReaderRequest::default());
        assert!(matches!(result, Err(HostError::NotSupported(_))));
    }
}
