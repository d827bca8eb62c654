//! # Symbol Service
//!
//! Symbol store configuration (servers, caches, search directories) and the
//! lookups SOS needs: native symbol files for `loadsymbols`, the DAC and DBI
//! for a runtime build, assembly metadata for the DAC, and source line
//! information for managed frames.
//!
//! ## Symbol paths
//!
//! [`SymbolService::parse_symbol_path`] accepts the Windows debugger syntax,
//! elements separated by `;` and processed right to left:
//!
//! - `srv*[cache*]server`: a symbol server with optional caches; an empty
//!   cache (`srv**server`) means the default cache
//! - `symsrv*dll*[cache*]server`: same, the server DLL is ignored
//! - `cache*[dir]`: a cache, default when empty
//! - anything else: a plain directory to search

use std::path::PathBuf;

use crate::error::Result;

pub mod image;
pub mod keys;
mod store;

pub use image::{pe_metadata, read_image_identity, ImageFormat, ImageIdentity};
pub use keys::{KeyTypeFlags, PdbInfo, SymbolStoreKey};
pub use store::LocalSymbolStore;

/// Public Microsoft symbol server
pub const MSDL_SYMBOL_SERVER: &str = "https://msdl.microsoft.com/download/symbols/";
/// Internal Microsoft symbol server (authenticated)
pub const SYMWEB_SYMBOL_SERVER: &str = "https://symweb.azurefd.net/";
/// Server timeout used when none is given
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 4;

/// A symbol server to add to the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolServer
{
    /// Use the public Microsoft server when no URL is given
    pub msdl: bool,
    /// Use the internal Microsoft server
    pub symweb: bool,
    pub url: Option<String>,
    pub auth_token: Option<String>,
    pub timeout_minutes: Option<u32>,
}

impl SymbolServer
{
    pub fn url(url: impl Into<String>) -> Self
    {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// The URL this configuration resolves to
    pub fn resolved_url(&self) -> &str
    {
        if self.symweb {
            return SYMWEB_SYMBOL_SERVER;
        }
        self.url.as_deref().unwrap_or(MSDL_SYMBOL_SERVER)
    }
}

/// What to open a source-line reader over
#[derive(Debug, Clone, Default)]
pub struct SymbolReaderRequest
{
    /// Path of the assembly, `None` for in-memory and dynamic modules
    pub assembly_path: Option<String>,
    /// Whether `pe_image` is in file layout (vs. loaded layout)
    pub is_file_layout: bool,
    /// In-memory PE image
    pub pe_image: Option<Vec<u8>>,
    /// In-memory portable PDB
    pub pdb_image: Option<Vec<u8>>,
}

/// Source-line information of one managed module
pub trait SymbolReader: Send + Sync
{
    /// Method token and IL offset of the first sequence point on `line` of `file_path`
    fn resolve_sequence_point(&self, file_path: &str, line: i32) -> Option<(i32, i32)>;

    /// Source line and file of an IL offset
    fn line_by_il_offset(&self, method_token: i32, il_offset: i64) -> Option<(i32, String)>;

    /// Name of local variable `index` of a method
    fn local_variable_name(&self, method_token: i32, index: i32) -> Option<String>;
}

/// Symbol store configuration and lookups
pub trait SymbolService: Send + Sync
{
    fn is_symbol_store_enabled(&self) -> bool;

    /// Cache used when a server is added without one
    fn default_symbol_cache(&self) -> PathBuf;

    /// ## Errors
    ///
    /// - `InvalidArgument`: the URL is neither an absolute URL nor a path
    fn add_symbol_server(&self, server: &SymbolServer) -> Result<()>;

    fn add_cache_path(&self, path: &str);

    fn add_directory_path(&self, path: &str);

    /// Remove every server, cache and directory
    fn disable_symbol_store(&self);

    /// Human readable store configuration, one store per line
    fn describe(&self) -> String;

    /// Local path of the file behind `key`, downloading it if needed
    fn download_file(&self, key: &SymbolStoreKey) -> Option<PathBuf>;

    /// Metadata of the assembly, from disk or the store
    fn get_metadata(&self, image_path: &str, timestamp: u32, size_of_image: u32) -> Option<Vec<u8>>;

    /// ## Errors
    ///
    /// - `NotSupported`: this service cannot read symbols for the module
    fn open_symbol_reader(&self, request: SymbolReaderRequest) -> Result<Box<dyn SymbolReader>>;

    /// Apply a Windows-style symbol path; `false` on the first malformed element
    fn parse_symbol_path(&self, symbol_path: &str) -> bool
    {
        let elements: Vec<&str> = symbol_path.split(';').filter(|element| !element.is_empty()).collect();
        for element in elements.into_iter().rev() {
            let parts: Vec<&str> = element.split('*').collect();
            let mut caches: Vec<String> = Vec::new();
            let mut directory: Option<&str> = None;
            let mut server: Option<String> = None;

            let mut parse_server = |start: usize, caches: &mut Vec<String>| {
                let mut url = MSDL_SYMBOL_SERVER.to_string();
                for (i, part) in parts.iter().enumerate().skip(start) {
                    let last = i == parts.len() - 1;
                    if part.is_empty() {
                        if !last {
                            caches.push(self.default_symbol_cache().to_string_lossy().into_owned());
                        }
                    } else if !last {
                        caches.push((*part).to_string());
                    } else {
                        url = (*part).to_string();
                    }
                }
                server = Some(url);
            };

            match parts[0].to_ascii_lowercase().as_str() {
                "symsrv" => {
                    if parts.len() <= 2 {
                        return false;
                    }
                    parse_server(2, &mut caches);
                }
                "srv" => {
                    if parts.len() <= 1 {
                        return false;
                    }
                    parse_server(1, &mut caches);
                }
                "cache" => {
                    if parts.len() <= 1 {
                        return false;
                    }
                    for (i, part) in parts.iter().enumerate().skip(1) {
                        if !part.is_empty() {
                            caches.push((*part).to_string());
                        } else if i == 1 {
                            caches.push(self.default_symbol_cache().to_string_lossy().into_owned());
                        }
                    }
                }
                _ => {
                    if parts.len() != 1 {
                        return false;
                    }
                    directory = Some(parts[0]);
                }
            }

            if let Some(url) = server {
                let url = url.trim();
                let server = SymbolServer {
                    symweb: is_symweb(url),
                    url: Some(url.to_string()),
                    ..SymbolServer::default()
                };
                if self.add_symbol_server(&server).is_err() {
                    return false;
                }
            }
            for cache in caches.iter().rev() {
                self.add_cache_path(cache.trim());
            }
            if let Some(directory) = directory {
                self.add_directory_path(directory.trim());
            }
        }
        true
    }
}

/// Whether `url` points at the internal symweb server
fn is_symweb(url: &str) -> bool
{
    host_of(url).is_some_and(|host| Some(host) == host_of(SYMWEB_SYMBOL_SERVER))
}

fn host_of(url: &str) -> Option<String>
{
    let rest = url.split_once("://")?.1;
    Some(rest.split(['/', ':']).next()?.to_ascii_lowercase())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_resolved_url()
    {
        assert_eq!(SymbolServer::default().resolved_url(), MSDL_SYMBOL_SERVER);
        assert_eq!(SymbolServer::url("https://example.com/symbols").resolved_url(), "https://example.com/symbols");
        let symweb = SymbolServer {
            symweb: true,
            url: Some("https://example.com".to_string()),
            ..SymbolServer::default()
        };
        assert_eq!(symweb.resolved_url(), SYMWEB_SYMBOL_SERVER);
    }

    #[test]
    fn test_is_symweb()
    {
        assert!(is_symweb("https://SYMWEB.azurefd.net/"));
        assert!(!is_symweb("https://msdl.microsoft.com/download/symbols"));
        assert!(!is_symweb("/tmp/cache"));
    }
}
