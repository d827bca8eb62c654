//! # Symbol Store Keys
//!
//! Index strings under which symbol servers and caches store files:
//! `<file>/<id>/<file>`, with the id built from the ELF build id, the Mach-O
//! UUID or the PE timestamp and image size.
//!
//! ```text
//! libcoreclr.so.dbg  →  _.debug/elf-buildid-sym-<build id>/_.debug
//! coreclr.dll (DAC)  →  mscordaccore.dll/<TIMESTAMP><size>/mscordaccore.dll
//! coreclr.pdb        →  coreclr.pdb/<GUID><age>/coreclr.pdb
//! ```

use std::fmt;
use std::ops::BitOr;

const ELF_IDENTITY_PREFIX: &str = "elf-buildid";
const ELF_SYMBOL_PREFIX: &str = "elf-buildid-sym";
const ELF_CORECLR_PREFIX: &str = "elf-buildid-coreclr";
const ELF_CORECLR_FILE: &str = "libcoreclr.so";
const ELF_DAC_DBI_FILES: &[&str] = &["libmscordaccore.so", "libmscordbi.so", "mscordaccore.dll", "mscordbi.dll"];
const ELF_SOS_FILES: &[&str] = &["libsos.so", "SOS.NETCore.dll"];

const MACHO_IDENTITY_PREFIX: &str = "mach-uuid";
const MACHO_SYMBOL_PREFIX: &str = "mach-uuid-sym";
const MACHO_CORECLR_PREFIX: &str = "mach-uuid-coreclr";
const MACHO_CORECLR_FILE: &str = "libcoreclr.dylib";
const MACHO_DAC_DBI_FILES: &[&str] = &["libmscordaccore.dylib", "libmscordbi.dylib"];
const MACHO_SOS_FILES: &[&str] = &["libsos.dylib", "SOS.NETCore.dll"];

const PE_CORECLR_FILE: &str = "coreclr.dll";
const PE_CLR_FILE: &str = "clr.dll";
const PE_CORECLR_DAC_DBI_FILES: &[&str] = &["mscordaccore.dll", "mscordbi.dll"];
const PE_CLR_DAC_DBI_FILES: &[&str] = &["mscordacwks.dll", "mscordbi.dll"];
const PE_SOS_FILES: &[&str] = &["sos.dll", "SOS.NETCore.dll"];

/// Which keys to generate for a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyTypeFlags(pub u32);

impl KeyTypeFlags
{
    pub const NONE: Self = Self(0x00);
    /// The module itself
    pub const IDENTITY_KEY: Self = Self(0x01);
    /// The module's symbol file (`.dbg`, `.dwarf`, `.pdb`)
    pub const SYMBOL_KEY: Self = Self(0x02);
    /// DAC, DBI and SOS keyed by the runtime module
    pub const CLR_KEYS: Self = Self(0x04);
    pub const FORCE_WINDOWS_PDBS: Self = Self(0x08);
    pub const HOST_KEYS: Self = Self(0x10);
    /// DAC and DBI keyed by the runtime module, without SOS
    pub const DAC_DBI_KEYS: Self = Self(0x20);
    pub const RUNTIME_KEYS: Self = Self(0x40);

    pub const fn contains(self, other: Self) -> bool
    {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn intersects(self, other: Self) -> bool
    {
        self.0 & other.0 != 0
    }
}

impl BitOr for KeyTypeFlags
{
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self
    {
        Self(self.0 | rhs.0)
    }
}

/// One file to look up in a symbol store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolStoreKey
{
    /// Relative index, e.g. `libcoreclr.so/elf-buildid-<id>/libcoreclr.so`
    pub index: String,
    /// Path the key was generated for
    pub full_path: String,
    /// Whether the file is a runtime companion (DAC, DBI, SOS)
    pub clr_special_file: bool,
}

impl SymbolStoreKey
{
    fn build(path: &str, prefix: Option<&str>, id: &str, file: Option<&str>, clr_special_file: bool) -> Self
    {
        let file = file.map_or_else(|| file_name(path).to_lowercase(), str::to_string);
        let index = match prefix {
            Some(prefix) => format!("{file}/{prefix}-{id}/{file}"),
            None => format!("{file}/{id}/{file}"),
        };
        Self {
            index,
            full_path: path.to_string(),
            clr_special_file,
        }
    }

    /// File name the key resolves to (the last index component)
    pub fn file_name(&self) -> &str
    {
        self.index.rsplit('/').next().unwrap_or(&self.index)
    }

    /// File name of the path the key was generated for
    pub fn module_file_name(&self) -> &str
    {
        file_name(&self.full_path)
    }
}

impl fmt::Display for SymbolStoreKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.index)
    }
}

/// File name of a path using either separator
pub fn file_name(path: &str) -> &str
{
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Lowercase hex of `bytes`
pub fn to_hex(bytes: &[u8]) -> String
{
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// ELF build ids are between 8 and 20 bytes; shorter ones are zero padded to 20
fn normalize_build_id(build_id: &[u8]) -> Option<Vec<u8>>
{
    if !(8..=20).contains(&build_id.len()) {
        return None;
    }
    let mut normalized = build_id.to_vec();
    normalized.resize(20, 0);
    Some(normalized)
}

/// Keys for an ELF module identified by its build id
pub fn elf_keys(flags: KeyTypeFlags, path: &str, build_id: &[u8]) -> Vec<SymbolStoreKey>
{
    let Some(build_id) = normalize_build_id(build_id) else {
        return Vec::new();
    };
    let id = to_hex(&build_id);
    let file = file_name(path);
    let mut keys = Vec::new();

    if flags.contains(KeyTypeFlags::IDENTITY_KEY) {
        let special = ELF_DAC_DBI_FILES.contains(&file) || ELF_SOS_FILES.contains(&file);
        keys.push(SymbolStoreKey::build(path, Some(ELF_IDENTITY_PREFIX), &id, None, special));
    }
    if flags.contains(KeyTypeFlags::HOST_KEYS) && file == "dotnet" {
        keys.push(SymbolStoreKey::build(path, Some(ELF_IDENTITY_PREFIX), &id, None, false));
    }
    if flags.contains(KeyTypeFlags::RUNTIME_KEYS) && file == ELF_CORECLR_FILE {
        keys.push(SymbolStoreKey::build(path, Some(ELF_IDENTITY_PREFIX), &id, None, false));
    }
    if flags.contains(KeyTypeFlags::SYMBOL_KEY) {
        let symbol_file = format!("{path}.dbg");
        keys.push(SymbolStoreKey::build(&symbol_file, Some(ELF_SYMBOL_PREFIX), &id, Some("_.debug"), false));
    }
    if flags.intersects(KeyTypeFlags::CLR_KEYS | KeyTypeFlags::DAC_DBI_KEYS) && file == ELF_CORECLR_FILE {
        for special in special_files(flags, ELF_DAC_DBI_FILES, ELF_SOS_FILES) {
            keys.push(SymbolStoreKey::build(special, Some(ELF_CORECLR_PREFIX), &id, None, true));
        }
    }
    keys
}

/// Keys for a Mach-O module identified by its LC_UUID
pub fn macho_keys(flags: KeyTypeFlags, path: &str, uuid: &[u8]) -> Vec<SymbolStoreKey>
{
    let id = to_hex(uuid);
    let file = file_name(path);
    let mut keys = Vec::new();

    if flags.contains(KeyTypeFlags::IDENTITY_KEY) {
        let special = MACHO_DAC_DBI_FILES.contains(&file) || MACHO_SOS_FILES.contains(&file);
        keys.push(SymbolStoreKey::build(path, Some(MACHO_IDENTITY_PREFIX), &id, None, special));
    }
    if flags.contains(KeyTypeFlags::RUNTIME_KEYS) && file == MACHO_CORECLR_FILE {
        keys.push(SymbolStoreKey::build(path, Some(MACHO_IDENTITY_PREFIX), &id, None, false));
    }
    if flags.contains(KeyTypeFlags::SYMBOL_KEY) {
        let symbol_file = format!("{path}.dwarf");
        keys.push(SymbolStoreKey::build(&symbol_file, Some(MACHO_SYMBOL_PREFIX), &id, Some("_.dwarf"), false));
    }
    if flags.intersects(KeyTypeFlags::CLR_KEYS | KeyTypeFlags::DAC_DBI_KEYS) && file == MACHO_CORECLR_FILE {
        for special in special_files(flags, MACHO_DAC_DBI_FILES, MACHO_SOS_FILES) {
            keys.push(SymbolStoreKey::build(special, Some(MACHO_CORECLR_PREFIX), &id, None, true));
        }
    }
    keys
}

fn special_files(flags: KeyTypeFlags, dac_dbi: &'static [&'static str], sos: &'static [&'static str]) -> Vec<&'static str>
{
    let mut files = dac_dbi.to_vec();
    if flags.contains(KeyTypeFlags::CLR_KEYS) {
        files.extend_from_slice(sos);
    }
    files
}

fn pe_id(timestamp: u32, size_of_image: u32) -> String
{
    format!("{:08X}{:x}", timestamp, size_of_image)
}

/// Identity key of a PE image
pub fn pe_identity_key(path: &str, timestamp: u32, size_of_image: u32) -> SymbolStoreKey
{
    let file = file_name(path).to_lowercase();
    let special = ["mscordaccore.dll", "mscordacwks.dll", "mscordbi.dll"].contains(&file.as_str());
    SymbolStoreKey::build(path, None, &pe_id(timestamp, size_of_image), None, special)
}

/// CodeView (`RSDS`) record of a PE image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdbInfo
{
    pub path: String,
    pub guid: [u8; 16],
    pub age: u32,
}

impl PdbInfo
{
    /// `<GUID><age>` with the GUID in registry byte order, uppercase
    fn id(&self) -> String
    {
        let g = &self.guid;
        let data1 = u32::from_le_bytes([g[0], g[1], g[2], g[3]]);
        let data2 = u16::from_le_bytes([g[4], g[5]]);
        let data3 = u16::from_le_bytes([g[6], g[7]]);
        format!("{:08X}{:04X}{:04X}{}{:x}", data1, data2, data3, to_hex(&g[8..]).to_uppercase(), self.age)
    }
}

/// Keys for a PE module
pub fn pe_keys(flags: KeyTypeFlags, path: &str, timestamp: u32, size_of_image: u32, pdb: Option<&PdbInfo>) -> Vec<SymbolStoreKey>
{
    let file = file_name(path).to_lowercase();
    let id = pe_id(timestamp, size_of_image);
    let mut keys = Vec::new();

    if flags.contains(KeyTypeFlags::IDENTITY_KEY) {
        keys.push(pe_identity_key(path, timestamp, size_of_image));
    }
    if flags.contains(KeyTypeFlags::RUNTIME_KEYS) && (file == PE_CORECLR_FILE || file == PE_CLR_FILE) {
        keys.push(pe_identity_key(path, timestamp, size_of_image));
    }
    if flags.contains(KeyTypeFlags::SYMBOL_KEY) {
        if let Some(pdb) = pdb {
            keys.push(SymbolStoreKey::build(&pdb.path, None, &pdb.id(), None, false));
        }
    }
    if flags.contains(KeyTypeFlags::CLR_KEYS) && (file == PE_CORECLR_FILE || file == PE_CLR_FILE) {
        for special in PE_SOS_FILES {
            keys.push(SymbolStoreKey::build(special, None, &id, None, true));
        }
    }
    if flags.intersects(KeyTypeFlags::CLR_KEYS | KeyTypeFlags::DAC_DBI_KEYS) {
        let files = match file.as_str() {
            PE_CORECLR_FILE => PE_CORECLR_DAC_DBI_FILES,
            PE_CLR_FILE => PE_CLR_DAC_DBI_FILES,
            _ => &[],
        };
        for special in files {
            keys.push(SymbolStoreKey::build(special, None, &id, None, true));
        }
    }
    keys
}
