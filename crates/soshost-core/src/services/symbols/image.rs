//! Module identity read from target memory or from image files.
//!
//! Symbol store keys need the build id (ELF), UUID (Mach-O) or timestamp and
//! image size (PE) of a loaded module. Loaded images have no section
//! headers in memory, so only the headers, program headers and load
//! commands are consulted, read straight from the module's base address.

use object::read::elf::{FileHeader, ProgramHeader};
use object::read::macho::MachHeader;
use object::read::pe::{ImageNtHeaders, ImageOptionalHeader, PeFile};
use object::{elf, macho, pe, Endian, Endianness, FileKind, LittleEndian as LE};
use tracing::trace;

use super::keys::{elf_keys, macho_keys, pe_keys, KeyTypeFlags, PdbInfo, SymbolStoreKey};
use crate::services::MemoryService;
use crate::types::Address;

/// Bytes read from the module base to find the headers
const HEADER_SIZE: usize = 0x1000;
/// Mach-O load commands can run past the first page
const MACHO_HEADER_SIZE: usize = 0x8000;

/// Index of the file class byte in `e_ident` (not exported by `object`)
const EI_CLASS: usize = 4;
const ELF_NOTE_HEADER: usize = 12;
const DEBUG_DIRECTORY_SIZE: usize = 28;
const MAX_DEBUG_ENTRIES: usize = 16;
const CODEVIEW_SIGNATURE: &[u8; 4] = b"RSDS";

/// Executable format of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat
{
    Elf,
    MachO,
    Pe,
}

/// What identifies a module in a symbol store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageIdentity
{
    Elf
    {
        build_id: Vec<u8>,
    },
    MachO
    {
        uuid: [u8; 16],
    },
    Pe
    {
        timestamp: u32,
        size_of_image: u32,
        pdb: Option<PdbInfo>,
    },
}

impl ImageIdentity
{
    /// Keys for the module at `path` carrying this identity
    pub fn keys(&self, flags: KeyTypeFlags, path: &str) -> Vec<SymbolStoreKey>
    {
        match self {
            ImageIdentity::Elf { build_id } => elf_keys(flags, path, build_id),
            ImageIdentity::MachO { uuid } => macho_keys(flags, path, uuid),
            ImageIdentity::Pe {
                timestamp,
                size_of_image,
                pdb,
            } => pe_keys(flags, path, *timestamp, *size_of_image, pdb.as_ref()),
        }
    }
}

/// Read the identity of the module loaded at `base`
///
/// Returns `None` when the headers are unreadable or malformed.
pub fn read_image_identity(memory: &dyn MemoryService, format: ImageFormat, base: Address) -> Option<ImageIdentity>
{
    let identity = match format {
        ImageFormat::Elf => read_elf_build_id(memory, base).map(|build_id| ImageIdentity::Elf { build_id }),
        ImageFormat::MachO => read_macho_uuid(memory, base).map(|uuid| ImageIdentity::MachO { uuid }),
        ImageFormat::Pe => read_pe_identity(memory, base),
    };
    trace!(%base, ?format, found = identity.is_some(), "read image identity");
    identity
}

fn read_bytes(memory: &dyn MemoryService, address: Address, size: usize) -> Option<Vec<u8>>
{
    let mut buffer = vec![0u8; size];
    let read = memory.read_memory(address, &mut buffer).ok()?;
    buffer.truncate(read);
    (read > 0).then_some(buffer)
}

fn read_elf_build_id(memory: &dyn MemoryService, base: Address) -> Option<Vec<u8>>
{
    let header = read_bytes(memory, base, HEADER_SIZE)?;
    match *header.get(EI_CLASS)? {
        elf::ELFCLASS64 => elf_build_id::<elf::FileHeader64<Endianness>>(memory, base, &header),
        elf::ELFCLASS32 => elf_build_id::<elf::FileHeader32<Endianness>>(memory, base, &header),
        _ => None,
    }
}

fn elf_build_id<Elf>(memory: &dyn MemoryService, base: Address, data: &[u8]) -> Option<Vec<u8>>
where
    Elf: FileHeader<Endian = Endianness>,
{
    let header = Elf::parse(data).ok()?;
    let endian = header.endian().ok()?;
    if !endian.is_little_endian() {
        return None;
    }
    let segments = header.program_headers(endian, data).ok()?;

    // Non-PIE executables are linked at a fixed address; everything else at 0.
    let first_load = segments
        .iter()
        .filter(|segment| segment.p_type(endian) == elf::PT_LOAD)
        .map(|segment| Into::<u64>::into(segment.p_vaddr(endian)) & !0xfff)
        .min()?;

    for segment in segments.iter().filter(|segment| segment.p_type(endian) == elf::PT_NOTE) {
        let vaddr: u64 = segment.p_vaddr(endian).into();
        let size: u64 = segment.p_memsz(endian).into();
        let align: u64 = segment.p_align(endian).into();
        let address = base + vaddr.wrapping_sub(first_load);
        let Some(notes) = read_bytes(memory, address, usize::try_from(size).ok()?) else {
            continue;
        };
        if let Some(build_id) = find_gnu_build_id(&notes, if align == 8 { 8 } else { 4 }) {
            return Some(build_id);
        }
    }
    None
}

fn align_up(value: usize, align: usize) -> usize
{
    (value + align - 1) & !(align - 1)
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32>
{
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Walk a little-endian note segment looking for `NT_GNU_BUILD_ID`
fn find_gnu_build_id(notes: &[u8], align: usize) -> Option<Vec<u8>>
{
    let mut offset = 0;
    while offset + ELF_NOTE_HEADER <= notes.len() {
        let name_size = read_u32(notes, offset)? as usize;
        let desc_size = read_u32(notes, offset + 4)? as usize;
        let note_type = read_u32(notes, offset + 8)?;
        let name_start = offset + ELF_NOTE_HEADER;
        let desc_start = name_start + align_up(name_size, align);
        let name = notes.get(name_start..name_start + name_size)?;
        let desc = notes.get(desc_start..desc_start + desc_size)?;
        if note_type == elf::NT_GNU_BUILD_ID && name.strip_suffix(b"\0").unwrap_or(name) == elf::ELF_NOTE_GNU {
            return Some(desc.to_vec());
        }
        offset = desc_start + align_up(desc_size, align);
    }
    None
}

fn read_macho_uuid(memory: &dyn MemoryService, base: Address) -> Option<[u8; 16]>
{
    let data = read_bytes(memory, base, MACHO_HEADER_SIZE)?;
    let data = data.as_slice();
    let header = macho::MachHeader64::<Endianness>::parse(data, 0).ok()?;
    let endian = header.endian().ok()?;
    header.uuid(endian, data, 0).ok()?
}

fn read_pe_identity(memory: &dyn MemoryService, base: Address) -> Option<ImageIdentity>
{
    let data = read_bytes(memory, base, HEADER_SIZE)?;
    let data = data.as_slice();
    match FileKind::parse(data).ok()? {
        FileKind::Pe32 => pe_identity::<pe::ImageNtHeaders32>(memory, base, data),
        FileKind::Pe64 => pe_identity::<pe::ImageNtHeaders64>(memory, base, data),
        _ => None,
    }
}

fn pe_identity<Pe: ImageNtHeaders>(memory: &dyn MemoryService, base: Address, data: &[u8]) -> Option<ImageIdentity>
{
    let dos = pe::ImageDosHeader::parse(data).ok()?;
    let mut offset = u64::from(dos.nt_headers_offset());
    let (nt_headers, directories) = Pe::parse(data, &mut offset).ok()?;
    let pdb = directories
        .get(pe::IMAGE_DIRECTORY_ENTRY_DEBUG)
        .and_then(|directory| read_codeview(memory, base, directory.virtual_address.get(LE), directory.size.get(LE)));
    Some(ImageIdentity::Pe {
        timestamp: nt_headers.file_header().time_date_stamp.get(LE),
        size_of_image: nt_headers.optional_header().size_of_image(),
        pdb,
    })
}

/// Find the `RSDS` CodeView record through the debug directory of a loaded image
fn read_codeview(memory: &dyn MemoryService, base: Address, rva: u32, size: u32) -> Option<PdbInfo>
{
    let count = (size as usize / DEBUG_DIRECTORY_SIZE).min(MAX_DEBUG_ENTRIES);
    if rva == 0 || count == 0 {
        return None;
    }
    let entries = read_bytes(memory, base + u64::from(rva), count * DEBUG_DIRECTORY_SIZE)?;
    entries.chunks_exact(DEBUG_DIRECTORY_SIZE).find_map(|entry| {
        if read_u32(entry, 12)? != pe::IMAGE_DEBUG_TYPE_CODEVIEW {
            return None;
        }
        let data_size = read_u32(entry, 16)? as usize;
        let data_rva = read_u32(entry, 20)?;
        let record = read_bytes(memory, base + u64::from(data_rva), data_size)?;
        parse_codeview(&record)
    })
}

fn parse_codeview(record: &[u8]) -> Option<PdbInfo>
{
    if record.get(..4)? != CODEVIEW_SIGNATURE {
        return None;
    }
    let mut guid = [0u8; 16];
    guid.copy_from_slice(record.get(4..20)?);
    let age = read_u32(record, 20)?;
    let name = record.get(24..)?;
    let end = name.iter().position(|&byte| byte == 0).unwrap_or(name.len());
    Some(PdbInfo {
        path: String::from_utf8_lossy(&name[..end]).into_owned(),
        guid,
        age,
    })
}

/// ECMA-335 metadata of a PE file
pub fn pe_metadata(data: &[u8]) -> Option<Vec<u8>>
{
    match FileKind::parse(data).ok()? {
        FileKind::Pe32 => metadata_of::<pe::ImageNtHeaders32>(data),
        FileKind::Pe64 => metadata_of::<pe::ImageNtHeaders64>(data),
        _ => None,
    }
}

fn metadata_of<Pe: ImageNtHeaders>(data: &[u8]) -> Option<Vec<u8>>
{
    let file = PeFile::<Pe>::parse(data).ok()?;
    let sections = file.section_table();
    let cor20 = file
        .data_directory(pe::IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR)?
        .data(data, &sections)
        .ok()?;
    // IMAGE_COR20_HEADER: cb, major, minor, then the MetaData directory
    let rva = read_u32(cor20, 8)?;
    let size = read_u32(cor20, 12)? as usize;
    let metadata = sections.pe_data_at(data, rva)?;
    metadata.get(..size).map(<[u8]>::to_vec)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::error::{HostError, Result};

    struct Image
    {
        base: Address,
        bytes: Vec<u8>,
    }

    impl MemoryService for Image
    {
        fn pointer_size(&self) -> usize
        {
            8
        }

        fn read_memory(&self, address: Address, buffer: &mut [u8]) -> Result<usize>
        {
            let offset = address.value().wrapping_sub(self.base.value()) as usize;
            let available = self.bytes.get(offset..).ok_or(HostError::ReadFailed {
                address,
                size: buffer.len(),
            })?;
            let count = available.len().min(buffer.len());
            buffer[..count].copy_from_slice(&available[..count]);
            Ok(count)
        }

        fn write_memory(&self, _address: Address, _data: &[u8]) -> Result<usize>
        {
            Err(HostError::NotSupported("read-only image".to_string()))
        }
    }

    fn put(bytes: &mut [u8], offset: usize, value: &[u8])
    {
        bytes[offset..offset + value.len()].copy_from_slice(value);
    }

    /// A shared object with one PT_LOAD and one PT_NOTE holding a GNU build id
    fn elf_image(build_id: &[u8]) -> Vec<u8>
    {
        let mut bytes = vec![0u8; HEADER_SIZE];
        put(&mut bytes, 0, &[0x7f, b'E', b'L', b'F', 2, 1, 1]);
        put(&mut bytes, 16, &3u16.to_le_bytes());
        put(&mut bytes, 18, &62u16.to_le_bytes());
        put(&mut bytes, 20, &1u32.to_le_bytes());
        put(&mut bytes, 32, &64u64.to_le_bytes());
        put(&mut bytes, 52, &64u16.to_le_bytes());
        put(&mut bytes, 54, &56u16.to_le_bytes());
        put(&mut bytes, 56, &2u16.to_le_bytes());
        put(&mut bytes, 58, &64u16.to_le_bytes());

        let load = 64;
        put(&mut bytes, load, &elf::PT_LOAD.to_le_bytes());
        put(&mut bytes, load + 40, &(HEADER_SIZE as u64).to_le_bytes());
        put(&mut bytes, load + 48, &0x1000u64.to_le_bytes());

        let note_size = ELF_NOTE_HEADER + 4 + build_id.len();
        let note = 64 + 56;
        put(&mut bytes, note, &elf::PT_NOTE.to_le_bytes());
        put(&mut bytes, note + 8, &0x200u64.to_le_bytes());
        put(&mut bytes, note + 16, &0x200u64.to_le_bytes());
        put(&mut bytes, note + 32, &(note_size as u64).to_le_bytes());
        put(&mut bytes, note + 40, &(note_size as u64).to_le_bytes());
        put(&mut bytes, note + 48, &4u64.to_le_bytes());

        put(&mut bytes, 0x200, &4u32.to_le_bytes());
        put(&mut bytes, 0x204, &(build_id.len() as u32).to_le_bytes());
        put(&mut bytes, 0x208, &elf::NT_GNU_BUILD_ID.to_le_bytes());
        put(&mut bytes, 0x20C, b"GNU\0");
        put(&mut bytes, 0x210, build_id);
        bytes
    }

    #[test]
    fn test_reads_elf_build_id_from_memory()
    {
        let build_id: Vec<u8> = (1..=20).collect();
        let image = Image {
            base: Address::new(0x7f12_3400_0000),
            bytes: elf_image(&build_id),
        };
        let identity = read_image_identity(&image, ImageFormat::Elf, image.base);
        assert_eq!(identity, Some(ImageIdentity::Elf { build_id }));
    }

    #[test]
    fn test_garbage_has_no_identity()
    {
        let image = Image {
            base: Address::new(0x1000),
            bytes: vec![0xCC; 256],
        };
        assert_eq!(read_image_identity(&image, ImageFormat::Elf, image.base), None);
        assert_eq!(read_image_identity(&image, ImageFormat::Pe, image.base), None);
        assert_eq!(read_image_identity(&image, ImageFormat::MachO, image.base), None);
    }

    #[test]
    fn test_note_walk_skips_other_notes()
    {
        let mut notes = Vec::new();
        notes.extend_from_slice(&4u32.to_le_bytes());
        notes.extend_from_slice(&16u32.to_le_bytes());
        notes.extend_from_slice(&1u32.to_le_bytes());
        notes.extend_from_slice(b"GNU\0");
        notes.extend_from_slice(&[0u8; 16]);
        notes.extend_from_slice(&4u32.to_le_bytes());
        notes.extend_from_slice(&8u32.to_le_bytes());
        notes.extend_from_slice(&elf::NT_GNU_BUILD_ID.to_le_bytes());
        notes.extend_from_slice(b"GNU\0");
        notes.extend_from_slice(&[0xAB; 8]);
        assert_eq!(find_gnu_build_id(&notes, 4), Some(vec![0xAB; 8]));
        assert_eq!(find_gnu_build_id(&notes[..20], 4), None);
    }

    #[test]
    fn test_parse_codeview()
    {
        let mut record = b"RSDS".to_vec();
        record.extend_from_slice(&[7u8; 16]);
        record.extend_from_slice(&3u32.to_le_bytes());
        record.extend_from_slice(b"coreclr.pdb\0");
        let info = parse_codeview(&record);
        assert_eq!(info.as_ref().map(|pdb| pdb.path.as_str()), Some("coreclr.pdb"));
        assert_eq!(info.map(|pdb| pdb.age), Some(3));
        assert_eq!(parse_codeview(b"NB10"), None);
    }
}
