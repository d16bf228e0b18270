//! The ELF reader: turns an in-memory image into an [`Elf`] object.
//!
//! Only the identification bytes, the dynamic section and `PT_INTERP` are
//! read; the endianness is carried as runtime state and every multi-byte
//! field goes through a byte-swapping accessor.

use log::debug;
use log::warn;

use crate::ByteOrder;
use crate::Class;
use crate::Elf;
use crate::Error;
use crate::OsAbi;

const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const EV_CURRENT: u8 = 1;

const SHT_STRTAB: u32 = 3;
const SHT_DYNAMIC: u32 = 6;
const PT_INTERP: u32 = 3;

const DT_NEEDED: u64 = 1;
const DT_STRTAB: u64 = 5;
const DT_STRSZ: u64 = 10;
const DT_RPATH: u64 = 15;
const DT_RUNPATH: u64 = 29;

/// An ELF image with its decoding parameters.
struct Image<'a> {
    data: &'a [u8],
    class: Class,
    byte_order: ByteOrder,
}

impl<'a> Image<'a> {
    fn bytes(&self, offset: u64, len: u64, what: &'static str) -> Result<&'a [u8], Error> {
        let end = offset
            .checked_add(len)
            .ok_or(Error::UnexpectedEof(offset, what))?;
        if end > self.data.len() as u64 {
            return Err(Error::UnexpectedEof(offset, what));
        }
        Ok(&self.data[offset as usize..end as usize])
    }

    fn u16_at(&self, offset: u64, what: &'static str) -> Result<u16, Error> {
        let b = self.bytes(offset, 2, what)?;
        let b = [b[0], b[1]];
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u16::from_le_bytes(b),
            ByteOrder::BigEndian => u16::from_be_bytes(b),
        })
    }

    fn u32_at(&self, offset: u64, what: &'static str) -> Result<u32, Error> {
        let b = self.bytes(offset, 4, what)?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u32::from_le_bytes(b),
            ByteOrder::BigEndian => u32::from_be_bytes(b),
        })
    }

    fn u64_at(&self, offset: u64, what: &'static str) -> Result<u64, Error> {
        let b = self.bytes(offset, 8, what)?;
        let b = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        Ok(match self.byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(b),
            ByteOrder::BigEndian => u64::from_be_bytes(b),
        })
    }

    /// Read `u32` for 32-bit images, `u64` for 64-bit ones.
    fn word_at(&self, offset: u64, what: &'static str) -> Result<u64, Error> {
        match self.class {
            Class::Elf32 => self.u32_at(offset, what).map(Into::into),
            Class::Elf64 => self.u64_at(offset, what),
        }
    }
}

struct Section {
    kind: u32,
    addr: u64,
    offset: u64,
    size: u64,
    entsize: u64,
}

fn read_sections(image: &Image<'_>) -> Result<Vec<Section>, Error> {
    let (shoff, shnum) = match image.class {
        Class::Elf32 => (
            image.u32_at(0x20, "section header offset")? as u64,
            image.u16_at(0x30, "section count")?,
        ),
        Class::Elf64 => (
            image.u64_at(0x28, "section header offset")?,
            image.u16_at(0x3c, "section count")?,
        ),
    };
    let entry_len = image.class.section_len();
    // One bounds check for the whole array.
    image.bytes(shoff, entry_len * shnum as u64, "section header array")?;
    let mut sections = Vec::with_capacity(shnum as usize);
    for i in 0..shnum as u64 {
        let at = shoff + i * entry_len;
        let (addr_at, offset_at, size_at, entsize_at) = match image.class {
            Class::Elf32 => (0x0c, 0x10, 0x14, 0x24),
            Class::Elf64 => (0x10, 0x18, 0x20, 0x38),
        };
        sections.push(Section {
            kind: image.u32_at(at + 4, "section header")?,
            addr: image.word_at(at + addr_at, "section header")?,
            offset: image.word_at(at + offset_at, "section header")?,
            size: image.word_at(at + size_at, "section header")?,
            entsize: image.word_at(at + entsize_at, "section header")?,
        });
    }
    Ok(sections)
}

fn read_interpreter(image: &Image<'_>) -> Result<Option<String>, Error> {
    let (phoff, phnum) = match image.class {
        Class::Elf32 => (
            image.u32_at(0x1c, "program header offset")? as u64,
            image.u16_at(0x2c, "segment count")?,
        ),
        Class::Elf64 => (
            image.u64_at(0x20, "program header offset")?,
            image.u16_at(0x38, "segment count")?,
        ),
    };
    let entry_len = image.class.segment_len();
    image.bytes(phoff, entry_len * phnum as u64, "program header array")?;
    for i in 0..phnum as u64 {
        let at = phoff + i * entry_len;
        if image.u32_at(at, "program header")? != PT_INTERP {
            continue;
        }
        let (offset_at, filesz_at) = match image.class {
            Class::Elf32 => (0x04, 0x10),
            Class::Elf64 => (0x08, 0x20),
        };
        let offset = image.word_at(at + offset_at, "program header")?;
        let filesz = image.word_at(at + filesz_at, "program header")?;
        let raw = image.bytes(offset, filesz, "interpreter")?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        return Ok(Some(String::from_utf8_lossy(&raw[..end]).into_owned()));
    }
    Ok(None)
}

impl Elf {
    /// Parse an in-memory ELF image.
    ///
    /// `name` is used in log messages only. Returns `Ok(None)` when the image
    /// is not an ELF file or has no dynamic section (nothing to track), an
    /// error for every malformed case: truncation, a bad entry size, missing
    /// `DT_STRTAB`/`DT_STRSZ`, out-of-range or unterminated strings.
    ///
    /// The returned object has empty `dirname`/`basename`; the caller knows
    /// where the file was going to be installed.
    pub fn load(data: &[u8], name: &str) -> Result<Option<Elf>, Error> {
        if data.len() < MAGIC.len() || data[..MAGIC.len()] != MAGIC {
            debug!("{name}: not an ELF file");
            return Ok(None);
        }
        if data.len() < 16 {
            return Err(Error::UnexpectedEof(0, "ELF identification"));
        }
        let ei_version = data[6];
        if ei_version != EV_CURRENT {
            return Err(Error::InvalidElfVersion(ei_version));
        }
        let class = Class::try_from(data[4])?;
        let byte_order = ByteOrder::try_from(data[5])?;
        let os_abi = OsAbi::from(data[7]);
        if !os_abi.is_well_known() {
            warn!("{name}: osabi not recognized: {}", os_abi.as_u8());
        }

        let image = Image {
            data,
            class,
            byte_order,
        };
        let sections = read_sections(&image)?;

        let Some(dynamic) = sections.iter().find(|s| s.kind == SHT_DYNAMIC) else {
            debug!("{name}: not a dynamic executable, no dynamic section found");
            return Ok(None);
        };
        if dynamic.entsize != class.dynamic_len() {
            return Err(Error::InvalidDynamicEntrySize(dynamic.entsize));
        }
        image.bytes(dynamic.offset, dynamic.size, "dynamic entries")?;
        let count = dynamic.size / class.dynamic_len();
        let word = class.word_len();

        let mut strtab_addr = None;
        let mut strsz = None;
        for i in 0..count {
            let at = dynamic.offset + i * class.dynamic_len();
            let tag = image.word_at(at, "dynamic entry")?;
            let value = image.word_at(at + word, "dynamic entry")?;
            match tag {
                DT_STRTAB => strtab_addr = Some(value),
                DT_STRSZ => strsz = Some(value),
                _ => {}
            }
        }
        let strtab_addr = strtab_addr.ok_or(Error::MissingStringTable)?;
        let strsz = strsz.ok_or(Error::MissingStringTableSize)?;

        // DT_STRTAB holds a virtual address; find the string table section
        // mapped there to learn its file offset.
        let strtab = sections
            .iter()
            .find(|s| s.kind == SHT_STRTAB && s.addr == strtab_addr)
            .ok_or(Error::NoMatchingStringTable(strtab_addr))?;
        let strings = image.bytes(strtab.offset, strsz, "string table")?;

        let get_string = |offset: u64| -> Result<String, Error> {
            if offset >= strsz {
                return Err(Error::StringOutOfRange(offset));
            }
            let tail = &strings[offset as usize..];
            let end = tail
                .iter()
                .position(|&b| b == 0)
                .ok_or(Error::UnterminatedString(offset))?;
            Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
        };

        let mut elf = Elf {
            class,
            byte_order,
            os_abi,
            ..Default::default()
        };
        for i in 0..count {
            let at = dynamic.offset + i * class.dynamic_len();
            let tag = image.word_at(at, "dynamic entry")?;
            let value = image.word_at(at + word, "dynamic entry")?;
            match tag {
                DT_NEEDED => elf.needed.push(get_string(value)?),
                DT_RPATH => elf.rpath = Some(get_string(value)?),
                DT_RUNPATH => elf.runpath = Some(get_string(value)?),
                _ => {}
            }
        }
        elf.interpreter = read_interpreter(&image)?;
        Ok(Some(elf))
    }
}
