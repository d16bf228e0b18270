use crate::define_infallible_enum;
use crate::Error;

/// Bitness of an ELF object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[repr(u8)]
pub enum Class {
    Elf32 = 1,
    Elf64 = 2,
}

impl Class {
    /// The size of one machine word in the file.
    pub const fn word_len(self) -> u64 {
        match self {
            Self::Elf32 => 4,
            Self::Elf64 => 8,
        }
    }

    /// The size of one section header entry.
    pub(crate) const fn section_len(self) -> u64 {
        match self {
            Self::Elf32 => 40,
            Self::Elf64 => 64,
        }
    }

    /// The size of one program header entry.
    pub(crate) const fn segment_len(self) -> u64 {
        match self {
            Self::Elf32 => 32,
            Self::Elf64 => 56,
        }
    }

    /// The size of one dynamic section entry, a tag word plus a value word.
    pub(crate) const fn dynamic_len(self) -> u64 {
        2 * self.word_len()
    }

    /// Short name as shown by queries, e.g. `elf64`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Elf32 => "elf32",
            Self::Elf64 => "elf64",
        }
    }
}

impl TryFrom<u8> for Class {
    type Error = Error;
    fn try_from(other: u8) -> Result<Self, Self::Error> {
        match other {
            1 => Ok(Self::Elf32),
            2 => Ok(Self::Elf64),
            n => Err(Error::InvalidClass(n)),
        }
    }
}

/// Data format of an ELF object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[repr(u8)]
pub enum ByteOrder {
    LittleEndian = 1,
    BigEndian = 2,
}

impl ByteOrder {
    /// Short name as shown by queries, e.g. `le`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LittleEndian => "le",
            Self::BigEndian => "be",
        }
    }
}

impl TryFrom<u8> for ByteOrder {
    type Error = Error;
    fn try_from(other: u8) -> Result<Self, Self::Error> {
        match other {
            1 => Ok(Self::LittleEndian),
            2 => Ok(Self::BigEndian),
            n => Err(Error::InvalidByteOrder(n)),
        }
    }
}

define_infallible_enum! {
    "Operating system ABI of an ELF object.",
    OsAbi, u8,
    (Sysv, 0, "UNIX System V, also used by Linux binaries without an ABI note."),
    (Hpux, 1, "HP-UX."),
    (Netbsd, 2, "NetBSD."),
    (Gnu, 3, "Linux/GNU."),
    (Solaris, 6, "Solaris."),
    (Freebsd, 9, "FreeBSD."),
    (Openbsd, 12, "OpenBSD."),
}

impl OsAbi {
    /// Cast to `u8`.
    pub const fn as_u8(self) -> u8 {
        self.as_number()
    }

    /// Whether this ABI is one the loader accepts without a warning.
    pub(crate) const fn is_well_known(self) -> bool {
        matches!(self, Self::Sysv | Self::Gnu | Self::Freebsd)
    }

    /// Compatibility of two ABI bytes for linking.
    ///
    /// Strict mode requires equality. Otherwise `Sysv` and `Gnu` count as one
    /// ABI: binaries without an ABI note and GNU binaries link freely.
    pub const fn links_with(self, other: OsAbi, strict: bool) -> bool {
        if self.as_u8() == other.as_u8() {
            return true;
        }
        if strict {
            return false;
        }
        matches!(self, Self::Sysv | Self::Gnu) && matches!(other, Self::Sysv | Self::Gnu)
    }

    /// Short name as shown by queries, e.g. `linux`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sysv => "none",
            Self::Hpux => "hpux",
            Self::Netbsd => "netbsd",
            Self::Gnu => "linux",
            Self::Solaris => "solaris",
            Self::Freebsd => "freebsd",
            Self::Openbsd => "openbsd",
            Self::Other(_) => "unknown",
        }
    }
}
