use std::collections::BTreeSet;

use crate::expand_origin;
use crate::ByteOrder;
use crate::Class;
use crate::ObjId;
use crate::OsAbi;

/// One parsed ELF object.
///
/// Identity is the tuple `(dirname, basename, class, byte_order, os_abi)`.
/// The identity fields and the dynamic-section payload are set by the loader
/// and treated as frozen once the object is installed into a database; the
/// two `req_*` index fields belong to the linker and are rebuilt on every
/// install, remove and relink.
#[derive(Clone, Debug)]
pub struct Elf {
    /// Directory the object was installed to, e.g. `/usr/lib`.
    pub dirname: String,
    /// File name of the object, e.g. `libc.so.6`.
    pub basename: String,
    /// Bitness.
    pub class: Class,
    /// Data format.
    pub byte_order: ByteOrder,
    /// Operating system ABI.
    pub os_abi: OsAbi,
    /// `DT_RPATH`, if the entry was present (even when empty).
    pub rpath: Option<String>,
    /// `DT_RUNPATH`, if the entry was present (even when empty).
    pub runpath: Option<String>,
    /// Interpreter from `PT_INTERP`, if any.
    pub interpreter: Option<String>,
    /// `DT_NEEDED` entries in file order; duplicates are preserved.
    pub needed: Vec<String>,
    /// Name of the owning package. A weak back-reference, refreshed on
    /// install and never consulted for liveness.
    pub owner: Option<String>,
    /// Objects satisfying some entry of `needed`.
    pub req_found: BTreeSet<ObjId>,
    /// Entries of `needed` with no satisfier.
    pub req_missing: BTreeSet<String>,
}

impl Default for Elf {
    fn default() -> Self {
        Self {
            dirname: String::new(),
            basename: String::new(),
            class: Class::Elf64,
            byte_order: ByteOrder::LittleEndian,
            os_abi: OsAbi::Sysv,
            rpath: None,
            runpath: None,
            interpreter: None,
            needed: Vec::new(),
            owner: None,
            req_found: BTreeSet::new(),
            req_missing: BTreeSet::new(),
        }
    }
}

impl Elf {
    /// The full installed path, `dirname/basename`.
    pub fn path(&self) -> String {
        if self.dirname.is_empty() {
            self.basename.clone()
        } else if self.dirname.ends_with('/') {
            format!("{}{}", self.dirname, self.basename)
        } else {
            format!("{}/{}", self.dirname, self.basename)
        }
    }

    /// Whether `other` can satisfy a `DT_NEEDED` entry of `self`.
    ///
    /// The class must match exactly; the OS ABI must match exactly under
    /// strict linking and up to the `{none, linux}` equivalence otherwise.
    /// The name and the search path are checked by the linker, not here.
    pub fn can_use(&self, other: &Elf, strict: bool) -> bool {
        self.class == other.class && self.os_abi.links_with(other.os_abi, strict)
    }

    /// Expand `$ORIGIN` in rpath and runpath against the object's dirname
    /// and collapse double slashes.
    pub fn solve_paths(&mut self) {
        if let Some(rpath) = self.rpath.take() {
            self.rpath = Some(expand_origin(&rpath, &self.dirname));
        }
        if let Some(runpath) = self.runpath.take() {
            self.runpath = Some(expand_origin(&runpath, &self.dirname));
        }
    }

    /// Whether the object still has unsatisfied `DT_NEEDED` entries.
    pub fn is_broken(&self) -> bool {
        !self.req_missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_ident(class: Class, os_abi: OsAbi) -> Elf {
        Elf {
            class,
            os_abi,
            ..Default::default()
        }
    }

    #[test]
    fn can_use_requires_matching_class() {
        let subject = with_ident(Class::Elf64, OsAbi::Gnu);
        let other = with_ident(Class::Elf32, OsAbi::Gnu);
        assert!(!subject.can_use(&other, true));
        assert!(!subject.can_use(&other, false));
    }

    #[test]
    fn can_use_osabi_table() {
        let gnu = with_ident(Class::Elf64, OsAbi::Gnu);
        let sysv = with_ident(Class::Elf64, OsAbi::Sysv);
        let bsd = with_ident(Class::Elf64, OsAbi::Freebsd);
        assert!(gnu.can_use(&gnu, true));
        assert!(!gnu.can_use(&sysv, true));
        assert!(!gnu.can_use(&bsd, true));
        assert!(gnu.can_use(&sysv, false));
        assert!(sysv.can_use(&gnu, false));
        assert!(!gnu.can_use(&bsd, false));
        assert!(bsd.can_use(&bsd, true));
    }

    #[test]
    fn solve_paths_expands_origin() {
        let mut elf = Elf {
            dirname: "/pkg/bin".to_owned(),
            rpath: Some("$ORIGIN/../lib".to_owned()),
            runpath: Some("/usr//lib".to_owned()),
            ..Default::default()
        };
        elf.solve_paths();
        assert_eq!(Some("/pkg/bin/../lib"), elf.rpath.as_deref());
        assert_eq!(Some("/usr/lib"), elf.runpath.as_deref());
    }

    #[test]
    fn path_joins_dirname_and_basename() {
        let mut elf = Elf::default();
        elf.dirname = "/usr/lib".to_owned();
        elf.basename = "libm.so".to_owned();
        assert_eq!("/usr/lib/libm.so", elf.path());
        elf.dirname = "/".to_owned();
        assert_eq!("/libm.so", elf.path());
    }
}
