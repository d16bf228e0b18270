//! The versioned binary on-disk format.
//!
//! A fixed 32-byte header (magic, version, flag bits) is followed by the
//! database body. Every integer is little-endian; strings carry a `u32`
//! length and no terminator; sequences carry a `u32` count. Objects and
//! packages are written once as tagged records and referenced afterwards:
//! since version 8 a reference is the ordinal of the record in write order,
//! before that it was the stream offset of the record body. A `.gz` file
//! name suffix selects a gzip container. The file is protected by a POSIX
//! advisory lock, shared for reading and exclusive for writing.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use bitflags::bitflags;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;

use crate::ByteOrder;
use crate::Class;
use crate::Db;
use crate::Dependency;
use crate::Elf;
use crate::Error;
use crate::ObjId;
use crate::OsAbi;
use crate::Package;

/// Magic bytes opening every database file.
pub const DB_MAGIC: [u8; 16] = *b"ArchBSD\0deps~DB~";

/// Newest format version this build reads and writes.
pub const DB_VERSION: u16 = 12;

/// The writer never emits formats older than this: version 8 introduced
/// ordinal references and version 9 the interpreter field, and both are
/// always in use.
const MIN_VERSION_ON_WRITE: u16 = 9;

/// Refusal threshold for length fields of corrupt files.
const MAX_STRING_LEN: u32 = 1 << 30;

const TAG_PKG: u8 = 0;
const TAG_PKGREF: u8 = 1;
const TAG_OBJ: u8 = 2;
const TAG_OBJREF: u8 = 3;

bitflags! {
    /// Header flag bits recording which optional parts are present.
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
    pub struct DbFlags: u16 {
        /// Ignore-file rules follow the edge tables.
        const IGNORE_RULES = 1 << 0;
        /// Per-package library paths are present.
        const PACKAGE_LD_PATH = 1 << 1;
        /// Base package names are present.
        const BASE_PACKAGES = 1 << 2;
        /// Strict linking was enabled.
        const STRICT_LINKING = 1 << 3;
        /// Assume-found rules are present.
        const ASSUME_FOUND = 1 << 4;
        /// Packages carry filelists.
        const FILE_LISTS = 1 << 5;
    }
}

fn compute_flags(db: &Db) -> DbFlags {
    let mut flags = DbFlags::empty();
    if !db.ignore_file_rules.is_empty() {
        flags |= DbFlags::IGNORE_RULES;
    }
    if !db.package_library_path.is_empty() {
        flags |= DbFlags::PACKAGE_LD_PATH;
    }
    if !db.base_packages.is_empty() {
        flags |= DbFlags::BASE_PACKAGES;
    }
    if db.strict_linking {
        flags |= DbFlags::STRICT_LINKING;
    }
    if !db.assume_found_rules.is_empty() {
        flags |= DbFlags::ASSUME_FOUND;
    }
    if db.packages.iter().any(|pkg| !pkg.filelist.is_empty()) {
        flags |= DbFlags::FILE_LISTS;
    }
    flags
}

/// The smallest version able to express everything present in `db`.
fn compute_version(db: &Db, flags: DbFlags) -> u16 {
    let version = if db.packages.iter().any(|pkg| !pkg.checkdepends.is_empty()) {
        12
    } else if db.packages.iter().any(Package::has_depends) {
        10
    } else if flags.contains(DbFlags::FILE_LISTS) {
        7
    } else if flags.contains(DbFlags::ASSUME_FOUND) {
        6
    } else if db.packages.iter().any(|pkg| !pkg.groups.is_empty()) {
        5
    } else if !flags.is_empty() {
        2
    } else {
        1
    };
    version.max(MIN_VERSION_ON_WRITE)
}

struct Writer<'db, W: Write> {
    out: W,
    db: &'db Db,
    version: u16,
    flags: DbFlags,
    obj_refs: HashMap<ObjId, u64>,
    pkg_refs: HashMap<usize, u64>,
}

impl<'db, W: Write> Writer<'db, W> {
    fn new(out: W, db: &'db Db) -> Self {
        let flags = compute_flags(db);
        Self {
            out,
            db,
            version: compute_version(db, flags),
            flags,
            obj_refs: HashMap::new(),
            pkg_refs: HashMap::new(),
        }
    }

    fn u8(&mut self, value: u8) -> Result<(), Error> {
        Ok(self.out.write_all(&[value])?)
    }

    fn u16(&mut self, value: u16) -> Result<(), Error> {
        Ok(self.out.write_all(&value.to_le_bytes())?)
    }

    fn u32(&mut self, value: u32) -> Result<(), Error> {
        Ok(self.out.write_all(&value.to_le_bytes())?)
    }

    fn u64(&mut self, value: u64) -> Result<(), Error> {
        Ok(self.out.write_all(&value.to_le_bytes())?)
    }

    fn string(&mut self, value: &str) -> Result<(), Error> {
        self.u32(value.len() as u32)?;
        Ok(self.out.write_all(value.as_bytes())?)
    }

    fn string_list(&mut self, list: &[String]) -> Result<(), Error> {
        self.u32(list.len() as u32)?;
        for s in list {
            self.string(s)?;
        }
        Ok(())
    }

    fn string_set(&mut self, set: &BTreeSet<String>) -> Result<(), Error> {
        self.u32(set.len() as u32)?;
        for s in set {
            self.string(s)?;
        }
        Ok(())
    }

    /// Split dependency list of version 10 and newer.
    fn dep_list(&mut self, list: &[Dependency]) -> Result<(), Error> {
        self.u32(list.len() as u32)?;
        for dep in list {
            self.string(&dep.name)?;
            self.string(&dep.constraint)?;
        }
        Ok(())
    }

    /// Glued dependency list of versions 3 through 9.
    fn old_dep_list(&mut self, list: &[Dependency]) -> Result<(), Error> {
        self.u32(list.len() as u32)?;
        for dep in list {
            self.string(&dep.to_string())?;
        }
        Ok(())
    }

    fn object(&mut self, id: ObjId) -> Result<(), Error> {
        if let Some(&ordinal) = self.obj_refs.get(&id) {
            self.u8(TAG_OBJREF)?;
            return self.u64(ordinal);
        }
        let ordinal = self.obj_refs.len() as u64;
        self.obj_refs.insert(id, ordinal);
        self.u8(TAG_OBJ)?;
        let db = self.db;
        let elf = db
            .pool
            .get(id)
            .ok_or(Error::Corrupt("dangling object handle"))?;
        self.string(&elf.dirname)?;
        self.string(&elf.basename)?;
        self.u8(elf.class as u8)?;
        self.u8(elf.byte_order as u8)?;
        self.u8(elf.os_abi.as_u8())?;
        self.u8(elf.rpath.is_some() as u8)?;
        self.u8(elf.runpath.is_some() as u8)?;
        self.string(elf.rpath.as_deref().unwrap_or(""))?;
        self.string(elf.runpath.as_deref().unwrap_or(""))?;
        if self.version >= 9 {
            self.u8(elf.interpreter.is_some() as u8)?;
            self.string(elf.interpreter.as_deref().unwrap_or(""))?;
        }
        self.string_list(&elf.needed)
    }

    fn package(&mut self, index: usize) -> Result<(), Error> {
        if let Some(&ordinal) = self.pkg_refs.get(&index) {
            self.u8(TAG_PKGREF)?;
            return self.u64(ordinal);
        }
        let ordinal = self.pkg_refs.len() as u64;
        self.pkg_refs.insert(index, ordinal);
        self.u8(TAG_PKG)?;
        let db = self.db;
        let pkg = &db.packages[index];
        self.string(&pkg.name)?;
        self.string(&pkg.version)?;
        self.u32(pkg.objects.len() as u32)?;
        for &id in &pkg.objects {
            self.object(id)?;
        }
        if self.version >= 10 {
            self.dep_list(&pkg.depends)?;
            self.dep_list(&pkg.makedepends)?;
            if self.version >= 12 {
                self.dep_list(&pkg.checkdepends)?;
            }
            self.dep_list(&pkg.optdepends)?;
            self.dep_list(&pkg.provides)?;
            self.dep_list(&pkg.conflicts)?;
            self.dep_list(&pkg.replaces)?;
        } else if self.version >= 3 {
            self.old_dep_list(&pkg.depends)?;
            self.old_dep_list(&pkg.optdepends)?;
            if self.version >= 4 {
                self.old_dep_list(&pkg.provides)?;
                self.old_dep_list(&pkg.conflicts)?;
                self.old_dep_list(&pkg.replaces)?;
            }
        }
        if self.version >= 5 {
            self.string_set(&pkg.groups)?;
        }
        if self.flags.contains(DbFlags::FILE_LISTS) {
            self.string_list(&pkg.filelist)?;
        }
        Ok(())
    }

    fn db(&mut self) -> Result<(), Error> {
        let db = self.db;
        self.out.write_all(&DB_MAGIC)?;
        self.u16(self.version)?;
        self.u16(self.flags.bits())?;
        self.out.write_all(&[0_u8; 22])?;

        self.string(&db.name)?;
        self.string_list(&db.library_path)?;

        self.u32(db.packages.len() as u32)?;
        for index in 0..db.packages.len() {
            self.package(index)?;
        }

        self.u32(db.objects.len() as u32)?;
        for &id in &db.objects {
            self.object(id)?;
        }

        let edge_objects = |want_found: bool| -> Vec<ObjId> {
            db.objects
                .iter()
                .copied()
                .filter(|&id| {
                    db.pool.get(id).is_some_and(|elf| {
                        if want_found {
                            !elf.req_found.is_empty()
                        } else {
                            !elf.req_missing.is_empty()
                        }
                    })
                })
                .collect()
        };

        let with_found = edge_objects(true);
        self.u32(with_found.len() as u32)?;
        for id in with_found {
            self.object(id)?;
            let Some(elf) = db.pool.get(id) else { continue };
            self.u32(elf.req_found.len() as u32)?;
            for &fid in &elf.req_found {
                self.object(fid)?;
            }
        }

        let with_missing = edge_objects(false);
        self.u32(with_missing.len() as u32)?;
        for id in with_missing {
            self.object(id)?;
            let Some(elf) = db.pool.get(id) else { continue };
            self.string_set(&elf.req_missing)?;
        }

        if self.flags.contains(DbFlags::IGNORE_RULES) {
            self.string_set(&db.ignore_file_rules)?;
        }
        if self.flags.contains(DbFlags::ASSUME_FOUND) {
            self.string_set(&db.assume_found_rules)?;
        }
        if self.flags.contains(DbFlags::PACKAGE_LD_PATH) {
            self.u32(db.package_library_path.len() as u32)?;
            for (pkg, paths) in &db.package_library_path {
                self.string(pkg)?;
                self.string_list(paths)?;
            }
        }
        if self.flags.contains(DbFlags::BASE_PACKAGES) {
            self.string_set(&db.base_packages)?;
        }
        Ok(())
    }
}

struct Reader<R: Read> {
    inner: R,
    pos: u64,
    version: u16,
    flags: DbFlags,
    obj_table: Vec<ObjId>,
    pkg_table: Vec<usize>,
    old_obj_table: HashMap<u64, ObjId>,
    old_pkg_table: HashMap<u64, usize>,
}

impl<R: Read> Reader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            version: 0,
            flags: DbFlags::empty(),
            obj_table: Vec::new(),
            pkg_table: Vec::new(),
            old_obj_table: HashMap::new(),
            old_pkg_table: HashMap::new(),
        }
    }

    fn bytes(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, Error> {
        let mut buf = [0_u8; 1];
        self.bytes(&mut buf)?;
        Ok(buf[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let mut buf = [0_u8; 2];
        self.bytes(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let mut buf = [0_u8; 4];
        self.bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let mut buf = [0_u8; 8];
        self.bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self) -> Result<String, Error> {
        let len = self.u32()?;
        if len > MAX_STRING_LEN {
            return Err(Error::Corrupt("unreasonable string length"));
        }
        let mut buf = vec![0_u8; len as usize];
        self.bytes(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn string_list(&mut self) -> Result<Vec<String>, Error> {
        let len = self.u32()?;
        let mut list = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            list.push(self.string()?);
        }
        Ok(list)
    }

    fn string_set(&mut self) -> Result<BTreeSet<String>, Error> {
        Ok(self.string_list()?.into_iter().collect())
    }

    fn dep_list(&mut self) -> Result<Vec<Dependency>, Error> {
        let len = self.u32()?;
        let mut list = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            let name = self.string()?;
            let constraint = self.string()?;
            list.push(Dependency::new(name, constraint));
        }
        Ok(list)
    }

    fn old_dep_list(&mut self) -> Result<Vec<Dependency>, Error> {
        let len = self.u32()?;
        let mut list = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            list.push(Dependency::parse(&self.string()?));
        }
        Ok(list)
    }

    fn object(&mut self, db: &mut Db) -> Result<ObjId, Error> {
        match self.u8()? {
            TAG_OBJREF => {
                let r = self.u64()?;
                if self.version >= 8 {
                    self.obj_table
                        .get(r as usize)
                        .copied()
                        .ok_or(Error::DanglingObjectRef(r))
                } else {
                    self.old_obj_table
                        .get(&r)
                        .copied()
                        .ok_or(Error::DanglingObjectRef(r))
                }
            }
            TAG_OBJ => {
                // References of old databases are the stream offset of the
                // record body, i.e. the position right after the tag.
                let key = self.pos;
                let id = db.pool.insert(Elf::default());
                if self.version >= 8 {
                    self.obj_table.push(id);
                } else {
                    self.old_obj_table.insert(key, id);
                }

                let dirname = self.string()?;
                let basename = self.string()?;
                let class = Class::try_from(self.u8()?)?;
                let byte_order = ByteOrder::try_from(self.u8()?)?;
                let os_abi = OsAbi::from(self.u8()?);
                let rpath_set = self.u8()? != 0;
                let runpath_set = self.u8()? != 0;
                let rpath = self.string()?;
                let runpath = self.string()?;
                let interpreter = if self.version >= 9 {
                    let interpreter_set = self.u8()? != 0;
                    let interpreter = self.string()?;
                    interpreter_set.then_some(interpreter)
                } else {
                    None
                };
                let needed = self.string_list()?;

                if let Some(slot) = db.pool.get_mut(id) {
                    *slot = Elf {
                        dirname,
                        basename,
                        class,
                        byte_order,
                        os_abi,
                        rpath: rpath_set.then_some(rpath),
                        runpath: runpath_set.then_some(runpath),
                        interpreter,
                        needed,
                        ..Default::default()
                    };
                }
                Ok(id)
            }
            tag => Err(Error::InvalidRefTag(tag)),
        }
    }

    fn package(&mut self, db: &mut Db) -> Result<usize, Error> {
        match self.u8()? {
            TAG_PKGREF => {
                let r = self.u64()?;
                if self.version >= 8 {
                    self.pkg_table
                        .get(r as usize)
                        .copied()
                        .ok_or(Error::DanglingPackageRef(r))
                } else {
                    self.old_pkg_table
                        .get(&r)
                        .copied()
                        .ok_or(Error::DanglingPackageRef(r))
                }
            }
            TAG_PKG => {
                let key = self.pos;
                let index = db.packages.len();
                db.packages.push(Package::default());
                if self.version >= 8 {
                    self.pkg_table.push(index);
                } else {
                    self.old_pkg_table.insert(key, index);
                }

                let name = self.string()?;
                let version = self.string()?;
                let mut pkg = Package::new(name, version);
                let count = self.u32()?;
                for _ in 0..count {
                    pkg.objects.push(self.object(db)?);
                }
                for &id in &pkg.objects {
                    if let Some(elf) = db.pool.get_mut(id) {
                        elf.owner = Some(pkg.name.clone());
                    }
                }
                if self.version >= 10 {
                    pkg.depends = self.dep_list()?;
                    pkg.makedepends = self.dep_list()?;
                    if self.version >= 12 {
                        pkg.checkdepends = self.dep_list()?;
                    }
                    pkg.optdepends = self.dep_list()?;
                    pkg.provides = self.dep_list()?;
                    pkg.conflicts = self.dep_list()?;
                    pkg.replaces = self.dep_list()?;
                } else if self.version >= 3 {
                    pkg.depends = self.old_dep_list()?;
                    pkg.optdepends = self.old_dep_list()?;
                    if self.version >= 4 {
                        pkg.provides = self.old_dep_list()?;
                        pkg.conflicts = self.old_dep_list()?;
                        pkg.replaces = self.old_dep_list()?;
                    }
                }
                if self.version >= 5 {
                    pkg.groups = self.string_set()?;
                }
                if self.flags.contains(DbFlags::FILE_LISTS) {
                    pkg.filelist = self.string_list()?;
                }
                db.packages[index] = pkg;
                Ok(index)
            }
            tag => Err(Error::InvalidRefTag(tag)),
        }
    }

    fn db(&mut self, db: &mut Db) -> Result<(), Error> {
        let mut magic = [0_u8; 16];
        self.bytes(&mut magic)?;
        if magic != DB_MAGIC {
            return Err(Error::BadMagic);
        }
        let version = self.u16()?;
        if version > DB_VERSION {
            return Err(Error::UnsupportedVersion(version, DB_VERSION));
        }
        self.version = version;
        db.loaded_version = version;
        // Unknown flag bits are ignored; the writer recomputes them.
        self.flags = DbFlags::from_bits_truncate(self.u16()?);
        self.bytes(&mut [0_u8; 22])?;

        db.strict_linking = self.flags.contains(DbFlags::STRICT_LINKING);
        db.name = self.string()?;
        db.library_path = self.string_list()?;

        let pkgcount = self.u32()?;
        for _ in 0..pkgcount {
            self.package(db)?;
        }

        let objcount = self.u32()?;
        for _ in 0..objcount {
            let id = self.object(db)?;
            db.objects.push(id);
        }

        let found_count = self.u32()?;
        for _ in 0..found_count {
            let id = self.object(db)?;
            let len = self.u32()?;
            let mut found = BTreeSet::new();
            for _ in 0..len {
                found.insert(self.object(db)?);
            }
            if let Some(elf) = db.pool.get_mut(id) {
                elf.req_found = found;
            }
        }

        let missing_count = self.u32()?;
        for _ in 0..missing_count {
            let id = self.object(db)?;
            let missing = self.string_set()?;
            if let Some(elf) = db.pool.get_mut(id) {
                elf.req_missing = missing;
            }
        }

        if self.version < 2 {
            return Ok(());
        }
        if self.flags.contains(DbFlags::IGNORE_RULES) {
            db.ignore_file_rules = self.string_set()?;
        }
        if self.flags.contains(DbFlags::ASSUME_FOUND) {
            db.assume_found_rules = self.string_set()?;
        }
        if self.flags.contains(DbFlags::PACKAGE_LD_PATH) {
            let count = self.u32()?;
            for _ in 0..count {
                let pkg = self.string()?;
                let paths = self.string_list()?;
                db.package_library_path.insert(pkg, paths);
            }
        }
        if self.flags.contains(DbFlags::BASE_PACKAGES) {
            db.base_packages = self.string_set()?;
        }
        Ok(())
    }
}

fn has_gz_suffix(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn flock(file: &File, operation: libc::c_int) -> Result<(), Error> {
    // SAFETY: flock on a descriptor that stays open for the duration of
    // the call; no memory is involved.
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

impl Db {
    /// Write the database to `path`, gzipped when the name ends in `.gz`.
    ///
    /// Takes an exclusive advisory lock for the duration of the write. The
    /// writer always emits the smallest format version that can represent
    /// the data, so a freshly written file is readable by any build knowing
    /// that version.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let file = File::create(path)?;
        flock(&file, libc::LOCK_EX)?;
        if has_gz_suffix(path) {
            debug!("writing compressed database {}", path.display());
            let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());
            Writer::new(&mut out, self).db()?;
            out.finish()?.flush()?;
        } else {
            debug!("writing database {}", path.display());
            let mut out = BufWriter::new(file);
            Writer::new(&mut out, self).db()?;
            out.flush()?;
        }
        Ok(())
    }

    /// Read the database from `path` into this (empty) instance.
    ///
    /// A missing file is not an error: the database stays empty and `false`
    /// is returned. Takes a shared advisory lock for the duration of the
    /// read.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<bool, Error> {
        if !self.is_empty() {
            return Err(Error::NotEmpty);
        }
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("database {} does not exist yet", path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        flock(&file, libc::LOCK_SH)?;
        if has_gz_suffix(path) {
            debug!("reading compressed database {}", path.display());
            Reader::new(GzDecoder::new(BufReader::new(file))).db(self)?;
        } else {
            debug!("reading database {}", path.display());
            Reader::new(BufReader::new(file)).db(self)?;
        }
        Ok(true)
    }

    /// The format version [`store`](Self::store) would emit right now.
    pub fn store_version(&self) -> u16 {
        compute_version(self, compute_flags(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Match;

    fn object(dirname: &str, basename: &str, needed: &[&str]) -> Elf {
        Elf {
            dirname: dirname.to_owned(),
            basename: basename.to_owned(),
            os_abi: OsAbi::Gnu,
            needed: needed.iter().map(|s| (*s).to_owned()).collect(),
            ..Default::default()
        }
    }

    fn write_to_vec(db: &Db) -> Vec<u8> {
        let mut buf = Vec::new();
        Writer::new(&mut buf, db).db().expect("write");
        buf
    }

    fn read_from_slice(data: &[u8]) -> Db {
        let mut db = Db::new();
        Reader::new(data).db(&mut db).expect("read");
        db
    }

    /// Field-for-field comparison, with object references resolved to paths
    /// so that differing pool handles don't matter.
    fn assert_db_eq(a: &Db, b: &Db) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.strict_linking, b.strict_linking);
        assert_eq!(a.library_path, b.library_path);
        assert_eq!(a.ignore_file_rules, b.ignore_file_rules);
        assert_eq!(a.assume_found_rules, b.assume_found_rules);
        assert_eq!(a.base_packages, b.base_packages);
        assert_eq!(a.package_library_path, b.package_library_path);
        assert_eq!(a.packages.len(), b.packages.len());
        for (pa, pb) in a.packages.iter().zip(&b.packages) {
            assert_eq!(pa.name, pb.name);
            assert_eq!(pa.version, pb.version);
            assert_eq!(pa.depends, pb.depends);
            assert_eq!(pa.optdepends, pb.optdepends);
            assert_eq!(pa.makedepends, pb.makedepends);
            assert_eq!(pa.checkdepends, pb.checkdepends);
            assert_eq!(pa.provides, pb.provides);
            assert_eq!(pa.conflicts, pb.conflicts);
            assert_eq!(pa.replaces, pb.replaces);
            assert_eq!(pa.groups, pb.groups);
            assert_eq!(pa.filelist, pb.filelist);
            let oa: Vec<String> = pa
                .objects
                .iter()
                .filter_map(|&id| a.object(id))
                .map(Elf::path)
                .collect();
            let ob: Vec<String> = pb
                .objects
                .iter()
                .filter_map(|&id| b.object(id))
                .map(Elf::path)
                .collect();
            assert_eq!(oa, ob);
        }
        let paths = |db: &Db| -> Vec<(String, Vec<String>, Vec<String>)> {
            db.objects()
                .map(|(_, elf)| {
                    (
                        elf.path(),
                        elf.req_found
                            .iter()
                            .filter_map(|&id| db.object(id))
                            .map(Elf::path)
                            .collect(),
                        elf.req_missing.iter().cloned().collect(),
                    )
                })
                .collect()
        };
        assert_eq!(paths(a), paths(b));
        for ((_, ea), (_, eb)) in a.objects().zip(b.objects()) {
            assert_eq!(ea.dirname, eb.dirname);
            assert_eq!(ea.basename, eb.basename);
            assert_eq!(ea.class, eb.class);
            assert_eq!(ea.byte_order, eb.byte_order);
            assert_eq!(ea.os_abi, eb.os_abi);
            assert_eq!(ea.rpath, eb.rpath);
            assert_eq!(ea.runpath, eb.runpath);
            assert_eq!(ea.interpreter, eb.interpreter);
            assert_eq!(ea.needed, eb.needed);
            assert_eq!(ea.owner, eb.owner);
        }
    }

    fn rich_db() -> Db {
        let mut db = Db::new();
        db.name = "test".to_owned();
        db.set_strict(true);
        db.ld_append("/usr/lib");
        db.ld_append("/lib");
        db.ignore_file_add("usr/share/*");
        db.ignore_file_add("opt/*");
        db.assume_found_add("libGL.so.*");
        db.base_packages_add("glibc");
        db.pkg_ld_append("wine", "/usr/lib/wine");

        let mut libc = Package::new("glibc", "2.38-2");
        libc.groups.insert("base".to_owned());
        libc.provides.push(Dependency::new("libc.so.6", ""));
        libc.filelist = vec!["usr/lib/libc.so.6".to_owned()];
        db.install_package(libc, vec![object("/usr/lib", "libc.so.6", &[])]);

        let mut app = Package::new("app", "1.0-1");
        app.depends.push(Dependency::new("glibc", ">=2.38"));
        app.optdepends.push(Dependency::new("zlib", ""));
        app.makedepends.push(Dependency::new("gcc", ""));
        app.checkdepends.push(Dependency::new("check", ""));
        app.conflicts.push(Dependency::new("app-git", ""));
        app.replaces.push(Dependency::new("oldapp", ""));
        app.groups.insert("tools".to_owned());
        app.filelist = vec!["usr/bin/app".to_owned(), "usr/bin/app".to_owned()];
        let mut exe = object("/usr/bin", "app", &["libc.so.6", "libnope.so"]);
        exe.rpath = Some("/usr/lib".to_owned());
        exe.interpreter = Some("/lib64/ld-linux-x86-64.so.2".to_owned());
        db.install_package(app, vec![exe]);
        db
    }

    #[test]
    fn version_floor_is_nine() {
        let mut db = Db::new();
        db.name = "minimal".to_owned();
        db.ld_append("/usr/lib");
        db.ld_append("/usr/local/lib");
        assert_eq!(DbFlags::empty(), compute_flags(&db));
        assert_eq!(9, db.store_version());
    }

    #[test]
    fn version_ladder() {
        let mut db = Db::new();
        db.set_strict(true);
        assert_eq!(9, db.store_version());

        let mut pkg = Package::new("a", "1");
        pkg.depends.push(Dependency::new("b", ""));
        db.install_package(pkg, Vec::new());
        assert_eq!(10, db.store_version());

        let mut pkg = Package::new("c", "1");
        pkg.checkdepends.push(Dependency::new("d", ""));
        db.install_package(pkg, Vec::new());
        assert_eq!(12, db.store_version());
    }

    #[test]
    fn header_layout() {
        let db = rich_db();
        let data = write_to_vec(&db);
        assert_eq!(&DB_MAGIC[..], &data[..16]);
        let version = u16::from_le_bytes([data[16], data[17]]);
        let flags = DbFlags::from_bits_truncate(u16::from_le_bytes([data[18], data[19]]));
        assert_eq!(12, version);
        assert!(flags.contains(DbFlags::STRICT_LINKING));
        assert!(flags.contains(DbFlags::IGNORE_RULES));
        assert!(flags.contains(DbFlags::ASSUME_FOUND));
        assert!(flags.contains(DbFlags::BASE_PACKAGES));
        assert!(flags.contains(DbFlags::PACKAGE_LD_PATH));
        assert!(flags.contains(DbFlags::FILE_LISTS));
        assert!(data[20..42].iter().all(|&b| b == 0));
    }

    #[test]
    fn round_trip_in_memory() {
        let db = rich_db();
        let restored = read_from_slice(&write_to_vec(&db));
        assert_db_eq(&db, &restored);
        assert_eq!(12, restored.loaded_version());
    }

    #[test]
    fn round_trip_preserves_reference_sharing() {
        let db = rich_db();
        let restored = read_from_slice(&write_to_vec(&db));
        // Every object handle in a package's list must be the same handle
        // the database-wide list uses.
        for pkg in restored.packages() {
            for id in &pkg.objects {
                assert!(restored.objects.contains(id));
            }
        }
        // The found edge of the app object points at the same instance as
        // glibc's object list entry.
        let libc_pkg = restored.find_pkg("glibc").expect("installed");
        let (_, app) = restored
            .objects()
            .find(|(_, e)| e.basename == "app")
            .expect("installed");
        assert_eq!(1, app.req_found.len());
        let found = *app.req_found.iter().next().expect("one edge");
        assert_eq!(libc_pkg.objects[0], found);
    }

    #[test]
    fn round_trip_on_disk_plain_and_gz() {
        let db = rich_db();
        let dir = tempfile::tempdir().expect("tempdir");

        let plain = dir.path().join("t.db");
        db.store(&plain).expect("store");
        let mut restored = Db::new();
        assert!(restored.load(&plain).expect("load"));
        assert_db_eq(&db, &restored);

        let gz = dir.path().join("t.db.gz");
        db.store(&gz).expect("store gz");
        let head = std::fs::read(&gz).expect("read back");
        // 0x1f 0x8b: the file actually went through gzip.
        assert_eq!(&[0x1f, 0x8b], &head[..2]);
        let mut restored = Db::new();
        assert!(restored.load(&gz).expect("load gz"));
        assert_db_eq(&db, &restored);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut db = Db::new();
        assert!(!db.load(dir.path().join("absent.db")).expect("load"));
        assert!(db.is_empty());
    }

    #[test]
    fn load_requires_an_empty_db() {
        let mut db = rich_db();
        assert!(matches!(
            db.load("/nonexistent/path.db"),
            Err(Error::NotEmpty)
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut data = write_to_vec(&rich_db());
        data[0] ^= 0xff;
        let mut db = Db::new();
        assert!(matches!(
            Reader::new(&data[..]).db(&mut db),
            Err(Error::BadMagic)
        ));
    }

    #[test]
    fn future_versions_are_rejected() {
        let mut data = write_to_vec(&rich_db());
        data[16..18].copy_from_slice(&(DB_VERSION + 1).to_le_bytes());
        let mut db = Db::new();
        assert!(matches!(
            Reader::new(&data[..]).db(&mut db),
            Err(Error::UnsupportedVersion(..))
        ));
    }

    #[test]
    fn truncated_files_are_corrupt() {
        let data = write_to_vec(&rich_db());
        let mut db = Db::new();
        assert!(Reader::new(&data[..data.len() / 2]).db(&mut db).is_err());
    }

    #[test]
    fn linking_still_works_after_reload() {
        let db = rich_db();
        let mut restored = read_from_slice(&write_to_vec(&db));
        // The restored database must behave, not just compare equal:
        // relinking from scratch reproduces the stored indices.
        let before: Vec<(String, usize, usize)> = restored
            .objects()
            .map(|(_, e)| (e.path(), e.req_found.len(), e.req_missing.len()))
            .collect();
        restored.relink_all();
        let after: Vec<(String, usize, usize)> = restored
            .objects()
            .map(|(_, e)| (e.path(), e.req_found.len(), e.req_missing.len()))
            .collect();
        assert_eq!(before, after);
    }

    fn put_str(data: &mut Vec<u8>, s: &str) {
        data.extend_from_slice(&(s.len() as u32).to_le_bytes());
        data.extend_from_slice(s.as_bytes());
    }

    fn put_u32(data: &mut Vec<u8>, value: u32) {
        data.extend_from_slice(&value.to_le_bytes());
    }

    fn legacy_header(data: &mut Vec<u8>, version: u16) {
        data.extend_from_slice(&DB_MAGIC);
        data.extend_from_slice(&version.to_le_bytes());
        data.extend_from_slice(&0_u16.to_le_bytes());
        data.extend_from_slice(&[0_u8; 22]);
    }

    #[test]
    fn reads_legacy_version_one_files() {
        let mut data = Vec::new();
        legacy_header(&mut data, 1);
        put_str(&mut data, "ancient");
        put_u32(&mut data, 0); // library path
        put_u32(&mut data, 0); // packages
        put_u32(&mut data, 0); // objects
        put_u32(&mut data, 0); // found
        put_u32(&mut data, 0); // missing
        let mut db = Db::new();
        Reader::new(&data[..]).db(&mut db).expect("read v1");
        assert_eq!("ancient", db.name);
        assert_eq!(1, db.loaded_version());
        assert!(db.is_empty());
    }

    #[test]
    fn reads_legacy_version_three_files_with_offset_refs() {
        let mut data = Vec::new();
        legacy_header(&mut data, 3);
        put_str(&mut data, "legacy");
        put_u32(&mut data, 0); // library path
        put_u32(&mut data, 1); // one package
        data.push(TAG_PKG);
        put_str(&mut data, "glibc");
        put_str(&mut data, "2.0-1");
        put_u32(&mut data, 1); // one object
        data.push(TAG_OBJ);
        let body_at = data.len() as u64;
        put_str(&mut data, "/usr/lib");
        put_str(&mut data, "libc.so.6");
        data.push(2); // class
        data.push(1); // byte order
        data.push(0); // osabi
        data.push(0); // rpath unset
        data.push(0); // runpath unset
        put_str(&mut data, "");
        put_str(&mut data, "");
        put_u32(&mut data, 0); // needed
        put_u32(&mut data, 1); // glued depends
        put_str(&mut data, "linux-api-headers>=4.10");
        put_u32(&mut data, 0); // glued optdepends
        // The database-wide object list references the record by its body
        // offset, the pre-version-8 scheme.
        put_u32(&mut data, 1);
        data.push(TAG_OBJREF);
        data.extend_from_slice(&body_at.to_le_bytes());
        put_u32(&mut data, 0); // found
        put_u32(&mut data, 0); // missing

        let mut db = Db::new();
        Reader::new(&data[..]).db(&mut db).expect("read v3");
        assert_eq!(3, db.loaded_version());
        let pkg = db.find_pkg("glibc").expect("package read");
        assert_eq!("linux-api-headers", pkg.depends[0].name);
        assert_eq!(">=4.10", pkg.depends[0].constraint);
        assert_eq!(1, db.object_count());
        let (id, elf) = db.objects().next().expect("object read");
        assert_eq!(pkg.objects[0], id);
        assert_eq!("/usr/lib/libc.so.6", elf.path());
        assert_eq!(Some("glibc"), elf.owner.as_deref());
    }

    #[test]
    fn round_trip_arbitrary_databases() {
        arbtest::arbtest(|u| {
            let mut db = Db::new();
            db.name = u.arbitrary()?;
            db.strict_linking = u.arbitrary()?;
            for _ in 0..u.int_in_range(0..=3)? {
                let dir: String = u.arbitrary()?;
                db.ld_append(dir);
            }
            for _ in 0..u.int_in_range(0..=2)? {
                let rule: String = u.arbitrary()?;
                db.ignore_file_add(rule);
            }
            for _ in 0..u.int_in_range(0..=2)? {
                let rule: String = u.arbitrary()?;
                db.assume_found_add(rule);
            }
            for _ in 0..u.int_in_range(0..=2)? {
                let name: String = u.arbitrary()?;
                db.base_packages_add(name);
            }
            let pkg_count = u.int_in_range(0..=3)?;
            for p in 0..pkg_count {
                let mut pkg = Package::new(format!("pkg{p}"), u.arbitrary::<String>()?);
                if u.arbitrary()? {
                    pkg.depends
                        .push(Dependency::new(u.arbitrary::<String>()?, u.arbitrary::<String>()?));
                }
                if u.arbitrary()? {
                    pkg.checkdepends.push(Dependency::new("check", ""));
                }
                if u.arbitrary()? {
                    pkg.groups.insert(u.arbitrary()?);
                }
                if u.arbitrary()? {
                    pkg.filelist.push(u.arbitrary()?);
                }
                if u.arbitrary()? {
                    db.pkg_ld_append(&format!("pkg{p}"), u.arbitrary::<String>()?);
                }
                let mut objects = Vec::new();
                for o in 0..u.int_in_range(0..=2)? {
                    let mut elf = Elf::default();
                    elf.dirname = u.arbitrary()?;
                    elf.basename = format!("lib{p}_{o}.so");
                    elf.class = u.arbitrary()?;
                    elf.byte_order = u.arbitrary()?;
                    elf.os_abi = OsAbi::from(u.arbitrary::<u8>()?);
                    elf.rpath = u.arbitrary()?;
                    elf.runpath = u.arbitrary()?;
                    elf.interpreter = u.arbitrary()?;
                    elf.needed = u.arbitrary()?;
                    objects.push(elf);
                }
                db.install_package(pkg, objects);
            }
            let restored = read_from_slice(&write_to_vec(&db));
            assert_db_eq(&db, &restored);
            Ok(())
        });
    }

    #[test]
    fn assume_found_survives_store_and_filters_relink() {
        let mut db = Db::new();
        db.assume_found_add("libnope.so");
        db.install_package(
            Package::new("app", "1"),
            vec![object("/usr/bin", "app", &["libnope.so"])],
        );
        let restored = read_from_slice(&write_to_vec(&db));
        assert!(restored.assume_found("libnope.so"));
        assert!(!restored.assume_found("libother.so"));
        assert!(restored
            .find_pkg("app")
            .is_some_and(|p| !restored.is_broken_pkg(p)));
        // Glob rules match too.
        let m = Match::glob("libn*.so");
        assert!(m.matches("libnope.so"));
    }
}
