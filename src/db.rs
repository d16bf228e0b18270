use std::collections::BTreeMap;
use std::collections::BTreeSet;

use log::debug;

use crate::Elf;
use crate::ObjId;
use crate::ObjectPool;
use crate::Package;

/// The package dependency database.
///
/// Holds the installed packages, the pool of their ELF objects, the linking
/// rules and the derived `found`/`missing` indices. Mutation happens through
/// the install/remove/relink operations and the rule editors; every rule
/// editor returns whether it changed anything, which callers use to decide
/// whether the database needs to be written back.
#[derive(Debug, Default)]
pub struct Db {
    /// Free-form label of the database.
    pub name: String,
    /// Require an exact osabi match between subject and candidate.
    pub strict_linking: bool,
    /// Trusted library directories, in search order.
    pub library_path: Vec<String>,
    /// Glob patterns for files that packages should pretend not to contain.
    pub ignore_file_rules: BTreeSet<String>,
    /// Library names that are satisfied by fiat.
    pub assume_found_rules: BTreeSet<String>,
    /// Packages whose per-package library paths apply to every object.
    pub base_packages: BTreeSet<String>,
    /// Additional library directories per package name.
    pub package_library_path: BTreeMap<String, Vec<String>>,
    pub(crate) packages: Vec<Package>,
    pub(crate) objects: Vec<ObjId>,
    pub(crate) pool: ObjectPool,
    pub(crate) loaded_version: u16,
}

impl Db {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the database holds no packages and no objects.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.objects.is_empty()
    }

    /// The format version the database was loaded from, 0 for a fresh one.
    pub fn loaded_version(&self) -> u16 {
        self.loaded_version
    }

    /// Installed packages in installation order.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter()
    }

    /// The number of installed packages.
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Find a package by name.
    pub fn find_pkg(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|pkg| pkg.name == name)
    }

    /// The object behind a handle.
    pub fn object(&self, id: ObjId) -> Option<&Elf> {
        self.pool.get(id)
    }

    /// All objects in installation order.
    pub fn objects(&self) -> impl Iterator<Item = (ObjId, &Elf)> {
        self.objects.iter().filter_map(|&id| Some((id, self.pool.get(id)?)))
    }

    /// The number of installed objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Install a package. A package with the same name is removed first, so
    /// reinstallation is replacement, never duplication.
    ///
    /// `objects` are the package's parsed ELF files; the database takes
    /// ownership and records them in the package's object list. Two passes
    /// keep the indices incremental: objects that were missing a library a
    /// new object provides pick it up first, then the new objects resolve
    /// their own requirements.
    pub fn install_package(&mut self, mut pkg: Package, objects: Vec<Elf>) -> bool {
        self.delete_package(&pkg.name);
        debug!("installing {} {}", pkg.name, pkg.version);

        let mut new_ids = Vec::with_capacity(objects.len());
        for mut elf in objects {
            elf.owner = Some(pkg.name.clone());
            elf.req_found.clear();
            elf.req_missing.clear();
            let id = self.pool.insert(elf);
            new_ids.push(id);
            self.objects.push(id);
        }
        pkg.objects = new_ids.clone();
        self.packages.push(pkg);

        // Pass one: a new object may be the library some installed object
        // was missing.
        for &id in &new_ids {
            let mut satisfied = Vec::new();
            {
                let Some(lib) = self.pool.get(id) else { continue };
                for &seeker_id in &self.objects {
                    if seeker_id == id {
                        continue;
                    }
                    let Some(seeker) = self.pool.get(seeker_id) else {
                        continue;
                    };
                    if seeker.req_missing.contains(&lib.basename)
                        && seeker.can_use(lib, self.strict_linking)
                        && self.is_visible(seeker, &lib.dirname)
                    {
                        satisfied.push(seeker_id);
                    }
                }
            }
            let basename = match self.pool.get(id) {
                Some(lib) => lib.basename.clone(),
                None => continue,
            };
            for seeker_id in satisfied {
                if let Some(seeker) = self.pool.get_mut(seeker_id) {
                    seeker.req_missing.remove(&basename);
                    seeker.req_found.insert(id);
                }
            }
        }

        // Pass two: resolve what the new objects themselves require.
        for &id in &new_ids {
            let (found, missing) = self.link_object(id);
            if let Some(elf) = self.pool.get_mut(id) {
                elf.req_found = found;
                elf.req_missing = missing;
            }
        }
        true
    }

    /// Remove a package by name. Returns whether a package was removed.
    ///
    /// The package's objects leave the pool and the object list, and every
    /// `found` edge that pointed at one of them is downgraded to a `missing`
    /// entry on the pointing object. The downgrade ignores the linking
    /// rules; run [`relink_all`](Self::relink_all) to re-evaluate those.
    pub fn delete_package(&mut self, name: &str) -> bool {
        let Some(at) = self.packages.iter().position(|pkg| pkg.name == name) else {
            return false;
        };
        let pkg = self.packages.remove(at);
        debug!("removing {} {}", pkg.name, pkg.version);

        let mut removed: BTreeMap<ObjId, String> = BTreeMap::new();
        for &id in &pkg.objects {
            if let Some(elf) = self.pool.remove(id) {
                removed.insert(id, elf.basename);
            }
        }
        self.objects.retain(|id| !removed.contains_key(id));

        // A surviving object that found its library in the removed package
        // goes back to missing it, unless another found object still
        // provides the same name.
        let mut downgrades: Vec<(ObjId, String)> = Vec::new();
        for (seeker_id, seeker) in self.pool.iter() {
            for (dead, basename) in &removed {
                if !seeker.req_found.contains(dead) {
                    continue;
                }
                let still_found = seeker.req_found.iter().any(|&other| {
                    other != *dead
                        && self
                            .pool
                            .get(other)
                            .is_some_and(|elf| elf.basename == *basename)
                });
                if !still_found && seeker.needed.iter().any(|n| n == basename) {
                    downgrades.push((seeker_id, basename.clone()));
                }
            }
        }
        for (seeker_id, basename) in downgrades {
            if let Some(seeker) = self.pool.get_mut(seeker_id) {
                seeker.req_missing.insert(basename);
            }
        }
        for (_, seeker) in self.pool.iter_mut() {
            for dead in removed.keys() {
                seeker.req_found.remove(dead);
            }
        }
        true
    }

    /// Remove every package and object, keeping rules and settings.
    pub fn wipe_packages(&mut self) -> bool {
        let changed = !self.packages.is_empty() || !self.objects.is_empty();
        self.packages.clear();
        self.objects.clear();
        self.pool.clear();
        changed
    }

    /// Clear the filelist of every package, keeping objects and indices.
    pub fn wipe_filelists(&mut self) -> bool {
        let mut changed = false;
        for pkg in &mut self.packages {
            changed |= !pkg.filelist.is_empty();
            pkg.filelist.clear();
        }
        changed
    }

    /// Rename the database.
    pub fn rename<S: Into<String>>(&mut self, name: S) -> bool {
        let name = name.into();
        if self.name == name {
            return false;
        }
        self.name = name;
        true
    }

    /// Turn strict linking on or off.
    pub fn set_strict(&mut self, strict: bool) -> bool {
        if self.strict_linking == strict {
            return false;
        }
        self.strict_linking = strict;
        true
    }

    fn list_insert(list: &mut Vec<String>, dir: String, at: usize) -> bool {
        if list.iter().any(|d| *d == dir) {
            return false;
        }
        list.insert(at.min(list.len()), dir);
        true
    }

    fn list_delete(list: &mut Vec<String>, dir: &str) -> bool {
        let len = list.len();
        list.retain(|d| d != dir);
        list.len() != len
    }

    fn list_delete_id(list: &mut Vec<String>, id: usize) -> bool {
        if id >= list.len() {
            return false;
        }
        list.remove(id);
        true
    }

    fn set_delete_id(set: &mut BTreeSet<String>, id: usize) -> bool {
        match set.iter().nth(id).cloned() {
            Some(value) => set.remove(&value),
            None => false,
        }
    }

    /// Append a trusted library directory.
    pub fn ld_append<S: Into<String>>(&mut self, dir: S) -> bool {
        Self::list_insert(&mut self.library_path, dir.into(), usize::MAX)
    }

    /// Prepend a trusted library directory.
    pub fn ld_prepend<S: Into<String>>(&mut self, dir: S) -> bool {
        Self::list_insert(&mut self.library_path, dir.into(), 0)
    }

    /// Insert a trusted library directory at `at`.
    pub fn ld_insert<S: Into<String>>(&mut self, dir: S, at: usize) -> bool {
        Self::list_insert(&mut self.library_path, dir.into(), at)
    }

    /// Remove a trusted library directory by value.
    pub fn ld_delete(&mut self, dir: &str) -> bool {
        Self::list_delete(&mut self.library_path, dir)
    }

    /// Remove a trusted library directory by position.
    pub fn ld_delete_id(&mut self, id: usize) -> bool {
        Self::list_delete_id(&mut self.library_path, id)
    }

    /// Remove every trusted library directory.
    pub fn ld_clear(&mut self) -> bool {
        let changed = !self.library_path.is_empty();
        self.library_path.clear();
        changed
    }

    /// Add an ignore-file rule (a glob over filelist entries).
    pub fn ignore_file_add<S: Into<String>>(&mut self, pattern: S) -> bool {
        self.ignore_file_rules.insert(pattern.into())
    }

    /// Remove an ignore-file rule by value.
    pub fn ignore_file_delete(&mut self, pattern: &str) -> bool {
        self.ignore_file_rules.remove(pattern)
    }

    /// Remove an ignore-file rule by position.
    pub fn ignore_file_delete_id(&mut self, id: usize) -> bool {
        Self::set_delete_id(&mut self.ignore_file_rules, id)
    }

    /// Add an assume-found rule (a glob over library names).
    pub fn assume_found_add<S: Into<String>>(&mut self, name: S) -> bool {
        self.assume_found_rules.insert(name.into())
    }

    /// Remove an assume-found rule by value.
    pub fn assume_found_delete(&mut self, name: &str) -> bool {
        self.assume_found_rules.remove(name)
    }

    /// Remove an assume-found rule by position.
    pub fn assume_found_delete_id(&mut self, id: usize) -> bool {
        Self::set_delete_id(&mut self.assume_found_rules, id)
    }

    /// Mark a package name as a base package.
    pub fn base_packages_add<S: Into<String>>(&mut self, name: S) -> bool {
        self.base_packages.insert(name.into())
    }

    /// Unmark a base package by name.
    pub fn base_packages_delete(&mut self, name: &str) -> bool {
        self.base_packages.remove(name)
    }

    /// Unmark a base package by position.
    pub fn base_packages_delete_id(&mut self, id: usize) -> bool {
        Self::set_delete_id(&mut self.base_packages, id)
    }

    /// Append to a package's library path.
    pub fn pkg_ld_append<S: Into<String>>(&mut self, pkg: &str, dir: S) -> bool {
        self.pkg_ld_insert(pkg, dir, usize::MAX)
    }

    /// Prepend to a package's library path.
    pub fn pkg_ld_prepend<S: Into<String>>(&mut self, pkg: &str, dir: S) -> bool {
        self.pkg_ld_insert(pkg, dir, 0)
    }

    /// Insert into a package's library path at `at`.
    pub fn pkg_ld_insert<S: Into<String>>(&mut self, pkg: &str, dir: S, at: usize) -> bool {
        let list = self.package_library_path.entry(pkg.to_owned()).or_default();
        let changed = Self::list_insert(list, dir.into(), at);
        if list.is_empty() {
            self.package_library_path.remove(pkg);
        }
        changed
    }

    /// Remove from a package's library path by value. Empty entries are
    /// dropped from the map.
    pub fn pkg_ld_delete(&mut self, pkg: &str, dir: &str) -> bool {
        let Some(list) = self.package_library_path.get_mut(pkg) else {
            return false;
        };
        let changed = Self::list_delete(list, dir);
        if list.is_empty() {
            self.package_library_path.remove(pkg);
        }
        changed
    }

    /// Remove from a package's library path by position.
    pub fn pkg_ld_delete_id(&mut self, pkg: &str, id: usize) -> bool {
        let Some(list) = self.package_library_path.get_mut(pkg) else {
            return false;
        };
        let changed = Self::list_delete_id(list, id);
        if list.is_empty() {
            self.package_library_path.remove(pkg);
        }
        changed
    }

    /// Remove a package's library path entirely.
    pub fn pkg_ld_clear(&mut self, pkg: &str) -> bool {
        self.package_library_path.remove(pkg).is_some()
    }
}
