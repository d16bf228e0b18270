//! The linker model: which installed object satisfies a `DT_NEEDED` entry,
//! and the relink operations that rebuild the indices wholesale.

use std::collections::BTreeSet;
use std::thread;

use log::debug;

use crate::match_glob;
use crate::split_path_list;
use crate::Db;
use crate::Elf;
use crate::ObjId;

/// Hard upper bound on relink worker threads.
const MAX_JOBS: usize = 128;

impl Db {
    /// Whether `dir` is in the search scope of `subject`.
    ///
    /// Checked in order: the subject's rpath, its runpath, the trusted
    /// library path, the per-package path of the subject's owner, and the
    /// per-package paths of every base package. `LD_LIBRARY_PATH` is
    /// runtime state and deliberately not consulted; `/lib` and `/usr/lib`
    /// are not special, they must be configured as trusted paths.
    pub(crate) fn is_visible(&self, subject: &Elf, dir: &str) -> bool {
        if let Some(rpath) = subject.rpath.as_deref() {
            if split_path_list(rpath).any(|p| p == dir) {
                return true;
            }
        }
        if let Some(runpath) = subject.runpath.as_deref() {
            if split_path_list(runpath).any(|p| p == dir) {
                return true;
            }
        }
        if self.library_path.iter().any(|p| p == dir) {
            return true;
        }
        let pkg_paths = |name: &str| {
            self.package_library_path
                .get(name)
                .is_some_and(|paths| paths.iter().any(|p| p == dir))
        };
        if subject.owner.as_deref().is_some_and(|name| pkg_paths(name)) {
            return true;
        }
        self.base_packages.iter().any(|base| pkg_paths(base))
    }

    /// Find an installed object satisfying the library name `needed` for
    /// `subject`: same basename, compatible identity, visible directory.
    /// Objects are probed in installation order; the first match wins.
    pub fn find_for(&self, subject: &Elf, needed: &str) -> Option<ObjId> {
        for &id in &self.objects {
            let Some(lib) = self.pool.get(id) else { continue };
            if lib.basename != needed
                || !subject.can_use(lib, self.strict_linking)
                || !self.is_visible(subject, &lib.dirname)
            {
                continue;
            }
            debug!(
                "dependency {} of {} -> {}",
                needed,
                subject.path(),
                lib.path()
            );
            return Some(id);
        }
        None
    }

    /// Whether an assume-found rule declares `needed` satisfied by fiat.
    pub fn assume_found(&self, needed: &str) -> bool {
        self.assume_found_rules
            .iter()
            .any(|rule| match_glob(rule, needed))
    }

    /// Compute the `found`/`missing` sets for one object. Names matched by
    /// an assume-found rule land in neither set.
    pub(crate) fn link_object(&self, id: ObjId) -> (BTreeSet<ObjId>, BTreeSet<String>) {
        let mut found = BTreeSet::new();
        let mut missing = BTreeSet::new();
        let Some(subject) = self.pool.get(id) else {
            return (found, missing);
        };
        for needed in &subject.needed {
            if self.assume_found(needed) {
                continue;
            }
            match self.find_for(subject, needed) {
                Some(lib) => {
                    found.insert(lib);
                }
                None => {
                    missing.insert(needed.clone());
                }
            }
        }
        (found, missing)
    }

    /// Rebuild every object's `found`/`missing` index from scratch.
    pub fn relink_all(&mut self) {
        let ids = self.objects.clone();
        for id in ids {
            let (found, missing) = self.link_object(id);
            if let Some(elf) = self.pool.get_mut(id) {
                elf.req_found = found;
                elf.req_missing = missing;
            }
        }
    }

    /// [`relink_all`](Self::relink_all) across up to `max_jobs` threads.
    ///
    /// The object list is partitioned into contiguous slices; each worker
    /// computes the index entries for its own slice against the shared,
    /// read-only database, and the results are applied after the join, so
    /// no locking is needed. Job counts above 128 are clamped.
    pub fn relink_all_threaded(&mut self, max_jobs: usize) {
        let jobs = max_jobs.clamp(1, MAX_JOBS).min(self.objects.len().max(1));
        if jobs <= 1 {
            return self.relink_all();
        }
        let ids = self.objects.clone();
        let chunk_len = ids.len().div_ceil(jobs);
        let db = &*self;
        let mut results: Vec<(ObjId, BTreeSet<ObjId>, BTreeSet<String>)> =
            thread::scope(|scope| {
                let workers: Vec<_> = ids
                    .chunks(chunk_len)
                    .map(|slice| {
                        scope.spawn(move || {
                            slice
                                .iter()
                                .map(|&id| {
                                    let (found, missing) = db.link_object(id);
                                    (id, found, missing)
                                })
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                workers
                    .into_iter()
                    .flat_map(|worker| worker.join().expect("relink worker panicked"))
                    .collect()
            });
        for (id, found, missing) in results.drain(..) {
            if let Some(elf) = self.pool.get_mut(id) {
                elf.req_found = found;
                elf.req_missing = missing;
            }
        }
    }

    /// Re-normalize every object's rpath/runpath and relink.
    ///
    /// Databases written before path normalization existed store raw
    /// `DT_RPATH` values; this upgrades them in place.
    pub fn fix_paths(&mut self) {
        for (_, elf) in self.pool.iter_mut() {
            elf.solve_paths();
        }
        self.relink_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteOrder;
    use crate::Class;
    use crate::OsAbi;
    use crate::Package;

    fn object(dirname: &str, basename: &str, needed: &[&str]) -> Elf {
        Elf {
            dirname: dirname.to_owned(),
            basename: basename.to_owned(),
            class: Class::Elf64,
            byte_order: ByteOrder::LittleEndian,
            os_abi: OsAbi::Gnu,
            needed: needed.iter().map(|s| (*s).to_owned()).collect(),
            ..Default::default()
        }
    }

    fn install(db: &mut Db, name: &str, objects: Vec<Elf>) {
        db.install_package(Package::new(name, "1.0-1"), objects);
    }

    fn missing_of(db: &Db, basename: &str) -> Vec<String> {
        db.objects()
            .find(|(_, elf)| elf.basename == basename)
            .map(|(_, elf)| elf.req_missing.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn resolves_through_trusted_path() {
        let mut db = Db::new();
        db.ld_append("/usr/lib");
        install(&mut db, "libc", vec![object("/usr/lib", "libc.so.6", &[])]);
        install(&mut db, "app", vec![object("/usr/bin", "app", &["libc.so.6"])]);
        assert!(missing_of(&db, "app").is_empty());
        let (_, app) = db
            .objects()
            .find(|(_, elf)| elf.basename == "app")
            .expect("app installed");
        assert_eq!(1, app.req_found.len());
    }

    #[test]
    fn back_satisfaction_on_later_install() {
        let mut db = Db::new();
        db.ld_append("/usr/lib");
        install(&mut db, "app", vec![object("/usr/bin", "app", &["libc.so.6"])]);
        assert_eq!(vec!["libc.so.6".to_owned()], missing_of(&db, "app"));
        install(&mut db, "libc", vec![object("/usr/lib", "libc.so.6", &[])]);
        assert!(missing_of(&db, "app").is_empty());
    }

    #[test]
    fn invisible_directories_do_not_satisfy() {
        let mut db = Db::new();
        install(&mut db, "libc", vec![object("/opt/lib", "libc.so.6", &[])]);
        install(&mut db, "app", vec![object("/usr/bin", "app", &["libc.so.6"])]);
        assert_eq!(vec!["libc.so.6".to_owned()], missing_of(&db, "app"));
        // The library becomes visible once its directory is trusted.
        db.ld_append("/opt/lib");
        db.relink_all();
        assert!(missing_of(&db, "app").is_empty());
    }

    #[test]
    fn rpath_and_runpath_make_directories_visible() {
        let mut db = Db::new();
        let mut app = object("/usr/bin", "app", &["libfoo.so"]);
        app.rpath = Some("/pkg/lib:/other".to_owned());
        install(&mut db, "foo", vec![object("/pkg/lib", "libfoo.so", &[])]);
        install(&mut db, "app", vec![app]);
        assert!(missing_of(&db, "app").is_empty());

        let mut db = Db::new();
        let mut app = object("/usr/bin", "app", &["libfoo.so"]);
        app.runpath = Some("/pkg/lib".to_owned());
        install(&mut db, "foo", vec![object("/pkg/lib", "libfoo.so", &[])]);
        install(&mut db, "app", vec![app]);
        assert!(missing_of(&db, "app").is_empty());
    }

    #[test]
    fn per_package_and_base_package_paths() {
        let mut db = Db::new();
        db.pkg_ld_append("app", "/app/lib");
        install(&mut db, "foo", vec![object("/app/lib", "libfoo.so", &[])]);
        install(&mut db, "app", vec![object("/app/bin", "app", &["libfoo.so"])]);
        assert!(missing_of(&db, "app").is_empty());
        // Another package does not see /app/lib ...
        install(&mut db, "other", vec![object("/x", "other", &["libfoo.so"])]);
        assert_eq!(vec!["libfoo.so".to_owned()], missing_of(&db, "other"));
        // ... until app becomes a base package.
        db.base_packages_add("app");
        db.relink_all();
        assert!(missing_of(&db, "other").is_empty());
    }

    #[test]
    fn strict_linking_rejects_weak_osabi() {
        let mut db = Db::new();
        db.ld_append("/usr/lib");
        let mut libc = object("/usr/lib", "libc.so.6", &[]);
        libc.os_abi = OsAbi::Sysv;
        install(&mut db, "libc", vec![libc]);
        install(&mut db, "app", vec![object("/usr/bin", "app", &["libc.so.6"])]);
        assert!(missing_of(&db, "app").is_empty());
        db.set_strict(true);
        db.relink_all();
        assert_eq!(vec!["libc.so.6".to_owned()], missing_of(&db, "app"));
    }

    #[test]
    fn assume_found_short_circuits_without_an_edge() {
        let mut db = Db::new();
        db.assume_found_add("libc.so.*");
        install(&mut db, "app", vec![object("/usr/bin", "app", &["libc.so.6"])]);
        let (_, app) = db.objects().next().expect("app installed");
        assert!(app.req_missing.is_empty());
        assert!(app.req_found.is_empty());
    }

    #[test]
    fn reinstall_replaces_atomically() {
        let mut db = Db::new();
        db.ld_append("/usr/lib");
        install(&mut db, "libc", vec![object("/usr/lib", "libc.so.6", &[])]);
        install(&mut db, "libc", vec![object("/usr/lib", "libc.so.6", &[])]);
        assert_eq!(1, db.package_count());
        assert_eq!(1, db.object_count());
    }

    #[test]
    fn delete_downgrades_found_edges() {
        let mut db = Db::new();
        db.ld_append("/usr/lib");
        install(&mut db, "libc", vec![object("/usr/lib", "libc.so.6", &[])]);
        install(&mut db, "app", vec![object("/usr/bin", "app", &["libc.so.6"])]);
        assert!(missing_of(&db, "app").is_empty());
        assert!(db.delete_package("libc"));
        assert!(!db.delete_package("libc"));
        assert_eq!(1, db.object_count());
        assert_eq!(vec!["libc.so.6".to_owned()], missing_of(&db, "app"));
    }

    #[test]
    fn threaded_relink_matches_serial_relink() {
        let mut db = Db::new();
        db.ld_append("/usr/lib");
        for i in 0..20 {
            let name = format!("lib{i}.so");
            install(
                &mut db,
                &format!("pkg{i}"),
                vec![
                    object("/usr/lib", &name, &[]),
                    object("/usr/bin", &format!("tool{i}"), &[&name, "libmissing.so"]),
                ],
            );
        }
        let serial: Vec<_> = {
            db.relink_all();
            db.objects()
                .map(|(_, e)| (e.req_found.clone(), e.req_missing.clone()))
                .collect()
        };
        db.relink_all_threaded(4);
        let threaded: Vec<_> = db
            .objects()
            .map(|(_, e)| (e.req_found.clone(), e.req_missing.clone()))
            .collect();
        assert_eq!(serial, threaded);
    }
}
