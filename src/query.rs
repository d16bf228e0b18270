//! Read-only queries over the database: filtered package/object listings,
//! the found/missing edge tables and the dependency integrity check.

use crate::Db;
use crate::Dependency;
use crate::Elf;
use crate::ObjId;
use crate::ObjectFilter;
use crate::Package;
use crate::PackageFilter;
use crate::StringFilter;

/// One finding of [`Db::check_integrity`].
#[derive(Clone, Debug)]
pub enum IntegrityIssue {
    /// A textual dependency names no installed package, no provider of that
    /// name, and no base package.
    MissingPackageDependency {
        /// Package declaring the dependency.
        pkg: String,
        /// The unsatisfied dependency.
        dependency: Dependency,
    },
    /// An installed object is missing a library; candidate packages contain
    /// a library of that name, but none that the object can link.
    MissingLibrary {
        /// Package owning the object.
        pkg: String,
        /// Full path of the object.
        object: String,
        /// The missing library name.
        library: String,
        /// Packages containing an object with that basename.
        candidates: Vec<String>,
    },
}

impl Db {
    /// Whether the object behind `id` is broken.
    pub fn is_broken(&self, id: ObjId) -> bool {
        self.pool.get(id).is_some_and(Elf::is_broken)
    }

    /// Whether any of the package's objects is broken.
    pub fn is_broken_pkg(&self, pkg: &Package) -> bool {
        pkg.objects.iter().any(|&id| self.is_broken(id))
    }

    /// Objects with a non-empty missing set, in installation order.
    pub fn broken_objects(&self) -> impl Iterator<Item = (ObjId, &Elf)> {
        self.objects().filter(|(_, elf)| elf.is_broken())
    }

    /// Packages containing a broken object, in installation order.
    pub fn broken_packages(&self) -> impl Iterator<Item = &Package> {
        self.packages().filter(|pkg| self.is_broken_pkg(pkg))
    }

    /// Packages passing all of `filters`.
    pub fn filtered_packages<'a>(
        &'a self,
        filters: &'a [PackageFilter],
    ) -> impl Iterator<Item = &'a Package> {
        self.packages()
            .filter(move |pkg| filters.iter().all(|f| f.matches(self, pkg)))
    }

    /// Objects passing all of `filters`.
    pub fn filtered_objects<'a>(
        &'a self,
        filters: &'a [ObjectFilter],
    ) -> impl Iterator<Item = (ObjId, &'a Elf)> {
        self.objects()
            .filter(move |(_, elf)| filters.iter().all(|f| f.matches(elf)))
    }

    /// Whether the package has no object passing all of `filters`.
    pub fn is_empty_pkg(&self, pkg: &Package, filters: &[ObjectFilter]) -> bool {
        !pkg.objects.iter().any(|&id| {
            self.pool
                .get(id)
                .is_some_and(|elf| filters.iter().all(|f| f.matches(elf)))
        })
    }

    /// The `found` edges of an object: the objects satisfying its needs.
    pub fn found_of(&self, id: ObjId) -> impl Iterator<Item = (ObjId, &Elf)> {
        self.pool
            .get(id)
            .into_iter()
            .flat_map(|elf| elf.req_found.iter())
            .filter_map(|&fid| Some((fid, self.pool.get(fid)?)))
    }

    /// Filelist entries of `pkg` passing all of `filters`.
    pub fn filtered_filelist<'a>(
        &self,
        pkg: &'a Package,
        filters: &'a [StringFilter],
    ) -> impl Iterator<Item = &'a str> {
        pkg.filelist
            .iter()
            .map(String::as_str)
            .filter(move |file| filters.iter().all(|f| f.matches(file)))
    }

    /// Check that the textual dependencies and the object-level links of
    /// every package (passing `pkg_filters`) are satisfiable.
    pub fn check_integrity(
        &self,
        pkg_filters: &[PackageFilter],
        obj_filters: &[ObjectFilter],
    ) -> Vec<IntegrityIssue> {
        let mut issues = Vec::new();
        for pkg in self.filtered_packages(pkg_filters) {
            for dep in &pkg.depends {
                let provided = self.packages.iter().any(|candidate| {
                    candidate.name == dep.name
                        || candidate.provides.iter().any(|p| p.name == dep.name)
                        || candidate.replaces.iter().any(|p| p.name == dep.name)
                });
                if provided || self.base_packages.contains(&dep.name) {
                    continue;
                }
                issues.push(IntegrityIssue::MissingPackageDependency {
                    pkg: pkg.name.clone(),
                    dependency: dep.clone(),
                });
            }
            for &id in &pkg.objects {
                let Some(elf) = self.pool.get(id) else { continue };
                if !obj_filters.iter().all(|f| f.matches(elf)) {
                    continue;
                }
                for library in &elf.req_missing {
                    let mut candidates: Vec<String> = self
                        .packages
                        .iter()
                        .filter(|candidate| {
                            candidate.objects.iter().any(|&oid| {
                                self.pool
                                    .get(oid)
                                    .is_some_and(|lib| lib.basename == *library)
                            })
                        })
                        .map(|candidate| candidate.name.clone())
                        .collect();
                    candidates.sort();
                    issues.push(IntegrityIssue::MissingLibrary {
                        pkg: pkg.name.clone(),
                        object: elf.path(),
                        library: library.clone(),
                        candidates,
                    });
                }
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Match;
    use crate::ObjectAxis;
    use crate::PackageAxis;

    fn object(dirname: &str, basename: &str, needed: &[&str]) -> Elf {
        Elf {
            dirname: dirname.to_owned(),
            basename: basename.to_owned(),
            needed: needed.iter().map(|s| (*s).to_owned()).collect(),
            ..Default::default()
        }
    }

    fn sample_db() -> Db {
        let mut db = Db::new();
        db.ld_append("/usr/lib");
        db.install_package(
            Package::new("glibc", "2.38-1"),
            vec![object("/usr/lib", "libc.so.6", &[])],
        );
        let mut app = Package::new("app", "1.0-1");
        app.depends.push(Dependency::new("glibc", ">=2.0"));
        app.depends.push(Dependency::new("nonexistent", ""));
        app.filelist = vec!["usr/bin/app".to_owned(), "usr/share/doc/app".to_owned()];
        db.install_package(
            app,
            vec![object("/usr/bin", "app", &["libc.so.6", "libgone.so"])],
        );
        db
    }

    #[test]
    fn broken_queries() {
        let db = sample_db();
        let broken: Vec<&str> = db
            .broken_objects()
            .map(|(_, elf)| elf.basename.as_str())
            .collect();
        assert_eq!(vec!["app"], broken);
        let broken_pkgs: Vec<&str> =
            db.broken_packages().map(|pkg| pkg.name.as_str()).collect();
        assert_eq!(vec!["app"], broken_pkgs);
    }

    #[test]
    fn filters_compose_with_and_semantics() {
        let db = sample_db();
        let filters = vec![
            PackageFilter::new(PackageAxis::Name, Some(Match::glob("a*")), false),
            PackageFilter::new(PackageAxis::Broken, None, false),
        ];
        let names: Vec<&str> = db
            .filtered_packages(&filters)
            .map(|pkg| pkg.name.as_str())
            .collect();
        assert_eq!(vec!["app"], names);

        let negated = vec![PackageFilter::new(PackageAxis::Broken, None, true)];
        let names: Vec<&str> = db
            .filtered_packages(&negated)
            .map(|pkg| pkg.name.as_str())
            .collect();
        assert_eq!(vec!["glibc"], names);
    }

    #[test]
    fn object_filters_match_dependencies() {
        let db = sample_db();
        let filters = vec![ObjectFilter::new(
            ObjectAxis::Depends,
            Match::exact("libc.so.6"),
            false,
        )];
        let names: Vec<&str> = db
            .filtered_objects(&filters)
            .map(|(_, elf)| elf.basename.as_str())
            .collect();
        assert_eq!(vec!["app"], names);
    }

    #[test]
    fn integrity_reports_missing_providers_and_libraries() {
        let db = sample_db();
        let issues = db.check_integrity(&[], &[]);
        assert!(issues.iter().any(|issue| matches!(
            issue,
            IntegrityIssue::MissingPackageDependency { pkg, dependency }
                if pkg == "app" && dependency.name == "nonexistent"
        )));
        assert!(issues.iter().any(|issue| matches!(
            issue,
            IntegrityIssue::MissingLibrary { pkg, library, .. }
                if pkg == "app" && library == "libgone.so"
        )));
        // A base package entry silences the package dependency.
        let mut db = db;
        db.base_packages_add("nonexistent");
        let issues = db.check_integrity(&[], &[]);
        assert!(!issues
            .iter()
            .any(|i| matches!(i, IntegrityIssue::MissingPackageDependency { .. })));
    }

    #[test]
    fn filelist_filters() {
        let db = sample_db();
        let pkg = db.find_pkg("app").expect("installed");
        let filters = vec![StringFilter::new(Match::glob("usr/bin/*"), false)];
        let files: Vec<&str> = db.filtered_filelist(pkg, &filters).collect();
        assert_eq!(vec!["usr/bin/app"], files);
    }
}
