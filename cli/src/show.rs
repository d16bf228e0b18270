//! Human-readable query output.

use pkgdepdb::Db;
use pkgdepdb::DepKind;
use pkgdepdb::Elf;
use pkgdepdb::IntegrityIssue;
use pkgdepdb::ObjectFilter;
use pkgdepdb::PackageFilter;
use pkgdepdb::StringFilter;

pub fn show_info(db: &Db) {
    println!("Database: {}", db.name);
    println!("DB version: {}", db.loaded_version());
    println!("Strict linking: {}", if db.strict_linking { "yes" } else { "no" });
    println!("Packages: {}", db.package_count());
    println!("Objects: {}", db.object_count());
    println!("Library path:");
    for (i, dir) in db.library_path.iter().enumerate() {
        println!("  {i}: {dir}");
    }
    if !db.ignore_file_rules.is_empty() {
        println!("Ignoring files:");
        for (i, rule) in db.ignore_file_rules.iter().enumerate() {
            println!("  {i}: {rule}");
        }
    }
    if !db.assume_found_rules.is_empty() {
        println!("Assuming libraries to exist:");
        for (i, rule) in db.assume_found_rules.iter().enumerate() {
            println!("  {i}: {rule}");
        }
    }
    if !db.base_packages.is_empty() {
        println!("Base packages:");
        for (i, name) in db.base_packages.iter().enumerate() {
            println!("  {i}: {name}");
        }
    }
    if !db.package_library_path.is_empty() {
        println!("Package library paths:");
        for (pkg, paths) in &db.package_library_path {
            println!("  {pkg}: {}", paths.join(":"));
        }
    }
}

fn describe(elf: &Elf) -> String {
    format!(
        "{} [{} {} {}]",
        elf.path(),
        elf.class.as_str(),
        elf.byte_order.as_str(),
        elf.os_abi.as_str()
    )
}

pub fn show_packages(
    db: &Db,
    pkg_filters: &[PackageFilter],
    obj_filters: &[ObjectFilter],
    not_empty: bool,
    verbose: bool,
) {
    for pkg in db.filtered_packages(pkg_filters) {
        if not_empty && db.is_empty_pkg(pkg, obj_filters) {
            continue;
        }
        println!("{} {}", pkg.name, pkg.version);
        if !verbose {
            continue;
        }
        for (label, kind) in [
            ("depends", DepKind::Depends),
            ("optdepends", DepKind::OptDepends),
            ("makedepends", DepKind::MakeDepends),
            ("checkdepends", DepKind::CheckDepends),
            ("provides", DepKind::Provides),
            ("conflicts", DepKind::Conflicts),
            ("replaces", DepKind::Replaces),
        ] {
            let list = pkg.dep_list(kind);
            if !list.is_empty() {
                let names: Vec<String> = list.iter().map(ToString::to_string).collect();
                println!("  {label}: {}", names.join(" "));
            }
        }
        if !pkg.groups.is_empty() {
            let groups: Vec<&str> = pkg.groups.iter().map(String::as_str).collect();
            println!("  groups: {}", groups.join(" "));
        }
        for &id in &pkg.objects {
            if let Some(elf) = db.object(id) {
                if obj_filters.iter().all(|f| f.matches(elf)) {
                    println!("  contains {}", describe(elf));
                }
            }
        }
    }
}

pub fn show_objects(db: &Db, obj_filters: &[ObjectFilter], broken_only: bool, verbose: bool) {
    for (id, elf) in db.filtered_objects(obj_filters) {
        if broken_only && !db.is_broken(id) {
            continue;
        }
        println!("{}", describe(elf));
        if !verbose {
            continue;
        }
        if let Some(interp) = elf.interpreter.as_deref() {
            println!("  interpreter: {interp}");
        }
        if let Some(rpath) = elf.rpath.as_deref() {
            println!("  rpath: {rpath}");
        }
        if let Some(runpath) = elf.runpath.as_deref() {
            println!("  runpath: {runpath}");
        }
        for needed in &elf.needed {
            println!("  needs {needed}");
        }
    }
}

pub fn show_missing(db: &Db, obj_filters: &[ObjectFilter]) {
    for (id, elf) in db.filtered_objects(obj_filters) {
        if !db.is_broken(id) {
            continue;
        }
        println!("{}", describe(elf));
        for name in &elf.req_missing {
            println!("  misses {name}");
        }
    }
}

pub fn show_found(db: &Db, obj_filters: &[ObjectFilter]) {
    for (id, elf) in db.filtered_objects(obj_filters) {
        if elf.req_found.is_empty() {
            continue;
        }
        println!("{}", describe(elf));
        for (_, lib) in db.found_of(id) {
            println!("  finds {}", lib.path());
        }
    }
}

pub fn show_filelists(db: &Db, pkg_filters: &[PackageFilter], str_filters: &[StringFilter]) {
    for pkg in db.filtered_packages(pkg_filters) {
        for file in db.filtered_filelist(pkg, str_filters) {
            println!("{}: {}", pkg.name, file);
        }
    }
}

/// Returns whether every check passed.
pub fn show_integrity(
    db: &Db,
    pkg_filters: &[PackageFilter],
    obj_filters: &[ObjectFilter],
) -> bool {
    let issues = db.check_integrity(pkg_filters, obj_filters);
    for issue in &issues {
        match issue {
            IntegrityIssue::MissingPackageDependency { pkg, dependency } => {
                println!("{pkg}: depends on {dependency} which is not installed");
            }
            IntegrityIssue::MissingLibrary {
                pkg,
                object,
                library,
                candidates,
            } => {
                if candidates.is_empty() {
                    println!("{pkg}: {object} misses {library}");
                } else {
                    println!(
                        "{pkg}: {object} misses {library} (candidates: {})",
                        candidates.join(", ")
                    );
                }
            }
        }
    }
    issues.is_empty()
}
