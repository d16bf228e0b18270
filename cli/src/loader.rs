//! Load a package from a directory tree: a pacman-style `.PKGINFO` plus the
//! package payload, whose ELF files are parsed in place.

use std::path::Path;
use std::path::PathBuf;

use log::error;
use log::warn;

use pkgdepdb::match_glob;
use pkgdepdb::split_dir_base;
use pkgdepdb::Db;
use pkgdepdb::Dependency;
use pkgdepdb::Elf;
use pkgdepdb::Package;

#[derive(thiserror::Error, Debug)]
pub enum LoaderError {
    #[error("{0:?}: not a directory")]
    NotADirectory(PathBuf),
    #[error("{0:?}: missing or unreadable .PKGINFO")]
    MissingPkgInfo(PathBuf),
    #[error("{0:?}: .PKGINFO has no pkgname")]
    MissingName(PathBuf),
    #[error("Input/output error: {0}")]
    Io(#[from] std::io::Error),
}

/// A package parsed from disk, not yet installed into a database.
pub struct LoadedPackage {
    pub pkg: Package,
    pub objects: Vec<Elf>,
}

/// What the loader records besides the objects themselves.
pub struct LoaderOptions {
    /// Keep the dependency lists from `.PKGINFO`.
    pub with_depends: bool,
    /// Record the filelist.
    pub with_filelist: bool,
}

fn parse_pkginfo(pkg: &mut Package, content: &str, with_depends: bool) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let dep = || Dependency::parse(value);
        match key {
            "pkgname" => pkg.name = value.to_owned(),
            "pkgver" => pkg.version = value.to_owned(),
            "group" => {
                pkg.groups.insert(value.to_owned());
            }
            _ if !with_depends => {}
            "depend" => pkg.depends.push(dep()),
            "optdepend" => {
                // Optional dependencies may carry a `: description` suffix.
                let name = value.split(':').next().unwrap_or(value).trim();
                pkg.optdepends.push(Dependency::parse(name));
            }
            "makedepend" => pkg.makedepends.push(dep()),
            "checkdepend" => pkg.checkdepends.push(dep()),
            "provides" => pkg.provides.push(dep()),
            "conflict" => pkg.conflicts.push(dep()),
            "replaces" => pkg.replaces.push(dep()),
            _ => {}
        }
    }
}

fn ignored(db: &Db, entry: &str) -> bool {
    db.ignore_file_rules
        .iter()
        .any(|rule| match_glob(rule, entry))
}

fn walk(
    root: &Path,
    dir: &Path,
    db: &Db,
    options: &LoaderOptions,
    pkg: &mut Package,
    objects: &mut Vec<Elf>,
) -> Result<(), LoaderError> {
    let mut entries: Vec<_> = fs_err::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        // Package metadata files live at the root and are not content.
        if dir == root && name.to_string_lossy().starts_with('.') {
            continue;
        }
        let meta = fs_err::metadata(&path)?;
        if meta.is_dir() {
            walk(root, &path, db, options, pkg, objects)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let installed = format!("/{}", relative.display());
        if ignored(db, &installed) {
            continue;
        }
        if options.with_filelist {
            pkg.filelist.push(installed.clone());
        }
        let data = match fs_err::read(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                continue;
            }
        };
        match Elf::load(&data, &installed) {
            Ok(Some(mut elf)) => {
                let (dirname, basename) = split_dir_base(&installed);
                elf.dirname = dirname.to_owned();
                elf.basename = basename.to_owned();
                elf.solve_paths();
                objects.push(elf);
            }
            Ok(None) => {}
            Err(e) => {
                // One bad file does not sink the package.
                error!("{}: {}", installed, e);
            }
        }
    }
    Ok(())
}

/// Load a package from `dir`, applying the database's ignore-file rules.
pub fn load_package(
    dir: &Path,
    db: &Db,
    options: &LoaderOptions,
) -> Result<LoadedPackage, LoaderError> {
    if !dir.is_dir() {
        return Err(LoaderError::NotADirectory(dir.to_owned()));
    }
    let pkginfo = fs_err::read_to_string(dir.join(".PKGINFO"))
        .map_err(|_| LoaderError::MissingPkgInfo(dir.to_owned()))?;
    let mut pkg = Package::default();
    parse_pkginfo(&mut pkg, &pkginfo, options.with_depends);
    if pkg.name.is_empty() {
        return Err(LoaderError::MissingName(dir.to_owned()));
    }
    let mut objects = Vec::new();
    walk(dir, dir, db, options, &mut pkg, &mut objects)?;
    Ok(LoadedPackage { pkg, objects })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkginfo_fields() {
        let mut pkg = Package::default();
        parse_pkginfo(
            &mut pkg,
            "# generated by makepkg\n\
             pkgname = demo\n\
             pkgver = 1.2-1\n\
             group = tools\n\
             depend = glibc>=2.38\n\
             optdepend = zlib: compression support\n\
             provides = libdemo.so\n\
             conflict = demo-git\n\
             replaces = olddemo\n\
             makedepend = gcc\n\
             checkdepend = check\n",
            true,
        );
        assert_eq!("demo", pkg.name);
        assert_eq!("1.2-1", pkg.version);
        assert!(pkg.groups.contains("tools"));
        assert_eq!("glibc", pkg.depends[0].name);
        assert_eq!(">=2.38", pkg.depends[0].constraint);
        assert_eq!("zlib", pkg.optdepends[0].name);
        assert_eq!("libdemo.so", pkg.provides[0].name);
        assert_eq!("demo-git", pkg.conflicts[0].name);
        assert_eq!("olddemo", pkg.replaces[0].name);
        assert_eq!("gcc", pkg.makedepends[0].name);
        assert_eq!("check", pkg.checkdepends[0].name);
    }

    #[test]
    fn pkginfo_without_depends() {
        let mut pkg = Package::default();
        parse_pkginfo(&mut pkg, "pkgname = demo\ndepend = glibc\n", false);
        assert_eq!("demo", pkg.name);
        assert!(pkg.depends.is_empty());
    }

    #[test]
    fn loads_a_package_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs_err::write(root.join(".PKGINFO"), "pkgname = demo\npkgver = 1-1\n")
            .expect("write .PKGINFO");
        fs_err::create_dir_all(root.join("usr/share")).expect("mkdir");
        fs_err::write(root.join("usr/share/data.txt"), "hello").expect("write");

        let db = Db::new();
        let options = LoaderOptions {
            with_depends: true,
            with_filelist: true,
        };
        let loaded = load_package(root, &db, &options).expect("load");
        assert_eq!("demo", loaded.pkg.name);
        assert_eq!(vec!["/usr/share/data.txt".to_owned()], loaded.pkg.filelist);
        assert!(loaded.objects.is_empty());
    }

    #[test]
    fn ignore_rules_hide_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        fs_err::write(root.join(".PKGINFO"), "pkgname = demo\n").expect("write");
        fs_err::create_dir_all(root.join("usr/share/doc")).expect("mkdir");
        fs_err::write(root.join("usr/share/doc/README"), "docs").expect("write");

        let mut db = Db::new();
        db.ignore_file_add("/usr/share/doc/*");
        let options = LoaderOptions {
            with_depends: true,
            with_filelist: true,
        };
        let loaded = load_package(root, &db, &options).expect("load");
        assert!(loaded.pkg.filelist.is_empty());
    }
}
