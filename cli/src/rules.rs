//! The textual `--rule` and `--filter` mini-languages.

use pkgdepdb::Db;
use pkgdepdb::Match;
use pkgdepdb::ObjectAxis;
use pkgdepdb::ObjectFilter;
use pkgdepdb::PackageAxis;
use pkgdepdb::PackageFilter;
use pkgdepdb::StringFilter;

use crate::config::str2bool;

fn parse_id(text: &str, rule: &str) -> Result<usize, String> {
    text.parse()
        .map_err(|_| format!("malformed rule: `{rule}`"))
}

/// Split `PKG:REST` at the first colon.
fn pkg_and_rest<'a>(text: &'a str, rule: &str) -> Result<(&'a str, &'a str), String> {
    text.split_once(':')
        .ok_or_else(|| format!("malformed rule: `{rule}`"))
}

/// Apply one `--rule=CMD` command. Returns whether the database changed.
pub fn parse_rule(db: &mut Db, rule: &str) -> Result<bool, String> {
    let (cmd, arg) = rule
        .split_once(':')
        .ok_or_else(|| format!("malformed rule: `{rule}`"))?;
    if arg.is_empty() {
        return Err(format!("malformed rule: `{rule}`"));
    }
    match cmd {
        "ignore" => Ok(db.ignore_file_add(arg)),
        "unignore" => Ok(db.ignore_file_delete(arg)),
        "unignore-id" => Ok(db.ignore_file_delete_id(parse_id(arg, rule)?)),
        "assume-found" => Ok(db.assume_found_add(arg)),
        "unassume-found" => Ok(db.assume_found_delete(arg)),
        "unassume-found-id" => Ok(db.assume_found_delete_id(parse_id(arg, rule)?)),
        "strict" => Ok(db.set_strict(str2bool(arg))),
        "base-add" => Ok(db.base_packages_add(arg)),
        "base-remove" => Ok(db.base_packages_delete(arg)),
        "base-remove-id" => Ok(db.base_packages_delete_id(parse_id(arg, rule)?)),
        "pkg-ld-clear" => Ok(db.pkg_ld_clear(arg)),
        "pkg-ld-append" => {
            let (pkg, path) = pkg_and_rest(arg, rule)?;
            Ok(db.pkg_ld_append(pkg, path))
        }
        "pkg-ld-prepend" => {
            let (pkg, path) = pkg_and_rest(arg, rule)?;
            Ok(db.pkg_ld_prepend(pkg, path))
        }
        "pkg-ld-insert" => {
            let (pkg, rest) = pkg_and_rest(arg, rule)?;
            let (id, path) = pkg_and_rest(rest, rule)?;
            Ok(db.pkg_ld_insert(pkg, path, parse_id(id, rule)?))
        }
        "pkg-ld-delete" => {
            let (pkg, path) = pkg_and_rest(arg, rule)?;
            Ok(db.pkg_ld_delete(pkg, path))
        }
        "pkg-ld-delete-id" => {
            let (pkg, id) = pkg_and_rest(arg, rule)?;
            Ok(db.pkg_ld_delete_id(pkg, parse_id(id, rule)?))
        }
        _ => Err(format!("unknown rule: `{rule}`")),
    }
}

/// A parsed `--filter` argument.
pub enum Filter {
    Pkg(PackageFilter),
    Obj(ObjectFilter),
    Str(StringFilter),
}

enum Axis {
    Pkg(PackageAxis),
    Obj(ObjectAxis),
    File,
}

fn lookup_axis(name: &str) -> Option<Axis> {
    use Axis::*;
    Some(match name {
        "name" => Pkg(PackageAxis::Name),
        "group" => Pkg(PackageAxis::Group),
        "depends" => Pkg(PackageAxis::Depends),
        "optdepends" => Pkg(PackageAxis::OptDepends),
        "makedepends" => Pkg(PackageAxis::MakeDepends),
        "checkdepends" => Pkg(PackageAxis::CheckDepends),
        "alldepends" => Pkg(PackageAxis::AllDepends),
        "provides" => Pkg(PackageAxis::Provides),
        "conflicts" => Pkg(PackageAxis::Conflicts),
        "replaces" => Pkg(PackageAxis::Replaces),
        "contains" => Pkg(PackageAxis::Contains),
        "pkglibdepends" => Pkg(PackageAxis::PkgLibDepends),
        "pkglibrpath" => Pkg(PackageAxis::PkgLibRpath),
        "pkglibrunpath" => Pkg(PackageAxis::PkgLibRunpath),
        "pkglibinterp" => Pkg(PackageAxis::PkgLibInterp),
        "libname" => Obj(ObjectAxis::Name),
        "libpath" => Obj(ObjectAxis::Path),
        "libdepends" => Obj(ObjectAxis::Depends),
        "librpath" => Obj(ObjectAxis::Rpath),
        "librunpath" => Obj(ObjectAxis::Runpath),
        "libinterp" => Obj(ObjectAxis::Interp),
        "file" => File,
        _ => return None,
    })
}

#[cfg(feature = "regex")]
fn regex_match(body: &str) -> Result<Match, String> {
    let (pattern, flags) = match body.rfind('/') {
        Some(at) => (&body[..at], &body[at + 1..]),
        None => return Err(format!("unterminated regex: `{body}`")),
    };
    let icase = match flags {
        "" => false,
        "i" => true,
        _ => return Err(format!("unknown regex flags: `{flags}`")),
    };
    Match::regex(pattern, icase).map_err(|e| e.to_string())
}

#[cfg(not(feature = "regex"))]
fn regex_match(_body: &str) -> Result<Match, String> {
    Err("regex support is not compiled in".to_owned())
}

/// Parse one `--filter=[!]AXIS(=|:|/)VALUE` argument.
///
/// `=` selects exact matching, `:` glob matching and `/RE/` a regular
/// expression (with an optional trailing `i` for case-insensitivity). The
/// bare word `broken` is the intrinsic broken-package filter.
pub fn parse_filter(text: &str) -> Result<Filter, String> {
    let (negate, text) = match text.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if text == "broken" {
        return Ok(Filter::Pkg(PackageFilter::new(
            PackageAxis::Broken,
            None,
            negate,
        )));
    }
    let separator = text
        .find(['=', ':', '/'])
        .ok_or_else(|| format!("invalid filter: `{text}`"))?;
    let (axis, rest) = text.split_at(separator);
    let axis = lookup_axis(axis).ok_or_else(|| format!("unknown filter axis: `{axis}`"))?;
    let predicate = match rest.as_bytes()[0] {
        b'=' => Match::exact(&rest[1..]),
        b':' => Match::glob(&rest[1..]),
        b'/' => regex_match(&rest[1..])?,
        _ => unreachable!("separator is one of =:/"),
    };
    Ok(match axis {
        Axis::Pkg(axis) => Filter::Pkg(PackageFilter::new(axis, Some(predicate), negate)),
        Axis::Obj(axis) => Filter::Obj(ObjectFilter::new(axis, predicate, negate)),
        Axis::File => Filter::Str(StringFilter::new(predicate, negate)),
    })
}
