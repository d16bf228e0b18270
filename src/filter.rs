//! String predicates and the filters composed from them.
//!
//! A filter binds a predicate to an axis of a package or an object (its
//! name, a dependency list, a search path, ...) with an optional negation.
//! The `broken` package axis is intrinsic and needs no predicate.

use crate::Db;
use crate::Elf;
#[cfg(feature = "regex")]
use crate::Error;
use crate::Package;

/// A predicate over strings.
#[derive(Clone, Debug)]
pub enum Match {
    /// Byte equality.
    Exact(String),
    /// Glob pattern, see [`match_glob`].
    Glob(String),
    /// Extended regular expression.
    #[cfg(feature = "regex")]
    #[cfg_attr(docsrs, doc(cfg(feature = "regex")))]
    Regex(regex::Regex),
}

impl Match {
    /// Exact matcher.
    pub fn exact<S: Into<String>>(text: S) -> Self {
        Self::Exact(text.into())
    }

    /// Glob matcher.
    pub fn glob<S: Into<String>>(text: S) -> Self {
        Self::Glob(text.into())
    }

    /// Regular expression matcher with an optional case-insensitivity flag.
    #[cfg(feature = "regex")]
    #[cfg_attr(docsrs, doc(cfg(feature = "regex")))]
    pub fn regex(text: &str, icase: bool) -> Result<Self, Error> {
        let re = regex::RegexBuilder::new(text)
            .case_insensitive(icase)
            .build()?;
        Ok(Self::Regex(re))
    }

    /// Apply the predicate.
    pub fn matches(&self, s: &str) -> bool {
        match self {
            Self::Exact(text) => text == s,
            Self::Glob(pattern) => match_glob(pattern, s),
            #[cfg(feature = "regex")]
            Self::Regex(re) => re.is_match(s),
        }
    }
}

/// Match `input` against a glob pattern.
///
/// `?` matches one character, `*` any run of characters, `[set]` one
/// character from the set and `[^set]` one character outside it. A `[` with
/// no closing `]` matches a literal `[`. The empty pattern matches only the
/// empty input.
pub fn match_glob(pattern: &str, input: &str) -> bool {
    glob_at(pattern.as_bytes(), 0, input.as_bytes(), 0)
}

/// A parsed `[...]` group: the set bytes, the negation flag and the index
/// of the closing bracket.
fn parse_group(glob: &[u8], at: usize) -> Option<(usize, usize, bool)> {
    let mut i = at + 1;
    let neg = i < glob.len() && glob[i] == b'^';
    let from = if neg { i + 1 } else { i };
    while i < glob.len() && glob[i] != b']' {
        i += 1;
    }
    if i >= glob.len() {
        return None;
    }
    Some((from, i, neg))
}

fn in_group(glob: &[u8], from: usize, close: usize, neg: bool, c: u8) -> bool {
    if glob[from..close].contains(&c) {
        !neg
    } else {
        neg
    }
}

fn glob_at(glob: &[u8], g: usize, s: &[u8], sp: usize) -> bool {
    if g >= glob.len() {
        // Nothing left to match; succeed only on an empty input tail.
        return sp >= s.len();
    }
    if sp >= s.len() {
        return false;
    }
    match glob[g] {
        b'?' => glob_at(glob, g + 1, s, sp + 1),
        b'[' => match parse_group(glob, g) {
            Some((from, close, neg)) => {
                in_group(glob, from, close, neg, s[sp]) && glob_at(glob, close + 1, s, sp + 1)
            }
            // Unterminated group, take the bracket literally.
            None => s[sp] == b'[' && glob_at(glob, g + 1, s, sp + 1),
        },
        b'*' => {
            let mut g = g;
            while g < glob.len() && (glob[g] == b'*' || glob[g] == b'?') {
                g += 1;
            }
            if g >= glob.len() {
                // The pattern ended in a run of stars; everything matches.
                return true;
            }
            // The set after a star is parsed once and probed at every
            // candidate position.
            let group = if glob[g] == b'[' { parse_group(glob, g) } else { None };
            let mut sp = sp;
            while sp < s.len() {
                let (hit, next) = match group {
                    Some((from, close, neg)) => (in_group(glob, from, close, neg, s[sp]), close + 1),
                    None => (s[sp] == glob[g], g + 1),
                };
                if hit && glob_at(glob, next, s, sp + 1) {
                    return true;
                }
                sp += 1;
            }
            false
        }
        c => c == s[sp] && glob_at(glob, g + 1, s, sp + 1),
    }
}

/// Axis of a package filter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum PackageAxis {
    Name,
    Group,
    Depends,
    OptDepends,
    MakeDepends,
    CheckDepends,
    AllDepends,
    Provides,
    Conflicts,
    Replaces,
    /// Matches entries of the package's filelist.
    Contains,
    /// Matches `DT_NEEDED` entries of the package's objects.
    PkgLibDepends,
    /// Matches rpaths of the package's objects.
    PkgLibRpath,
    /// Matches runpaths of the package's objects.
    PkgLibRunpath,
    /// Matches interpreters of the package's objects.
    PkgLibInterp,
    /// Intrinsic: the package has a broken object. Takes no predicate.
    Broken,
}

/// A package filter: an axis, a predicate and a negation flag.
#[derive(Clone, Debug)]
pub struct PackageFilter {
    pub axis: PackageAxis,
    /// Unused (and allowed to be `None`) for [`PackageAxis::Broken`].
    pub predicate: Option<Match>,
    pub negate: bool,
}

impl PackageFilter {
    /// Create a filter.
    pub fn new(axis: PackageAxis, predicate: Option<Match>, negate: bool) -> Self {
        Self {
            axis,
            predicate,
            negate,
        }
    }

    fn predicate_matches(&self, s: &str) -> bool {
        match &self.predicate {
            Some(m) => m.matches(s),
            None => true,
        }
    }

    /// Whether `pkg` passes the filter.
    pub fn matches(&self, db: &Db, pkg: &Package) -> bool {
        let deps = |list: &[crate::Dependency]| list.iter().any(|d| self.predicate_matches(&d.name));
        let objs = |f: &dyn Fn(&Elf) -> bool| {
            pkg.objects
                .iter()
                .filter_map(|&id| db.object(id))
                .any(|elf| f(elf))
        };
        let visible = match self.axis {
            PackageAxis::Name => self.predicate_matches(&pkg.name),
            PackageAxis::Group => pkg.groups.iter().any(|g| self.predicate_matches(g)),
            PackageAxis::Depends => deps(&pkg.depends),
            PackageAxis::OptDepends => deps(&pkg.optdepends),
            PackageAxis::MakeDepends => deps(&pkg.makedepends),
            PackageAxis::CheckDepends => deps(&pkg.checkdepends),
            PackageAxis::AllDepends => {
                deps(&pkg.depends)
                    || deps(&pkg.optdepends)
                    || deps(&pkg.makedepends)
                    || deps(&pkg.checkdepends)
            }
            PackageAxis::Provides => deps(&pkg.provides),
            PackageAxis::Conflicts => deps(&pkg.conflicts),
            PackageAxis::Replaces => deps(&pkg.replaces),
            PackageAxis::Contains => pkg.filelist.iter().any(|f| self.predicate_matches(f)),
            PackageAxis::PkgLibDepends => {
                objs(&|elf| elf.needed.iter().any(|n| self.predicate_matches(n)))
            }
            PackageAxis::PkgLibRpath => {
                objs(&|elf| elf.rpath.as_deref().is_some_and(|p| self.predicate_matches(p)))
            }
            PackageAxis::PkgLibRunpath => {
                objs(&|elf| elf.runpath.as_deref().is_some_and(|p| self.predicate_matches(p)))
            }
            PackageAxis::PkgLibInterp => objs(&|elf| {
                elf.interpreter
                    .as_deref()
                    .is_some_and(|p| self.predicate_matches(p))
            }),
            PackageAxis::Broken => db.is_broken_pkg(pkg),
        };
        visible != self.negate
    }
}

/// Axis of an object filter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum ObjectAxis {
    /// The object's basename.
    Name,
    /// The object's full `dirname/basename` path.
    Path,
    /// One of the object's `DT_NEEDED` entries.
    Depends,
    Rpath,
    Runpath,
    Interp,
}

/// An object filter: an axis, a predicate and a negation flag.
#[derive(Clone, Debug)]
pub struct ObjectFilter {
    pub axis: ObjectAxis,
    pub predicate: Match,
    pub negate: bool,
}

impl ObjectFilter {
    /// Create a filter.
    pub fn new(axis: ObjectAxis, predicate: Match, negate: bool) -> Self {
        Self {
            axis,
            predicate,
            negate,
        }
    }

    /// Whether `elf` passes the filter.
    pub fn matches(&self, elf: &Elf) -> bool {
        let visible = match self.axis {
            ObjectAxis::Name => self.predicate.matches(&elf.basename),
            ObjectAxis::Path => self.predicate.matches(&elf.path()),
            ObjectAxis::Depends => elf.needed.iter().any(|n| self.predicate.matches(n)),
            ObjectAxis::Rpath => elf.rpath.as_deref().is_some_and(|p| self.predicate.matches(p)),
            ObjectAxis::Runpath => {
                elf.runpath.as_deref().is_some_and(|p| self.predicate.matches(p))
            }
            ObjectAxis::Interp => elf
                .interpreter
                .as_deref()
                .is_some_and(|p| self.predicate.matches(p)),
        };
        visible != self.negate
    }
}

/// A plain string filter, used for filelist queries.
#[derive(Clone, Debug)]
pub struct StringFilter {
    pub predicate: Match,
    pub negate: bool,
}

impl StringFilter {
    /// Create a filter.
    pub fn new(predicate: Match, negate: bool) -> Self {
        Self { predicate, negate }
    }

    /// Whether `s` passes the filter.
    pub fn matches(&self, s: &str) -> bool {
        self.predicate.matches(s) != self.negate
    }
}
