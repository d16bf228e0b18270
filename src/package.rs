use std::collections::BTreeSet;
use std::fmt;

use crate::ObjId;

/// One entry of a package dependency list: a package name and a free-form
/// version constraint such as `>=1.0` (possibly empty).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Dependency {
    pub name: String,
    pub constraint: String,
}

impl Dependency {
    /// Create a dependency from its two parts.
    pub fn new<N: Into<String>, C: Into<String>>(name: N, constraint: C) -> Self {
        Self {
            name: name.into(),
            constraint: constraint.into(),
        }
    }

    /// Split a glued dependency string such as `glibc>=2.38` at the first
    /// constraint operator. Strings without an operator have an empty
    /// constraint.
    pub fn parse(full: &str) -> Self {
        match full.find(['<', '>', '=', '!']) {
            Some(at) => Self::new(&full[..at], &full[at..]),
            None => Self::new(full, ""),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.constraint)
    }
}

/// Selector for one of a package's dependency lists.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum DepKind {
    Depends = 0,
    OptDepends = 1,
    MakeDepends = 2,
    Provides = 3,
    Conflicts = 4,
    Replaces = 5,
    CheckDepends = 6,
}

/// An installed package: metadata plus the objects it owns.
///
/// Objects are referred to by pool handles; the database is the arbiter of
/// the handle space. A package outside a database has an empty object list.
#[derive(Clone, Debug, Default)]
pub struct Package {
    /// Package name, the identity used by install and remove.
    pub name: String,
    /// Package version string.
    pub version: String,
    /// Handles of the ELF objects this package owns.
    pub objects: Vec<ObjId>,
    pub depends: Vec<Dependency>,
    pub optdepends: Vec<Dependency>,
    pub makedepends: Vec<Dependency>,
    pub checkdepends: Vec<Dependency>,
    pub provides: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub replaces: Vec<Dependency>,
    /// Package groups.
    pub groups: BTreeSet<String>,
    /// Every file the package installs, in archive order. Duplicates are
    /// preserved.
    pub filelist: Vec<String>,
}

impl Package {
    /// Create an empty package with a name and version.
    pub fn new<N: Into<String>, V: Into<String>>(name: N, version: V) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// The dependency list selected by `kind`.
    pub fn dep_list(&self, kind: DepKind) -> &[Dependency] {
        match kind {
            DepKind::Depends => &self.depends,
            DepKind::OptDepends => &self.optdepends,
            DepKind::MakeDepends => &self.makedepends,
            DepKind::CheckDepends => &self.checkdepends,
            DepKind::Provides => &self.provides,
            DepKind::Conflicts => &self.conflicts,
            DepKind::Replaces => &self.replaces,
        }
    }

    /// The dependency list selected by `kind`, mutably.
    pub fn dep_list_mut(&mut self, kind: DepKind) -> &mut Vec<Dependency> {
        match kind {
            DepKind::Depends => &mut self.depends,
            DepKind::OptDepends => &mut self.optdepends,
            DepKind::MakeDepends => &mut self.makedepends,
            DepKind::CheckDepends => &mut self.checkdepends,
            DepKind::Provides => &mut self.provides,
            DepKind::Conflicts => &mut self.conflicts,
            DepKind::Replaces => &mut self.replaces,
        }
    }

    /// Whether any dependency list is non-empty.
    pub(crate) fn has_depends(&self) -> bool {
        !self.depends.is_empty()
            || !self.optdepends.is_empty()
            || !self.makedepends.is_empty()
            || !self.checkdepends.is_empty()
            || !self.provides.is_empty()
            || !self.conflicts.is_empty()
            || !self.replaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_glued_dependencies() {
        let dep = Dependency::parse("glibc>=2.38");
        assert_eq!("glibc", dep.name);
        assert_eq!(">=2.38", dep.constraint);
        assert_eq!("glibc>=2.38", dep.to_string());

        let dep = Dependency::parse("zlib");
        assert_eq!("zlib", dep.name);
        assert_eq!("", dep.constraint);

        let dep = Dependency::parse("pkg=1.0");
        assert_eq!("pkg", dep.name);
        assert_eq!("=1.0", dep.constraint);
    }
}
